//! Gemini-Live-Kanal – BidiGenerateContent ueber WebSocket
//!
//! Implementiert [`DuplexKanal`] gegen die Gemini-Live-API: nach dem
//! Verbinden geht eine Setup-Nachricht (Modell, System-Anweisung,
//! Antwort-Modalitaet) raus, danach laufen Audio-Frames aufwaerts als
//! `realtimeInput.mediaChunks` und Modell-Audio abwaerts als
//! `serverContent.modelTurn.parts[].inlineData` (base64-PCM). Die
//! Steuersignale `interrupted` und `turnComplete` kommen im selben
//! `serverContent`-Umschlag.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{SessionError, SessionResult};
use crate::kanal::{DuplexKanal, KanalConfig, KanalEreignis, KanalHandle};

const STANDARD_ENDPUNKT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsSenke = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsQuelle = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ---------------------------------------------------------------------------
// Wire-Format (camelCase JSON der Gegenstelle)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupUmschlag {
    setup: Setup,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Inhalt,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Inhalt {
    parts: Vec<TextTeil>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextTeil {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeUmschlag {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MedienBlob>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MedienBlob {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerNachricht {
    server_content: Option<ServerInhalt>,
    setup_complete: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerInhalt {
    model_turn: Option<ModellZug>,
    interrupted: bool,
    turn_complete: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct ModellZug {
    parts: Vec<ServerTeil>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerTeil {
    inline_data: Option<MedienBlob>,
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Kanal
// ---------------------------------------------------------------------------

/// Gemini-Live-Verbindung als Duplex-Kanal
pub struct GeminiLiveKanal {
    api_schluessel: String,
    endpunkt: String,
}

impl GeminiLiveKanal {
    pub fn neu(api_schluessel: impl Into<String>) -> Self {
        Self {
            api_schluessel: api_schluessel.into(),
            endpunkt: STANDARD_ENDPUNKT.to_string(),
        }
    }

    /// Abweichender Endpunkt, etwa fuer einen lokalen Proxy
    pub fn mit_endpunkt(mut self, endpunkt: impl Into<String>) -> Self {
        self.endpunkt = endpunkt.into();
        self
    }

    fn setup_nachricht(config: &KanalConfig) -> SetupUmschlag {
        SetupUmschlag {
            setup: Setup {
                model: config.modell.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec![config.modalitaet.wire_name().to_string()],
                },
                system_instruction: Inhalt {
                    parts: vec![TextTeil {
                        text: config.system_anweisung.clone(),
                    }],
                },
            },
        }
    }
}

#[async_trait]
impl DuplexKanal for GeminiLiveKanal {
    async fn oeffnen(
        &self,
        config: KanalConfig,
    ) -> SessionResult<(Box<dyn KanalHandle>, mpsc::Receiver<KanalEreignis>)> {
        let url = format!("{}?key={}", self.endpunkt, self.api_schluessel);
        let (ws, _antwort) = connect_async(&url)
            .await
            .map_err(|e| SessionError::Kanal(e.to_string()))?;
        debug!(modell = %config.modell, "Gemini-Live-Verbindung aufgebaut");

        let (mut senke, quelle) = ws.split();

        let setup = serde_json::to_string(&Self::setup_nachricht(&config))?;
        senke
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| SessionError::Kanal(e.to_string()))?;

        let (ereignis_tx, ereignis_rx) = mpsc::channel(64);
        tokio::spawn(lese_loop(quelle, ereignis_tx));

        let handle = GeminiHandle {
            senke: Arc::new(tokio::sync::Mutex::new(Some(senke))),
            eingabe_abtastrate: config.eingabe_abtastrate,
        };
        Ok((Box::new(handle), ereignis_rx))
    }
}

struct GeminiHandle {
    /// None nach `schliessen()`
    senke: Arc<tokio::sync::Mutex<Option<WsSenke>>>,
    eingabe_abtastrate: u32,
}

#[async_trait]
impl KanalHandle for GeminiHandle {
    async fn sende_audio(&self, pcm: &[u8]) -> SessionResult<()> {
        let nachricht = RealtimeUmschlag {
            realtime_input: RealtimeInput {
                media_chunks: vec![MedienBlob {
                    mime_type: format!("audio/pcm;rate={}", self.eingabe_abtastrate),
                    data: mahi_audio::pcm::base64_kodieren(pcm),
                }],
            },
        };
        let json = serde_json::to_string(&nachricht)?;

        let mut senke = self.senke.lock().await;
        match senke.as_mut() {
            Some(ws) => ws
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| SessionError::Kanal(e.to_string())),
            None => Err(SessionError::Kanal("Kanal bereits geschlossen".into())),
        }
    }

    async fn schliessen(&self) {
        let mut senke = self.senke.lock().await;
        if let Some(mut ws) = senke.take() {
            if let Err(e) = ws.send(Message::Close(None)).await {
                trace!(fehler = %e, "Close-Frame konnte nicht gesendet werden");
            }
        }
    }
}

/// Liest Server-Nachrichten und uebersetzt sie in Kanal-Ereignisse
///
/// Reihenfolge pro Umschlag: erst `interrupted` (Barge-in verwirft das
/// laufende Audio), dann die Audio-Teile des neuen Zugs, dann
/// `turnComplete`.
async fn lese_loop(mut quelle: WsQuelle, ereignisse: mpsc::Sender<KanalEreignis>) {
    while let Some(nachricht) = quelle.next().await {
        let text = match nachricht {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(daten)) => match String::from_utf8(daten.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    trace!("Binaere Nachricht ohne UTF-8 uebersprungen");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                let _ = ereignisse.send(KanalEreignis::Geschlossen).await;
                return;
            }
            Ok(_) => continue, // Ping/Pong
            Err(e) => {
                let _ = ereignisse.send(KanalEreignis::Fehler(e.to_string())).await;
                return;
            }
        };

        let nachricht: ServerNachricht = match serde_json::from_str(&text) {
            Ok(n) => n,
            Err(e) => {
                warn!(fehler = %e, "Unlesbare Server-Nachricht uebersprungen");
                continue;
            }
        };

        if nachricht.setup_complete.is_some() {
            debug!("Gemini-Setup bestaetigt");
            continue;
        }

        let Some(inhalt) = nachricht.server_content else {
            continue;
        };

        if inhalt.interrupted {
            if ereignisse.send(KanalEreignis::Unterbrochen).await.is_err() {
                return;
            }
        }
        if let Some(zug) = inhalt.model_turn {
            for teil in zug.parts {
                if let Some(text) = &teil.text {
                    trace!(text = %text.trim(), "Text-Teil des Modell-Zugs");
                }
                let Some(blob) = teil.inline_data else {
                    continue;
                };
                if !blob.mime_type.starts_with("audio/pcm") {
                    trace!(mime = %blob.mime_type, "Nicht-PCM-Blob uebersprungen");
                    continue;
                }
                let ereignis = KanalEreignis::AudioChunk { base64: blob.data };
                if ereignisse.send(ereignis).await.is_err() {
                    return;
                }
            }
        }
        if inhalt.turn_complete {
            if ereignisse
                .send(KanalEreignis::ZugAbgeschlossen)
                .await
                .is_err()
            {
                return;
            }
        }
    }
    // Stream-Ende ohne Close-Frame
    let _ = ereignisse.send(KanalEreignis::Geschlossen).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kanal::AntwortModalitaet;

    #[test]
    fn setup_nachricht_wire_format() {
        let config = KanalConfig {
            modell: "models/test-modell".into(),
            system_anweisung: "Antworte knapp.".into(),
            modalitaet: AntwortModalitaet::Audio,
            ..KanalConfig::default()
        };
        let json =
            serde_json::to_value(GeminiLiveKanal::setup_nachricht(&config)).unwrap();

        assert_eq!(json["setup"]["model"], "models/test-modell");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Antworte knapp."
        );
    }

    #[test]
    fn realtime_input_wire_format() {
        let nachricht = RealtimeUmschlag {
            realtime_input: RealtimeInput {
                media_chunks: vec![MedienBlob {
                    mime_type: "audio/pcm;rate=16000".into(),
                    data: "AAAA".into(),
                }],
            },
        };
        let json = serde_json::to_value(&nachricht).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAA");
    }

    #[test]
    fn server_nachricht_mit_audio_teil() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UFFS"}}
                    ]
                }
            }
        }"#;
        let nachricht: ServerNachricht = serde_json::from_str(json).unwrap();
        let inhalt = nachricht.server_content.unwrap();
        let zug = inhalt.model_turn.unwrap();
        let blob = zug.parts[0].inline_data.as_ref().unwrap();
        assert_eq!(blob.data, "UFFS");
        assert!(!inhalt.interrupted);
        assert!(!inhalt.turn_complete);
    }

    #[test]
    fn server_nachricht_steuersignale() {
        let json = r#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#;
        let nachricht: ServerNachricht = serde_json::from_str(json).unwrap();
        let inhalt = nachricht.server_content.unwrap();
        assert!(inhalt.interrupted);
        assert!(inhalt.turn_complete);
        assert!(inhalt.model_turn.is_none());
    }

    #[test]
    fn unbekannte_felder_stoeren_nicht() {
        let json = r#"{"setupComplete": {}, "usageMetadata": {"tokens": 5}}"#;
        let nachricht: ServerNachricht = serde_json::from_str(json).unwrap();
        assert!(nachricht.setup_complete.is_some());
        assert!(nachricht.server_content.is_none());
    }
}
