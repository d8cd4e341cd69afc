//! Duplex-Kanal zur Gegenstelle
//!
//! Die Sitzung spricht nie direkt mit einem WebSocket, sondern nur mit
//! diesem Trait-Paar: [`DuplexKanal`] oeffnet die Verbindung, der
//! zurueckgegebene [`KanalHandle`] sendet Audio aufwaerts, und alle
//! Abwaerts-Signale kommen als [`KanalEreignis`]-Strom ueber einen
//! tokio-mpsc-Receiver. Ein einzelner Konsument-Task verarbeitet die
//! Ereignisse strikt in Ankunftsreihenfolge.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionResult;

/// Antwort-Modalitaet der Gegenstelle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntwortModalitaet {
    Audio,
    Text,
}

impl AntwortModalitaet {
    /// Name im Wire-Format der Gegenstelle
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
            Self::Text => "TEXT",
        }
    }
}

/// Konfiguration fuer das Oeffnen eines Duplex-Kanals
#[derive(Debug, Clone)]
pub struct KanalConfig {
    /// Modellname der Gegenstelle
    pub modell: String,
    /// Feste System-Anweisung der Sitzung
    pub system_anweisung: String,
    /// Gewuenschte Antwort-Modalitaet
    pub modalitaet: AntwortModalitaet,
    /// Abtastrate der aufwaerts gesendeten PCM-Frames in Hz
    pub eingabe_abtastrate: u32,
    /// Abtastrate der abwaerts empfangenen PCM-Chunks in Hz
    pub ausgabe_abtastrate: u32,
}

impl Default for KanalConfig {
    fn default() -> Self {
        Self {
            modell: "models/gemini-2.5-flash-native-audio-preview".to_string(),
            system_anweisung: "Du bist ein hilfreicher Sprachassistent.".to_string(),
            modalitaet: AntwortModalitaet::Audio,
            eingabe_abtastrate: 16_000,
            ausgabe_abtastrate: mahi_audio::pcm::STANDARD_ABTASTRATE,
        }
    }
}

/// Abwaerts-Ereignis des Kanals
///
/// Eine Unterbrechung ist ein Steuersignal, nie ein Fehler: alles bereits
/// geplante Audio ist veraltet, nachfolgende Chunks gehoeren zum neuen Zug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KanalEreignis {
    /// Base64-kodierter PCM-Chunk eines Modell-Zugs
    AudioChunk { base64: String },
    /// Barge-in: laufende Wiedergabe sofort verwerfen
    Unterbrochen,
    /// Der Modell-Zug ist abgeschlossen
    ZugAbgeschlossen,
    /// Kanal-Fehler, sitzungs-fatal
    Fehler(String),
    /// Die Gegenstelle hat den Kanal geschlossen
    Geschlossen,
}

/// Aufwaerts-Griff auf einen geoeffneten Kanal
#[async_trait]
pub trait KanalHandle: Send + Sync {
    /// Sendet einen 16-bit-LE-PCM-Frame an die Gegenstelle
    async fn sende_audio(&self, pcm: &[u8]) -> SessionResult<()>;

    /// Schliesst den Kanal (idempotent)
    async fn schliessen(&self);
}

/// Fabrik fuer Duplex-Kanaele
#[async_trait]
pub trait DuplexKanal: Send + Sync {
    /// Oeffnet den Kanal und liefert Griff plus Ereignis-Strom
    async fn oeffnen(
        &self,
        config: KanalConfig,
    ) -> SessionResult<(Box<dyn KanalHandle>, mpsc::Receiver<KanalEreignis>)>;
}
