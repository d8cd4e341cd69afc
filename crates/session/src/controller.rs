//! Live-Sitzungs-Steuerung – Zustandsmaschine und Ereignis-Pipeline
//!
//! ## Zustandsmaschine
//! ```text
//! Standby -> Verbindet -> Live -> Beendet
//!               |           |
//!               +-> Fehler <-+        (terminal, explizites Zuruecksetzen)
//! ```
//!
//! ## Ereignis-Pipeline (ein einzelner Tokio-Task)
//! ```text
//! KanalEreignis-Strom (Ankunftsreihenfolge)
//!     AudioChunk   -> base64 -> PCM -> f32 -> Planer.einreihen
//!     Unterbrochen -> Planer.unterbrechen (vor allen spaeteren Chunks)
//!     ZugAbgeschlossen -> nur protokolliert
//!     Fehler       -> Zustand Fehler, Wiedergabe verwerfen
//!     Geschlossen  -> Live -> Beendet, Wiedergabe verwerfen
//! ```
//!
//! Codec-Fehler einzelner Chunks bleiben chunk-lokal: protokollieren,
//! verwerfen, weiterlaufen. Ein Fehler der Ausgabe-Senke ist dagegen
//! sitzungs-fatal.

use std::sync::Arc;

use mahi_audio::pcm::{base64_dekodieren, pcm_zu_f32, wav_mono16};
use mahi_audio::{AbspielPlaner, DekodierterPuffer};
use mahi_core::{SessionId, SessionStatus};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::kanal::{DuplexKanal, KanalConfig, KanalEreignis, KanalHandle};
use crate::medien::{MedienConfig, MedienQuelle, MedienStrom};

/// Konfiguration einer Live-Sitzung
#[derive(Debug, Clone, Default)]
pub struct LiveSessionConfig {
    pub kanal: KanalConfig,
    pub medien: MedienConfig,
    /// Empfangenes Roh-PCM mitschneiden (Export via `aufnahme_als_wav`)
    pub aufnahme: bool,
}

/// Laufende Ressourcen einer aktiven Sitzung
struct SitzungsRessourcen {
    handle: Arc<dyn KanalHandle>,
    medien: MedienStrom,
    ereignis_task: tokio::task::JoinHandle<()>,
    sende_task: Option<tokio::task::JoinHandle<()>>,
}

/// Live-Sitzung zu einer Audio-Gegenstelle
///
/// Besitzt den Duplex-Kanal, die erworbenen Medien und den Abspiel-Planer
/// einer einzelnen Sitzung. Der Zustand ist ueber einen watch-Kanal
/// beobachtbar. Kein Retry, kein automatisches Wiederverbinden: nach
/// `Fehler` oder `Beendet` fuehrt der Weg nur ueber `zuruecksetzen()`
/// zurueck nach `Standby`.
pub struct LiveSession {
    id: SessionId,
    config: LiveSessionConfig,
    kanal: Arc<dyn DuplexKanal>,
    medien_quelle: Arc<dyn MedienQuelle>,
    planer: Arc<AbspielPlaner>,
    status_tx: watch::Sender<SessionStatus>,
    ressourcen: Arc<tokio::sync::Mutex<Option<SitzungsRessourcen>>>,
    /// Mitschnitt des empfangenen Roh-PCM (nur bei `config.aufnahme`)
    aufnahme: Arc<Mutex<Vec<u8>>>,
}

impl LiveSession {
    pub fn neu(
        kanal: Arc<dyn DuplexKanal>,
        medien_quelle: Arc<dyn MedienQuelle>,
        planer: Arc<AbspielPlaner>,
        config: LiveSessionConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Standby);
        Self {
            id: SessionId::new(),
            config,
            kanal,
            medien_quelle,
            planer,
            status_tx,
            ressourcen: Arc::new(tokio::sync::Mutex::new(None)),
            aufnahme: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Aktueller Sitzungs-Zustand
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    /// Beobachter fuer Zustandswechsel (UI-Anbindung)
    pub fn status_beobachten(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Startet die Sitzung: Standby -> Verbindet -> Live
    ///
    /// Reihenfolge ist Vertrag: erst Medien erwerben, dann den Kanal
    /// oeffnen. Wird der Medienzugriff verweigert, geht die Sitzung nach
    /// `Fehler`, ohne dass je ein Kanal geoeffnet wurde.
    pub async fn starten(&self) -> SessionResult<()> {
        let aktuell = self.status();
        if aktuell != SessionStatus::Standby {
            return Err(SessionError::UngueltigerZustand {
                zustand: aktuell,
                aktion: "starten",
            });
        }

        info!(id = %self.id, "Sitzung verbindet");
        self.status_tx.send_replace(SessionStatus::Verbindet);

        let mut medien = match self.medien_quelle.erwerben(&self.config.medien) {
            Ok(strom) => strom,
            Err(e) => {
                warn!(id = %self.id, fehler = %e, "Medienzugriff fehlgeschlagen");
                self.status_tx
                    .send_replace(SessionStatus::Fehler(e.to_string()));
                return Err(e);
            }
        };

        let (handle, ereignisse) = match self.kanal.oeffnen(self.config.kanal.clone()).await {
            Ok(paar) => paar,
            Err(e) => {
                warn!(id = %self.id, fehler = %e, "Kanal konnte nicht geoeffnet werden");
                medien.freigeben();
                self.status_tx
                    .send_replace(SessionStatus::Fehler(e.to_string()));
                return Err(e);
            }
        };
        let handle: Arc<dyn KanalHandle> = Arc::from(handle);

        // Lock halten bis die Ressourcen registriert sind: der Ereignis-Loop
        // darf einen sofortigen Kanal-Fehler nicht vor der Registrierung
        // abbauen wollen
        let mut ressourcen = self.ressourcen.lock().await;

        // Ein stoppen() waehrend des Handshakes gewinnt: den frisch
        // geoeffneten Kanal wieder schliessen statt den beendeten Zustand
        // zu ueberschreiben
        let aktuell = self.status();
        if aktuell != SessionStatus::Verbindet {
            handle.schliessen().await;
            medien.freigeben();
            return Err(SessionError::UngueltigerZustand {
                zustand: aktuell,
                aktion: "starten",
            });
        }

        self.status_tx.send_replace(SessionStatus::Live);
        info!(id = %self.id, "Sitzung live");

        let ereignis_task = tokio::spawn(Self::ereignis_loop(
            self.id,
            ereignisse,
            Arc::clone(&self.planer),
            self.status_tx.clone(),
            self.config.kanal.ausgabe_abtastrate,
            self.config.aufnahme.then(|| Arc::clone(&self.aufnahme)),
            Arc::clone(&self.ressourcen),
        ));

        let sende_task = medien.frames_entnehmen().map(|frames| {
            tokio::spawn(Self::sende_loop(
                self.id,
                frames,
                Arc::clone(&handle),
                self.status_tx.subscribe(),
            ))
        });

        *ressourcen = Some(SitzungsRessourcen {
            handle,
            medien,
            ereignis_task,
            sende_task,
        });
        Ok(())
    }

    /// Baut Kanal, Medien und Tasks ab (idempotent, jeder Austrittspfad)
    async fn ressourcen_abbauen(ressourcen: &tokio::sync::Mutex<Option<SitzungsRessourcen>>) {
        let Some(mut r) = ressourcen.lock().await.take() else {
            return;
        };
        r.handle.schliessen().await;
        r.medien.freigeben();
        if let Some(task) = r.sende_task.take() {
            task.abort();
        }
        // Zuletzt, damit ein Selbst-Abbruch aus dem Ereignis-Loop heraus den
        // restlichen Abbau nicht abschneidet
        r.ereignis_task.abort();
    }

    /// Stoppt die Sitzung (idempotent)
    ///
    /// Aus `Standby` heraus ein No-op. Schliesst den Kanal, stoppt die
    /// Medien-Spuren, verwirft die restliche Wiedergabe und wechselt nach
    /// `Beendet`. Terminale Zustaende bleiben unveraendert.
    pub async fn stoppen(&self) {
        let aktuell = self.status();
        if aktuell == SessionStatus::Standby || aktuell.ist_terminal() {
            debug!(id = %self.id, zustand = %aktuell, "stoppen() ohne Wirkung");
            return;
        }

        info!(id = %self.id, "Sitzung wird gestoppt");
        Self::ressourcen_abbauen(&self.ressourcen).await;
        self.planer.unterbrechen();

        // Ein zwischenzeitlicher Kanal-Fehler gewinnt gegen Beendet
        if !self.status().ist_terminal() {
            self.status_tx.send_replace(SessionStatus::Beendet);
        }
        info!(id = %self.id, "Sitzung beendet");
    }

    /// Setzt eine terminale Sitzung zurueck nach Standby
    pub fn zuruecksetzen(&self) -> SessionResult<()> {
        let aktuell = self.status();
        if !aktuell.ist_terminal() {
            return Err(SessionError::UngueltigerZustand {
                zustand: aktuell,
                aktion: "zuruecksetzen",
            });
        }
        self.aufnahme.lock().clear();
        self.status_tx.send_replace(SessionStatus::Standby);
        debug!(id = %self.id, "Sitzung zurueckgesetzt");
        Ok(())
    }

    /// Mitschnitt als WAV-Datei (44-Byte-Header + Roh-PCM)
    ///
    /// `None` wenn keine Aufnahme konfiguriert war oder nichts empfangen
    /// wurde.
    pub fn aufnahme_als_wav(&self) -> Option<Vec<u8>> {
        if !self.config.aufnahme {
            return None;
        }
        let pcm = self.aufnahme.lock();
        if pcm.is_empty() {
            return None;
        }
        Some(wav_mono16(&pcm, self.config.kanal.ausgabe_abtastrate))
    }

    // -----------------------------------------------------------------------
    // Ereignis-Loop (ein Task, strikte Ankunftsreihenfolge)
    // -----------------------------------------------------------------------

    async fn ereignis_loop(
        id: SessionId,
        mut ereignisse: mpsc::Receiver<KanalEreignis>,
        planer: Arc<AbspielPlaner>,
        status_tx: watch::Sender<SessionStatus>,
        abtastrate: u32,
        aufnahme: Option<Arc<Mutex<Vec<u8>>>>,
        ressourcen: Arc<tokio::sync::Mutex<Option<SitzungsRessourcen>>>,
    ) {
        debug!(%id, "Ereignis-Loop gestartet");
        while let Some(ereignis) = ereignisse.recv().await {
            match ereignis {
                KanalEreignis::AudioChunk { base64 } => {
                    // Chunk-lokale Codec-Fehler: protokollieren und verwerfen
                    let pcm = match base64_dekodieren(&base64) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(%id, fehler = %e, "Audio-Chunk verworfen");
                            continue;
                        }
                    };
                    let samples = match pcm_zu_f32(&pcm) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(%id, fehler = %e, "Audio-Chunk verworfen");
                            continue;
                        }
                    };
                    if let Some(mitschnitt) = &aufnahme {
                        mitschnitt.lock().extend_from_slice(&pcm);
                    }
                    let puffer = DekodierterPuffer {
                        samples,
                        abtastrate,
                    };
                    // Senken-Fehler sind sitzungs-fatal
                    if let Err(e) = planer.einreihen(puffer) {
                        warn!(%id, fehler = %e, "Ausgabe-Senke ausgefallen");
                        planer.unterbrechen();
                        status_tx.send_replace(SessionStatus::Fehler(e.to_string()));
                        break;
                    }
                }
                KanalEreignis::Unterbrochen => {
                    // Synchron vor allen spaeteren Chunk-Ereignissen
                    planer.unterbrechen();
                    debug!(%id, "Barge-in: Wiedergabe verworfen");
                }
                KanalEreignis::ZugAbgeschlossen => {
                    debug!(%id, "Modell-Zug abgeschlossen");
                }
                KanalEreignis::Fehler(meldung) => {
                    warn!(%id, fehler = %meldung, "Kanal-Fehler");
                    planer.unterbrechen();
                    status_tx.send_replace(SessionStatus::Fehler(meldung));
                    break;
                }
                KanalEreignis::Geschlossen => {
                    info!(%id, "Kanal von der Gegenstelle geschlossen");
                    planer.unterbrechen();
                    if !status_tx.borrow().ist_terminal() {
                        status_tx.send_replace(SessionStatus::Beendet);
                    }
                    break;
                }
            }
        }
        // Jeder Austrittspfad raeumt Kanal, Medien und Tasks ab
        debug!(%id, "Ereignis-Loop beendet");
        Self::ressourcen_abbauen(&ressourcen).await;
    }

    // -----------------------------------------------------------------------
    // Sende-Loop (Mikrofon -> Kanal, nur solange Live)
    // -----------------------------------------------------------------------

    async fn sende_loop(
        id: SessionId,
        mut frames: mpsc::Receiver<Vec<u8>>,
        handle: Arc<dyn KanalHandle>,
        status: watch::Receiver<SessionStatus>,
    ) {
        debug!(%id, "Sende-Loop gestartet");
        while let Some(frame) = frames.recv().await {
            if *status.borrow() != SessionStatus::Live {
                break;
            }
            if let Err(e) = handle.sende_audio(&frame).await {
                warn!(%id, fehler = %e, "Audio-Frame konnte nicht gesendet werden");
                break;
            }
        }
        debug!(%id, "Sende-Loop beendet");
    }
}
