//! Medien-Erwerb – Mikrofon (und Kamera-Flag) fuer die Sitzung
//!
//! Die Sitzung erwirbt ihre Eingabe-Medien ueber das [`MedienQuelle`]-Trait.
//! Ein erfolgreicher Erwerb liefert einen [`MedienStrom`]: 16-bit-LE-PCM-
//! Frames ueber einen tokio-Kanal plus eine Freigabe, die alle Spuren
//! stoppt. Verweigerter Zugriff ist sitzungs-fatal und verhindert, dass
//! ueberhaupt ein Duplex-Kanal geoeffnet wird.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mahi_audio::erfassung::{oeffne_standard_erfassung, ErfassungsConfig};
use mahi_audio::pcm::f32_zu_pcm;
use ringbuf::traits::Consumer;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

/// Gewuenschte Medien-Spuren
#[derive(Debug, Clone)]
pub struct MedienConfig {
    /// Mikrofon erwerben
    pub mikrofon: bool,
    /// Kamera-Spur anfordern (nur Flag, Video bleibt ausserhalb)
    pub kamera: bool,
    /// Abtastrate der gelieferten PCM-Frames in Hz
    pub abtastrate: u32,
    /// Frame-Groesse in Samples
    pub frame_groesse: usize,
}

impl Default for MedienConfig {
    fn default() -> Self {
        Self {
            mikrofon: true,
            kamera: false,
            abtastrate: 16_000,
            frame_groesse: 1_600, // 100ms bei 16kHz
        }
    }
}

/// Erworbene Medien: PCM-Frame-Strom plus Freigabe
pub struct MedienStrom {
    frames: Option<mpsc::Receiver<Vec<u8>>>,
    freigabe: Option<Box<dyn FnOnce() + Send>>,
}

impl MedienStrom {
    /// Strom ohne Freigabe-Logik, fuer Tests und den Demo-Modus
    pub fn aus_kanal(frames: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            frames: Some(frames),
            freigabe: None,
        }
    }

    /// Strom mit Freigabe, die beim Stoppen alle Spuren beendet
    pub fn mit_freigabe(
        frames: mpsc::Receiver<Vec<u8>>,
        freigabe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            frames: Some(frames),
            freigabe: Some(Box::new(freigabe)),
        }
    }

    /// Entnimmt den Frame-Receiver (einmalig, fuer den Sende-Task)
    pub fn frames_entnehmen(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.frames.take()
    }

    /// Stoppt alle Spuren (idempotent)
    pub fn freigeben(&mut self) {
        if let Some(freigabe) = self.freigabe.take() {
            freigabe();
            debug!("Medien-Spuren freigegeben");
        }
    }
}

impl Drop for MedienStrom {
    fn drop(&mut self) {
        self.freigeben();
    }
}

/// Quelle fuer Eingabe-Medien
pub trait MedienQuelle: Send + Sync {
    /// Erwirbt die gewuenschten Spuren oder schlaegt sitzungs-fatal fehl
    fn erwerben(&self, config: &MedienConfig) -> SessionResult<MedienStrom>;
}

// ---------------------------------------------------------------------------
// MikrofonQuelle
// ---------------------------------------------------------------------------

/// Echtes Mikrofon ueber cpal
///
/// Der cpal-Stream ist !Send und lebt deshalb auf einem dedizierten
/// std::thread, der Samples aus dem Ring-Buffer zieht, zu PCM-Frames
/// buendelt und in den tokio-Kanal schiebt.
pub struct MikrofonQuelle;

impl MikrofonQuelle {
    pub fn neu() -> Self {
        Self
    }
}

impl MedienQuelle for MikrofonQuelle {
    fn erwerben(&self, config: &MedienConfig) -> SessionResult<MedienStrom> {
        if !config.mikrofon {
            return Err(SessionError::MedienZugriff(
                "Sitzung ohne Mikrofon-Spur angefordert".into(),
            ));
        }
        if config.kamera {
            debug!("Kamera-Spur angefordert, Video bleibt ausserhalb der Pipeline");
        }

        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(32);
        let laeuft = Arc::new(AtomicBool::new(true));

        let erfassungs_config = ErfassungsConfig {
            ziel_abtastrate: config.abtastrate,
            puffer_groesse: config.abtastrate as usize * 2,
        };
        let frame_groesse = config.frame_groesse.max(1);

        // Ergebnis des Stream-Oeffnens kommt synchron vom Audio-Thread zurueck
        let (bereit_tx, bereit_rx) = std::sync::mpsc::sync_channel::<SessionResult<()>>(1);

        let thread_laeuft = Arc::clone(&laeuft);
        std::thread::Builder::new()
            .name("medien-audio".to_string())
            .spawn(move || {
                let (strom, mut consumer) = match oeffne_standard_erfassung(erfassungs_config) {
                    Ok(paar) => paar,
                    Err(e) => {
                        let _ = bereit_tx.send(Err(SessionError::MedienZugriff(e.to_string())));
                        return;
                    }
                };
                let _ = bereit_tx.send(Ok(()));
                debug!(
                    quell_rate = strom.quell_rate(),
                    kanaele = strom.kanaele(),
                    ziel_rate = strom.config().ziel_abtastrate,
                    "Mikrofon-Erfassung laeuft"
                );

                let mut frame = Vec::with_capacity(frame_groesse);
                let mut temp = vec![0.0f32; frame_groesse];

                // _strom haelt den cpal-Stream am Leben bis laeuft=false
                let _strom = strom;
                while thread_laeuft.load(Ordering::Relaxed) {
                    let gelesen = consumer.pop_slice(&mut temp);
                    if gelesen == 0 {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        continue;
                    }
                    frame.extend_from_slice(&temp[..gelesen]);

                    while frame.len() >= frame_groesse {
                        let samples: Vec<f32> = frame.drain(..frame_groesse).collect();
                        let pcm = f32_zu_pcm(&samples);
                        if frame_tx.blocking_send(pcm).is_err() {
                            // Sitzung hat den Empfang beendet
                            return;
                        }
                    }
                }
                debug!("Medien-Thread beendet, cpal-Stream wird gedroppt");
            })
            .map_err(|e| SessionError::MedienZugriff(e.to_string()))?;

        match bereit_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SessionError::MedienZugriff(
                    "Medien-Thread ohne Rueckmeldung beendet".into(),
                ))
            }
        }

        let freigabe_laeuft = laeuft;
        Ok(MedienStrom::mit_freigabe(frame_rx, move || {
            freigabe_laeuft.store(false, Ordering::Relaxed);
        }))
    }
}

// ---------------------------------------------------------------------------
// SimulierteMedienQuelle
// ---------------------------------------------------------------------------

/// Simulierte Medien-Quelle fuer Tests und den Demo-Modus
///
/// Kann Zugriff verweigern oder einen leeren Frame-Strom liefern, dessen
/// Sender vom Test gehalten wird.
pub struct SimulierteMedienQuelle {
    verweigern: AtomicBool,
    freigaben: Arc<AtomicBool>,
}

impl Default for SimulierteMedienQuelle {
    fn default() -> Self {
        Self::neu()
    }
}

impl SimulierteMedienQuelle {
    pub fn neu() -> Self {
        Self {
            verweigern: AtomicBool::new(false),
            freigaben: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Laesst alle folgenden `erwerben()`-Aufrufe fehlschlagen
    pub fn zugriff_verweigern(&self) {
        self.verweigern.store(true, Ordering::Relaxed);
    }

    /// Wurde der gelieferte Strom freigegeben?
    pub fn wurde_freigegeben(&self) -> bool {
        self.freigaben.load(Ordering::Relaxed)
    }
}

impl MedienQuelle for SimulierteMedienQuelle {
    fn erwerben(&self, config: &MedienConfig) -> SessionResult<MedienStrom> {
        if self.verweigern.load(Ordering::Relaxed) {
            warn!("Simulierter Medienzugriff verweigert");
            return Err(SessionError::MedienZugriff(
                "Zugriff simuliert verweigert".into(),
            ));
        }
        if !config.mikrofon {
            return Err(SessionError::MedienZugriff(
                "Sitzung ohne Mikrofon-Spur angefordert".into(),
            ));
        }

        // Sender wird sofort gedroppt: leerer, aber gueltiger Frame-Strom
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let freigaben = Arc::clone(&self.freigaben);
        Ok(MedienStrom::mit_freigabe(rx, move || {
            freigaben.store(true, Ordering::Relaxed);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medien_config_default() {
        let config = MedienConfig::default();
        assert!(config.mikrofon);
        assert!(!config.kamera);
        assert_eq!(config.abtastrate, 16_000);
        assert_eq!(config.frame_groesse, 1_600);
    }

    #[test]
    fn verweigerter_zugriff_ist_fehler() {
        let quelle = SimulierteMedienQuelle::neu();
        quelle.zugriff_verweigern();
        let result = quelle.erwerben(&MedienConfig::default());
        assert!(matches!(result, Err(SessionError::MedienZugriff(_))));
    }

    #[test]
    fn freigeben_ist_idempotent() {
        let quelle = SimulierteMedienQuelle::neu();
        let mut strom = quelle.erwerben(&MedienConfig::default()).unwrap();
        assert!(!quelle.wurde_freigegeben());
        strom.freigeben();
        strom.freigeben();
        assert!(quelle.wurde_freigegeben());
    }

    #[test]
    fn drop_gibt_frei() {
        let quelle = SimulierteMedienQuelle::neu();
        {
            let _strom = quelle.erwerben(&MedienConfig::default()).unwrap();
        }
        assert!(quelle.wurde_freigegeben());
    }
}
