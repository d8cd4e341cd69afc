//! Mahi Live Studio – verdrahtet die Live-Sitzung Ende zu Ende
//!
//! Mikrofon -> Duplex-Kanal -> Abspiel-Planer -> Lautsprecher. Im
//! Demo-Modus ersetzen simulierter Kanal, simulierte Medien und
//! simulierte Senke das Netzwerk und die Audio-Hardware.

pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use mahi_audio::{
    oeffne_standard_ausgabe, AbspielPlaner, AusgabeSenke, CpalSenke, CpalSenkenConfig,
    SimulierteSenke,
};
use mahi_session::{
    AntwortModalitaet, GeminiLiveKanal, KanalConfig, KanalEreignis, LiveSession,
    LiveSessionConfig, MedienConfig, MikrofonQuelle, SimulierteMedienQuelle, SimulierterKanal,
};
use tracing::{info, warn};

use crate::config::StudioConfig;

/// Studio: baut aus der Konfiguration eine lauffaehige Sitzung
pub struct Studio {
    config: StudioConfig,
}

impl Studio {
    pub fn neu(config: StudioConfig) -> Self {
        Self { config }
    }

    /// Fuehrt die Sitzung aus bis Ctrl+C oder einem terminalen Zustand
    pub async fn starten(&self) -> Result<()> {
        if self.config.sitzung.demo {
            self.demo_ausfuehren().await
        } else {
            self.live_ausfuehren().await
        }
    }

    fn sitzungs_config(&self) -> Result<LiveSessionConfig> {
        let modalitaet = match self.config.sitzung.modalitaet.as_str() {
            "audio" => AntwortModalitaet::Audio,
            "text" => AntwortModalitaet::Text,
            andere => return Err(anyhow!("Unbekannte Modalitaet '{andere}'")),
        };
        Ok(LiveSessionConfig {
            kanal: KanalConfig {
                modell: self.config.sitzung.modell.clone(),
                system_anweisung: self.config.sitzung.system_anweisung.clone(),
                modalitaet,
                eingabe_abtastrate: self.config.audio.eingabe_abtastrate,
                ausgabe_abtastrate: self.config.audio.ausgabe_abtastrate,
            },
            medien: MedienConfig {
                mikrofon: true,
                kamera: false,
                abtastrate: self.config.audio.eingabe_abtastrate,
                frame_groesse: self.config.audio.frame_groesse,
            },
            aufnahme: self.config.aufnahme.aktiviert,
        })
    }

    // -----------------------------------------------------------------------
    // Live-Modus (echte Hardware, echte Gegenstelle)
    // -----------------------------------------------------------------------

    async fn live_ausfuehren(&self) -> Result<()> {
        let api_schluessel = std::env::var(&self.config.sitzung.api_schluessel_env)
            .with_context(|| {
                format!(
                    "Umgebungsvariable {} nicht gesetzt",
                    self.config.sitzung.api_schluessel_env
                )
            })?;

        let (senke, audio_laeuft) =
            ausgabe_senke_starten(self.config.audio.ausgabe_abtastrate)?;
        let planer = Arc::new(AbspielPlaner::neu(
            Arc::new(senke) as Arc<dyn AusgabeSenke>
        ));

        let session = LiveSession::neu(
            Arc::new(GeminiLiveKanal::neu(api_schluessel)),
            Arc::new(MikrofonQuelle::neu()),
            Arc::clone(&planer),
            self.sitzungs_config()?,
        );

        session.starten().await?;
        self.bis_ende_begleiten(&session).await;

        session.stoppen().await;
        audio_laeuft.store(false, Ordering::Relaxed);
        self.aufnahme_exportieren(&session)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Demo-Modus (alles simuliert, kein Netz, keine Hardware)
    // -----------------------------------------------------------------------

    async fn demo_ausfuehren(&self) -> Result<()> {
        info!("Demo-Modus: simulierter Kanal, simulierte Medien und Senke");

        let kanal = Arc::new(SimulierterKanal::neu());
        let senke = Arc::new(SimulierteSenke::neu());
        let planer = Arc::new(AbspielPlaner::neu(
            Arc::clone(&senke) as Arc<dyn AusgabeSenke>
        ));

        let session = LiveSession::neu(
            Arc::clone(&kanal) as Arc<dyn mahi_session::DuplexKanal>,
            Arc::new(SimulierteMedienQuelle::neu()),
            Arc::clone(&planer),
            self.sitzungs_config()?,
        );
        session.starten().await?;

        // Simulierte Uhr laeuft in Echtzeit mit
        let uhr_senke = Arc::clone(&senke);
        let uhr_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                uhr_senke.zeit_vorruecken(0.05);
            }
        });

        // Gescripteter Modell-Zug: zwei Chunks, Abschluss, Schliessung
        let rate = self.config.audio.ausgabe_abtastrate;
        kanal.ereignis_einspeisen(demo_chunk(rate, 300)).await;
        kanal.ereignis_einspeisen(demo_chunk(rate, 200)).await;
        kanal
            .ereignis_einspeisen(KanalEreignis::ZugAbgeschlossen)
            .await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        kanal.ereignis_einspeisen(KanalEreignis::Geschlossen).await;

        self.bis_ende_begleiten(&session).await;
        uhr_task.abort();
        session.stoppen().await;
        self.aufnahme_exportieren(&session)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Gemeinsames
    // -----------------------------------------------------------------------

    /// Protokolliert Zustandswechsel und wartet auf Ctrl+C oder Terminal
    async fn bis_ende_begleiten(&self, session: &LiveSession) {
        let mut status_rx = session.status_beobachten();
        loop {
            let status = status_rx.borrow_and_update().clone();
            info!(status = %status, "Sitzungs-Zustand");
            if status.ist_terminal() {
                return;
            }
            tokio::select! {
                geaendert = status_rx.changed() => {
                    if geaendert.is_err() {
                        return;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C, Sitzung wird gestoppt");
                    return;
                }
            }
        }
    }

    fn aufnahme_exportieren(&self, session: &LiveSession) -> Result<()> {
        if !self.config.aufnahme.aktiviert {
            return Ok(());
        }
        match session.aufnahme_als_wav() {
            Some(wav) => {
                std::fs::write(&self.config.aufnahme.pfad, &wav).with_context(|| {
                    format!("Mitschnitt '{}' nicht schreibbar", self.config.aufnahme.pfad)
                })?;
                info!(
                    pfad = %self.config.aufnahme.pfad,
                    bytes = wav.len(),
                    "Mitschnitt exportiert"
                );
            }
            None => warn!("Kein Mitschnitt vorhanden, nichts exportiert"),
        }
        Ok(())
    }
}

/// Startet den Ausgabe-Thread und liefert die klonbare Senke zurueck
///
/// Der cpal-Stream ist !Send und bleibt auf dem Thread am Leben, bis das
/// Laeuft-Flag geloescht wird.
fn ausgabe_senke_starten(abtastrate: u32) -> Result<(CpalSenke, Arc<AtomicBool>)> {
    let (bereit_tx, bereit_rx) =
        std::sync::mpsc::sync_channel::<std::result::Result<CpalSenke, mahi_audio::AudioError>>(1);
    let laeuft = Arc::new(AtomicBool::new(true));
    let thread_laeuft = Arc::clone(&laeuft);

    std::thread::Builder::new()
        .name("studio-audio".to_string())
        .spawn(move || {
            let config = CpalSenkenConfig {
                abtastrate,
                kanaele: 1,
            };
            let (strom, senke) = match oeffne_standard_ausgabe(config) {
                Ok(paar) => paar,
                Err(e) => {
                    let _ = bereit_tx.send(Err(e));
                    return;
                }
            };
            let _ = bereit_tx.send(Ok(senke));

            // _strom haelt den cpal-Stream am Leben
            let _strom = strom;
            while thread_laeuft.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
            }
        })
        .context("Audio-Thread konnte nicht gestartet werden")?;

    let senke = bereit_rx
        .recv()
        .context("Audio-Thread ohne Rueckmeldung beendet")??;
    Ok((senke, laeuft))
}

/// Base64-PCM-Chunk mit einem 440Hz-Ton fuer den Demo-Modus
fn demo_chunk(abtastrate: u32, ms: u64) -> KanalEreignis {
    let anzahl = (abtastrate as u64 * ms / 1000) as usize;
    let samples: Vec<f32> = (0..anzahl)
        .map(|i| {
            let t = i as f32 / abtastrate as f32;
            0.2 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    KanalEreignis::AudioChunk {
        base64: mahi_audio::pcm::base64_kodieren(&mahi_audio::pcm::f32_zu_pcm(&samples)),
    }
}
