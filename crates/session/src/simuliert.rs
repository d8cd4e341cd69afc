//! Simulierter Duplex-Kanal fuer Tests und den Demo-Modus
//!
//! Ereignisse werden von aussen eingespeist statt von einer Gegenstelle
//! empfangen; gesendetes Audio wird protokolliert.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{SessionError, SessionResult};
use crate::kanal::{DuplexKanal, KanalConfig, KanalEreignis, KanalHandle};

#[derive(Default)]
struct SimKanalZustand {
    /// Sender des aktuell offenen Ereignis-Stroms
    ereignis_tx: Mutex<Option<mpsc::Sender<KanalEreignis>>>,
    /// Protokoll aller aufwaerts gesendeten PCM-Frames
    gesendet: Mutex<Vec<Vec<u8>>>,
    /// Zuletzt verwendete Kanal-Konfiguration
    config: Mutex<Option<KanalConfig>>,
    oeffnen_schlaegt_fehl: AtomicBool,
    /// Kuenstliche Handshake-Dauer fuer `oeffnen()`
    oeffnen_verzoegerung: Mutex<Option<Duration>>,
    geoeffnet: AtomicUsize,
    geschlossen: AtomicBool,
}

/// Simulierter Kanal – Skript statt Netzwerk
#[derive(Default)]
pub struct SimulierterKanal {
    zustand: Arc<SimKanalZustand>,
}

impl SimulierterKanal {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Laesst den naechsten `oeffnen()`-Aufruf fehlschlagen
    pub fn oeffnen_fehlschlagen(&self) {
        self.zustand.oeffnen_schlaegt_fehl.store(true, Ordering::Relaxed);
    }

    /// Verzoegert folgende `oeffnen()`-Aufrufe um einen Handshake
    pub fn oeffnen_verzoegern(&self, dauer: Duration) {
        *self.zustand.oeffnen_verzoegerung.lock() = Some(dauer);
    }

    /// Speist ein Abwaerts-Ereignis in den offenen Kanal ein
    ///
    /// Panik im Testkontext wenn kein Kanal offen ist.
    pub async fn ereignis_einspeisen(&self, ereignis: KanalEreignis) {
        let tx = self
            .zustand
            .ereignis_tx
            .lock()
            .clone()
            .expect("Kanal ist nicht geoeffnet");
        tx.send(ereignis).await.expect("Ereignis-Strom geschlossen");
    }

    /// Wie oft wurde der Kanal geoeffnet?
    pub fn geoeffnet_anzahl(&self) -> usize {
        self.zustand.geoeffnet.load(Ordering::Relaxed)
    }

    /// Wurde der Kanal per Handle geschlossen?
    pub fn wurde_geschlossen(&self) -> bool {
        self.zustand.geschlossen.load(Ordering::Relaxed)
    }

    /// Anzahl aufwaerts gesendeter PCM-Frames
    pub fn gesendete_frames(&self) -> usize {
        self.zustand.gesendet.lock().len()
    }

    /// Beim Oeffnen verwendete Konfiguration
    pub fn verwendete_config(&self) -> Option<KanalConfig> {
        self.zustand.config.lock().clone()
    }
}

struct SimHandle {
    zustand: Arc<SimKanalZustand>,
}

#[async_trait]
impl KanalHandle for SimHandle {
    async fn sende_audio(&self, pcm: &[u8]) -> SessionResult<()> {
        self.zustand.gesendet.lock().push(pcm.to_vec());
        Ok(())
    }

    async fn schliessen(&self) {
        self.zustand.geschlossen.store(true, Ordering::Relaxed);
        // Ereignis-Strom beenden, der Konsument sieht das Stream-Ende
        self.zustand.ereignis_tx.lock().take();
    }
}

#[async_trait]
impl DuplexKanal for SimulierterKanal {
    async fn oeffnen(
        &self,
        config: KanalConfig,
    ) -> SessionResult<(Box<dyn KanalHandle>, mpsc::Receiver<KanalEreignis>)> {
        let verzoegerung = *self.zustand.oeffnen_verzoegerung.lock();
        if let Some(dauer) = verzoegerung {
            tokio::time::sleep(dauer).await;
        }

        if self.zustand.oeffnen_schlaegt_fehl.swap(false, Ordering::Relaxed) {
            return Err(SessionError::Kanal("Verbindung simuliert abgelehnt".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.zustand.ereignis_tx.lock() = Some(tx);
        *self.zustand.config.lock() = Some(config);
        self.zustand.geoeffnet.fetch_add(1, Ordering::Relaxed);
        self.zustand.geschlossen.store(false, Ordering::Relaxed);

        Ok((
            Box::new(SimHandle {
                zustand: Arc::clone(&self.zustand),
            }),
            rx,
        ))
    }
}
