//! Abspiel-Planer – lueckenloses Scheduling eingehender Audio-Chunks
//!
//! Der Planer besitzt die einzige Timing-Autoritaet der Wiedergabe:
//! `naechste_startzeit` rueckt mit jeder eingereihten Pufferdauer vor und
//! wird nur bei einer Unterbrechung (Barge-in) zurueckgesetzt. Kein anderes
//! Modul plant Audio direkt auf der Senke.
//!
//! Invariante: vor jedem Einreihen gilt
//! `start = max(naechste_startzeit, senke.jetzt())` – geplante Startzeiten
//! sind monoton nicht-fallend und liegen nie vor der Ausgabe-Uhr.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::AudioResult;
use crate::pcm::DekodierterPuffer;
use crate::senke::{AbspielHandle, AusgabeSenke};

/// Eintrag im Handle-Register
#[derive(Debug, Clone, Copy)]
struct PlanEintrag {
    start: f64,
    dauer: f64,
}

/// Abspiel-Planer ueber einer Ausgabe-Senke
///
/// Thread-safe: das Handle-Register ist eine DashMap, die Startzeit liegt
/// hinter einem Mutex. Entfernen von Handles ist idempotent – natuerliches
/// Ende und erzwungener Stopp duerfen sich ueberschneiden, ohne dass ein
/// Handle doppelt abgeraeumt wird.
pub struct AbspielPlaner {
    senke: Arc<dyn AusgabeSenke>,
    /// Naechster geplanter Startzeitpunkt (Sekunden, Uhr-Bereich der Senke)
    naechste_startzeit: Mutex<f64>,
    /// Register aller geplanten bzw. spielenden Handles
    aktive: DashMap<AbspielHandle, PlanEintrag>,
    /// Monoton steigender Handle-Zaehler
    naechste_id: AtomicU64,
}

impl AbspielPlaner {
    /// Erstellt einen neuen Planer ueber der gegebenen Senke
    pub fn neu(senke: Arc<dyn AusgabeSenke>) -> Self {
        let start = senke.jetzt();
        Self {
            senke,
            naechste_startzeit: Mutex::new(start),
            aktive: DashMap::new(),
            naechste_id: AtomicU64::new(1),
        }
    }

    /// Reiht einen dekodierten Puffer luecken- und ueberlappungsfrei ein
    ///
    /// Nicht-blockierend: das Handle kommt sofort zurueck, die Wiedergabe
    /// laeuft asynchron auf der Ausgabe-Uhr. Schlaegt die Senke fehl, wird
    /// die Startzeit NICHT vorgerueckt – ein stilles Wiederholen wuerde die
    /// Timing-Autoritaet desynchronisieren, der Fehler gehoert nach oben.
    pub fn einreihen(&self, puffer: DekodierterPuffer) -> AudioResult<AbspielHandle> {
        self.beendete_abraeumen();

        let dauer = puffer.dauer();
        let mut naechste = self.naechste_startzeit.lock();
        let start = naechste.max(self.senke.jetzt());
        let handle = AbspielHandle(self.naechste_id.fetch_add(1, Ordering::Relaxed));

        self.senke.starten(handle, puffer, start)?;
        *naechste = start + dauer;
        drop(naechste);

        self.aktive.insert(handle, PlanEintrag { start, dauer });
        trace!(%handle, start, dauer, "Puffer eingereiht");
        Ok(handle)
    }

    /// Bricht alle geplanten und laufenden Wiedergaben sofort ab
    ///
    /// Wird beim Barge-in-Signal des Servers aufgerufen: alles in der Luft
    /// befindliche synthetisierte Audio ist veraltet. Setzt die Startzeit
    /// auf die aktuelle Uhrzeit zurueck, damit der naechste Chunk (neuer
    /// Turn) unmittelbar beginnen kann. Niemals ein Fehler.
    pub fn unterbrechen(&self) {
        self.beendete_abraeumen();

        let anzahl = self.aktive.len();
        for eintrag in self.aktive.iter() {
            self.senke.stoppen(*eintrag.key());
        }
        self.aktive.clear();
        *self.naechste_startzeit.lock() = self.senke.jetzt();

        if anzahl > 0 {
            debug!(gestoppt = anzahl, "Wiedergabe unterbrochen");
        }
    }

    /// Anzahl ausstehender (geplanter oder spielender) Puffer
    pub fn ausstehend(&self) -> usize {
        self.beendete_abraeumen();
        self.aktive.len()
    }

    /// Naechster geplanter Startzeitpunkt in Sekunden
    pub fn geplante_startzeit(&self) -> f64 {
        *self.naechste_startzeit.lock()
    }

    /// Entfernt natuerlich beendete Handles aus dem Register
    ///
    /// Idempotent: ein Handle, das bereits durch `unterbrechen()` entfernt
    /// wurde, wird hier stillschweigend uebersprungen.
    fn beendete_abraeumen(&self) {
        for handle in self.senke.beendete() {
            if self.aktive.remove(&handle).is_some() {
                trace!(%handle, "Wiedergabe natuerlich beendet");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
