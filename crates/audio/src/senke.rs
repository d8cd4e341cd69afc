//! Ausgabe-Senke – Abstraktion ueber Audio-Uhr und Wiedergabegeraet
//!
//! Der Abspiel-Planer spricht nie direkt mit cpal, sondern nur mit diesem
//! Trait. Die Senke besitzt die monotone Ausgabe-Uhr und fuehrt geplante
//! Puffer zum angegebenen Zeitpunkt aus. Damit ist die Planer-Logik ohne
//! Audio-Hardware testbar (siehe [`SimulierteSenke`]).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{AudioError, AudioResult};
use crate::pcm::DekodierterPuffer;

/// Handle auf einen geplanten oder gerade spielenden Puffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbspielHandle(pub u64);

impl std::fmt::Display for AbspielHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "abspiel:{}", self.0)
    }
}

/// Audio-Ausgabe-Senke: Uhr plus Wiedergabe
///
/// Vertrag:
/// - `jetzt()` ist monoton und laeuft in Sekunden im Uhr-Bereich der Senke.
/// - `starten()` plant einen Puffer zum Zeitpunkt `start_zeit`; liegt der
///   Zeitpunkt in der Vergangenheit, beginnt die Wiedergabe sofort.
/// - `stoppen()` ist idempotent – ein bereits beendetes oder unbekanntes
///   Handle wird stillschweigend ignoriert.
/// - `beendete()` liefert (und entfernt) alle Handles, deren Wiedergabe
///   natuerlich geendet hat, seit dem letzten Aufruf.
pub trait AusgabeSenke: Send + Sync {
    /// Aktuelle Zeit der Ausgabe-Uhr in Sekunden
    fn jetzt(&self) -> f64;

    /// Plant einen Puffer zur Wiedergabe ab `start_zeit`
    fn starten(
        &self,
        handle: AbspielHandle,
        puffer: DekodierterPuffer,
        start_zeit: f64,
    ) -> AudioResult<()>;

    /// Stoppt ein Handle sofort (idempotent)
    fn stoppen(&self, handle: AbspielHandle);

    /// Entnimmt alle natuerlich beendeten Handles
    fn beendete(&self) -> Vec<AbspielHandle>;
}

// ---------------------------------------------------------------------------
// SimulierteSenke
// ---------------------------------------------------------------------------

/// Simulierte Ausgabe-Senke mit manuell steuerbarer Uhr
///
/// Fuer Tests und den Demo-Modus ohne Audio-Hardware. Die Uhr laeuft nur
/// durch explizites [`SimulierteSenke::zeit_vorruecken`].
#[derive(Default)]
pub struct SimulierteSenke {
    zustand: Mutex<SimZustand>,
}

#[derive(Default)]
struct SimZustand {
    zeit: f64,
    /// Laufende Wiedergaben: Handle -> (Start, Ende)
    laufende: HashMap<AbspielHandle, (f64, f64)>,
    /// Natuerlich beendete, noch nicht abgeholte Handles
    beendete: Vec<AbspielHandle>,
    /// Protokoll aller Starts: (Handle, Startzeit, Dauer)
    starts: Vec<(AbspielHandle, f64, f64)>,
    /// Protokoll aller erzwungenen Stopps
    stopps: Vec<AbspielHandle>,
    /// Simuliert ein nicht verfuegbares Ausgabegeraet
    geraet_fehlt: bool,
}

impl SimulierteSenke {
    /// Erstellt eine neue Senke mit Uhr auf 0.0
    pub fn neu() -> Self {
        Self::default()
    }

    /// Rueckt die Uhr um `delta` Sekunden vor
    ///
    /// Wiedergaben, deren Ende erreicht wurde, wandern in die Beendet-Liste.
    pub fn zeit_vorruecken(&self, delta: f64) {
        let mut z = self.zustand.lock();
        z.zeit += delta;
        let jetzt = z.zeit;
        let fertig: Vec<AbspielHandle> = z
            .laufende
            .iter()
            .filter(|(_, (_, ende))| *ende <= jetzt)
            .map(|(h, _)| *h)
            .collect();
        for h in fertig {
            z.laufende.remove(&h);
            z.beendete.push(h);
        }
    }

    /// Laesst alle folgenden `starten()`-Aufrufe fehlschlagen
    pub fn geraet_entfernen(&self) {
        self.zustand.lock().geraet_fehlt = true;
    }

    /// Protokoll aller Starts: (Handle, Startzeit, Dauer)
    pub fn starts(&self) -> Vec<(AbspielHandle, f64, f64)> {
        self.zustand.lock().starts.clone()
    }

    /// Protokoll aller erzwungenen Stopps
    pub fn stopps(&self) -> Vec<AbspielHandle> {
        self.zustand.lock().stopps.clone()
    }

    /// Anzahl aktuell laufender Wiedergaben
    pub fn laufende_anzahl(&self) -> usize {
        self.zustand.lock().laufende.len()
    }
}

impl AusgabeSenke for SimulierteSenke {
    fn jetzt(&self) -> f64 {
        self.zustand.lock().zeit
    }

    fn starten(
        &self,
        handle: AbspielHandle,
        puffer: DekodierterPuffer,
        start_zeit: f64,
    ) -> AudioResult<()> {
        let mut z = self.zustand.lock();
        if z.geraet_fehlt {
            return Err(AudioError::AusgabeGeraet("simuliert entfernt".into()));
        }
        let dauer = puffer.dauer();
        z.laufende.insert(handle, (start_zeit, start_zeit + dauer));
        z.starts.push((handle, start_zeit, dauer));
        Ok(())
    }

    fn stoppen(&self, handle: AbspielHandle) {
        let mut z = self.zustand.lock();
        // Idempotent: unbekannte Handles ignorieren
        if z.laufende.remove(&handle).is_some() {
            z.stopps.push(handle);
        }
    }

    fn beendete(&self) -> Vec<AbspielHandle> {
        std::mem::take(&mut self.zustand.lock().beendete)
    }
}
