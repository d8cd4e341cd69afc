//! Session-Statusmodell
//!
//! Genau eine Instanz pro Live-Session. Uebergaenge werden ausschliesslich
//! vom Session-Controller getrieben (Benutzeraktion oder Kanal-Ereignis),
//! es gibt keine konkurrierenden Schreiber.

use serde::{Deserialize, Serialize};

/// Zustand einer Live-Session
///
/// Uebergaenge:
/// - `start()`: Standby -> Verbindet -> Live
/// - `stop()` oder Kanal-Schliessung: -> Beendet
/// - Medien- oder Kanal-Fehler: -> Fehler (terminal, expliziter Reset noetig)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Keine Medien, kein Kanal (Ausgangszustand)
    Standby,
    /// Medienerfassung und Kanal-Handshake laufen
    Verbindet,
    /// Kanal offen, bidirektionales Streaming aktiv
    Live,
    /// Sauber beendet (benutzer- oder serverseitig)
    Beendet,
    /// Nicht behebbarer Fehler – erfordert expliziten Reset nach Standby
    Fehler(String),
}

impl SessionStatus {
    /// Gibt true zurueck wenn die Session in einem Endzustand ist
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Beendet | Self::Fehler(_))
    }

    /// Gibt true zurueck wenn die Session laeuft oder gerade aufbaut
    pub fn ist_aktiv(&self) -> bool {
        matches!(self, Self::Verbindet | Self::Live)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standby => write!(f, "standby"),
            Self::Verbindet => write!(f, "verbindet"),
            Self::Live => write!(f, "live"),
            Self::Beendet => write!(f, "beendet"),
            Self::Fehler(grund) => write!(f, "fehler: {}", grund),
        }
    }
}
