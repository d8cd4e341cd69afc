//! Fehlertypen der Sitzungs-Schicht

use mahi_core::SessionStatus;
use thiserror::Error;

/// Fehler der Live-Sitzung
///
/// Medien- und Kanal-Fehler sind sitzungs-fatal: die Sitzung wechselt in
/// den Fehler-Zustand und muss explizit zurueckgesetzt werden. Codec-Fehler
/// einzelner Chunks tauchen hier nicht auf, die bleiben chunk-lokal.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Zugriff auf Mikrofon/Kamera wurde verweigert oder schlug fehl
    #[error("Medienzugriff verweigert: {0}")]
    MedienZugriff(String),

    /// Der Duplex-Kanal konnte nicht geoeffnet werden oder brach ab
    #[error("Kanal-Fehler: {0}")]
    Kanal(String),

    /// Fehler aus der Audio-Schicht (Geraet, Codec)
    #[error(transparent)]
    Audio(#[from] mahi_audio::AudioError),

    /// Aktion im falschen Sitzungs-Zustand
    #[error("Aktion '{aktion}' im Zustand {zustand} nicht erlaubt")]
    UngueltigerZustand {
        zustand: SessionStatus,
        aktion: &'static str,
    },

    /// Serialisierung einer Kanal-Nachricht schlug fehl
    #[error("Nachrichten-Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehlermeldungen_deutsch() {
        let e = SessionError::MedienZugriff("kein Geraet".into());
        assert!(e.to_string().contains("Medienzugriff verweigert"));

        let e = SessionError::UngueltigerZustand {
            zustand: SessionStatus::Live,
            aktion: "starten",
        };
        assert!(e.to_string().contains("starten"));
    }

    #[test]
    fn audio_fehler_wird_umhuellt() {
        let audio = mahi_audio::AudioError::UngeradePcmLaenge(3);
        let e: SessionError = audio.into();
        assert!(matches!(e, SessionError::Audio(_)));
    }
}
