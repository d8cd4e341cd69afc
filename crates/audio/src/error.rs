//! Fehlertypen fuer die Audio-Engine

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Engine
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Ungueltige base64-Payload: {0}")]
    Base64Ungueltig(String),

    #[error("PCM-Payload hat ungerade Laenge: {0} Bytes")]
    UngeradePcmLaenge(usize),

    #[error("Ungueltiger WAV-Container: {0}")]
    WavUngueltig(String),

    #[error("Ausgabegeraet nicht verfuegbar: {0}")]
    AusgabeGeraet(String),

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
