//! mahi-session – Live-Sitzungs-Steuerung fuer Mahi Live
//!
//! Verbindet Medien-Erwerb, Duplex-Kanal und Abspiel-Planer zu einer
//! Sitzungs-Zustandsmaschine (Standby -> Verbindet -> Live -> Beendet /
//! Fehler). Der Kanal zur Gegenstelle ist hinter [`kanal::DuplexKanal`]
//! abstrahiert; mitgeliefert sind eine Gemini-Live-Implementierung und
//! ein simulierter Kanal fuer Tests und den Demo-Modus.

pub mod controller;
pub mod error;
pub mod gemini;
pub mod kanal;
pub mod medien;
pub mod simuliert;

pub use controller::{LiveSession, LiveSessionConfig};
pub use error::{SessionError, SessionResult};
pub use gemini::GeminiLiveKanal;
pub use kanal::{AntwortModalitaet, DuplexKanal, KanalConfig, KanalEreignis, KanalHandle};
pub use medien::{MedienConfig, MedienQuelle, MedienStrom, MikrofonQuelle, SimulierteMedienQuelle};
pub use simuliert::SimulierterKanal;
