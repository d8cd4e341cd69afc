//! mahi-audio – Audio-Engine fuer Mahi Live
//!
//! Enthaelt den PCM-Codec (base64 <-> Bytes <-> f32-Samples, WAV-Container),
//! den Abspiel-Planer fuer lueckenloses Scheduling eingehender Audio-Chunks
//! und die cpal-Anbindung fuer Ausgabe und Mikrofon-Capture.
//!
//! Die Planer-Logik ist ueber das [`senke::AusgabeSenke`]-Trait von der
//! Hardware entkoppelt und damit ohne Audio-Geraet testbar.

pub mod erfassung;
pub mod error;
pub mod pcm;
pub mod planer;
pub mod senke;

mod cpal_senke;

pub use cpal_senke::{
    oeffne_ausgabe_strom, oeffne_standard_ausgabe, AusgabeStrom, CpalSenke, CpalSenkenConfig,
};
pub use error::{AudioError, AudioResult};
pub use pcm::DekodierterPuffer;
pub use planer::AbspielPlaner;
pub use senke::{AbspielHandle, AusgabeSenke, SimulierteSenke};
