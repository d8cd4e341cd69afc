//! mahi-core – Gemeinsame Typen fuer Mahi Live
//!
//! Enthaelt die Identifikationstypen und das Session-Statusmodell,
//! die von allen anderen Crates geteilt werden.

pub mod status;
pub mod types;

pub use status::SessionStatus;
pub use types::SessionId;
