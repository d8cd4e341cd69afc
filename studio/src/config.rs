//! Studio-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Studio ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};

/// Vollstaendige Studio-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StudioConfig {
    /// Sitzungs-Einstellungen (Modell, Anweisung, Modalitaet)
    pub sitzung: SitzungsEinstellungen,
    /// Audio-Einstellungen (Abtastraten, Frame-Groesse)
    pub audio: AudioEinstellungen,
    /// Mitschnitt-Einstellungen
    pub aufnahme: AufnahmeEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Sitzungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitzungsEinstellungen {
    /// Modellname der Gegenstelle
    pub modell: String,
    /// Feste System-Anweisung der Sitzung
    pub system_anweisung: String,
    /// Antwort-Modalitaet: "audio" oder "text"
    pub modalitaet: String,
    /// Umgebungsvariable mit dem API-Schluessel
    pub api_schluessel_env: String,
    /// Demo-Modus: simulierter Kanal statt echter Gegenstelle
    pub demo: bool,
}

impl Default for SitzungsEinstellungen {
    fn default() -> Self {
        Self {
            modell: "models/gemini-2.5-flash-native-audio-preview".into(),
            system_anweisung: "Du bist ein hilfreicher Sprachassistent.".into(),
            modalitaet: "audio".into(),
            api_schluessel_env: "GEMINI_API_KEY".into(),
            demo: false,
        }
    }
}

/// Audio-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Abtastrate des Mikrofon-Pfads in Hz
    pub eingabe_abtastrate: u32,
    /// Abtastrate des Wiedergabe-Pfads in Hz
    pub ausgabe_abtastrate: u32,
    /// Frame-Groesse der Mikrofon-Chunks in Samples
    pub frame_groesse: usize,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            eingabe_abtastrate: 16_000,
            ausgabe_abtastrate: 24_000,
            frame_groesse: 1_600,
        }
    }
}

/// Mitschnitt-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AufnahmeEinstellungen {
    /// Empfangenes Audio mitschneiden
    pub aktiviert: bool,
    /// Zieldatei fuer den WAV-Export
    pub pfad: String,
}

impl Default for AufnahmeEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            pfad: "mitschnitt.wav".into(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl StudioConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = StudioConfig::default();
        assert_eq!(cfg.audio.eingabe_abtastrate, 16_000);
        assert_eq!(cfg.audio.ausgabe_abtastrate, 24_000);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.sitzung.demo);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [sitzung]
            modell = "models/test"
            demo = true

            [aufnahme]
            aktiviert = true
        "#;
        let cfg: StudioConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.sitzung.modell, "models/test");
        assert!(cfg.sitzung.demo);
        assert!(cfg.aufnahme.aktiviert);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.audio.frame_groesse, 1_600);
    }
}
