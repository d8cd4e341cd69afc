//! PCM-Codec – base64 <-> Bytes <-> f32-Samples, WAV-Container
//!
//! Reine, synchrone und deterministische Transformationen zwischen den drei
//! Audio-Repraesentationen der Live-Pipeline:
//! - base64-Text (so kommt Audio ueber den Kanal)
//! - rohe 16-bit Little-Endian PCM-Bytes (mono)
//! - normalisierte f32-Samples im Bereich [-1.0, 1.0]
//!
//! Der WAV-Container (44-Byte RIFF-Header + Rohdaten) dient dem Export
//! empfangener bzw. synthetisierter Sprache als abspielbare Datei.

use base64::Engine as _;

use crate::error::{AudioError, AudioResult};

/// Abtastrate der Modell-Audioausgabe (beobachtet: 24 kHz mono)
pub const STANDARD_ABTASTRATE: u32 = 24_000;

/// Laenge des RIFF/WAVE-Headers in Bytes
pub const WAV_HEADER_LAENGE: usize = 44;

/// Dekodiert eine base64-Payload zu rohen Bytes
pub fn base64_dekodieren(payload: &str) -> AudioResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| AudioError::Base64Ungueltig(e.to_string()))
}

/// Kodiert rohe Bytes als base64-Payload
pub fn base64_kodieren(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Interpretiert die Bytes als Little-Endian i16 und normalisiert auf f32
///
/// Ausgabelaenge = `bytes.len() / 2`. Ungerade Laengen sind ein Fehler –
/// ein halbes Sample kann nicht sinnvoll interpretiert werden.
pub fn pcm_zu_f32(bytes: &[u8]) -> AudioResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::UngeradePcmLaenge(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|paar| i16::from_le_bytes([paar[0], paar[1]]) as f32 / 32768.0)
        .collect())
}

/// Konvertiert f32-Samples zurueck zu 16-bit Little-Endian PCM-Bytes
///
/// Werte ausserhalb von [-1.0, 1.0] werden hart begrenzt.
pub fn f32_zu_pcm(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let wert = (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&wert.to_le_bytes());
    }
    bytes
}

/// Verpackt rohe PCM-Bytes in einen minimalen WAV-Container
///
/// Der 44-Byte RIFF/WAVE-Header wird byte-genau aus der Payload-Laenge
/// berechnet (Chunk-Groessen, Byte-Rate, Block-Align). Reine Funktion,
/// keine Seiteneffekte.
pub fn wav_verpacken(pcm: &[u8], abtastrate: u32, kanaele: u16, bits_pro_sample: u16) -> Vec<u8> {
    let block_align = kanaele * (bits_pro_sample / 8);
    let byte_rate = abtastrate * block_align as u32;
    let daten_laenge = pcm.len() as u32;

    let mut wav = Vec::with_capacity(WAV_HEADER_LAENGE + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + daten_laenge).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt-Chunk-Laenge
    wav.extend_from_slice(&1u16.to_le_bytes()); // Format 1 = PCM
    wav.extend_from_slice(&kanaele.to_le_bytes());
    wav.extend_from_slice(&abtastrate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_pro_sample.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&daten_laenge.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// WAV-Container fuer die Modell-Audioausgabe: mono, 16 bit
pub fn wav_mono16(pcm: &[u8], abtastrate: u32) -> Vec<u8> {
    wav_verpacken(pcm, abtastrate, 1, 16)
}

/// Extrahiert die PCM-Payload aus einem WAV-Container
///
/// Liest die im Header deklarierte Datenlaenge und gibt exakt diese Bytes
/// zurueck. Prueft RIFF/WAVE-Kennungen und Laengenkonsistenz.
pub fn wav_entpacken(wav: &[u8]) -> AudioResult<&[u8]> {
    if wav.len() < WAV_HEADER_LAENGE {
        return Err(AudioError::WavUngueltig(format!(
            "Container zu kurz: {} Bytes",
            wav.len()
        )));
    }
    if &wav[0..4] != b"RIFF" {
        return Err(AudioError::WavUngueltig("RIFF-Kennung fehlt".into()));
    }
    if &wav[8..12] != b"WAVE" {
        return Err(AudioError::WavUngueltig("WAVE-Kennung fehlt".into()));
    }

    let daten_laenge =
        u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]) as usize;
    let ende = WAV_HEADER_LAENGE + daten_laenge;
    if wav.len() < ende {
        return Err(AudioError::WavUngueltig(format!(
            "Deklarierte Datenlaenge {} uebersteigt Container",
            daten_laenge
        )));
    }

    Ok(&wav[WAV_HEADER_LAENGE..ende])
}

// ---------------------------------------------------------------------------
// DekodierterPuffer
// ---------------------------------------------------------------------------

/// Ein dekodierter Audio-Chunk: normalisierte f32-Samples plus Abtastrate
///
/// Gehoert nach dem Einreihen dem Abspiel-Planer bis das Playback endet.
#[derive(Debug, Clone)]
pub struct DekodierterPuffer {
    /// Normalisierte Samples im Bereich [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Abtastrate in Hz
    pub abtastrate: u32,
}

impl DekodierterPuffer {
    /// Erstellt einen Puffer aus rohen PCM-Bytes
    pub fn aus_pcm_bytes(bytes: &[u8], abtastrate: u32) -> AudioResult<Self> {
        Ok(Self {
            samples: pcm_zu_f32(bytes)?,
            abtastrate,
        })
    }

    /// Erstellt einen Puffer direkt aus einer base64-Payload
    pub fn aus_base64(payload: &str, abtastrate: u32) -> AudioResult<Self> {
        let bytes = base64_dekodieren(payload)?;
        Self::aus_pcm_bytes(&bytes, abtastrate)
    }

    /// Abspieldauer in Sekunden
    pub fn dauer(&self) -> f64 {
        self.samples.len() as f64 / self.abtastrate as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_laenge_und_wertebereich() {
        // Extremwerte: i16::MIN, 0, i16::MAX
        let bytes: Vec<u8> = [i16::MIN, 0, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let samples = pcm_zu_f32(&bytes).unwrap();
        assert_eq!(samples.len(), bytes.len() / 2);
        for s in &samples {
            assert!((-1.0..=1.0).contains(s), "Sample ausserhalb [-1,1]: {}", s);
        }
        assert!((samples[0] - (-1.0)).abs() < f32::EPSILON);
        assert!(samples[1].abs() < f32::EPSILON);
    }

    #[test]
    fn pcm_ungerade_laenge_fehler() {
        for laenge in [1usize, 3, 5, 999] {
            let bytes = vec![0u8; laenge];
            let result = pcm_zu_f32(&bytes);
            assert!(matches!(
                result,
                Err(AudioError::UngeradePcmLaenge(l)) if l == laenge
            ));
        }
    }

    #[test]
    fn pcm_leere_eingabe() {
        assert!(pcm_zu_f32(&[]).unwrap().is_empty());
    }

    #[test]
    fn pcm_skalierung_exakt() {
        // 16384 / 32768 = 0.5
        let bytes = 16384i16.to_le_bytes().to_vec();
        let samples = pcm_zu_f32(&bytes).unwrap();
        assert!((samples[0] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn base64_roundtrip() {
        let original = vec![0u8, 1, 2, 254, 255];
        let payload = base64_kodieren(&original);
        let zurueck = base64_dekodieren(&payload).unwrap();
        assert_eq!(original, zurueck);
    }

    #[test]
    fn base64_ungueltig_fehler() {
        let result = base64_dekodieren("das ist kein base64 !!!");
        assert!(matches!(result, Err(AudioError::Base64Ungueltig(_))));
    }

    #[test]
    fn wav_header_byte_exakt() {
        let pcm = vec![0u8; 480];
        let wav = wav_mono16(&pcm, STANDARD_ABTASTRATE);

        assert_eq!(wav.len(), WAV_HEADER_LAENGE + pcm.len());
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let riff_laenge = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]);
        assert_eq!(riff_laenge, 36 + pcm.len() as u32);

        // fmt-Chunk: Laenge 16, Format PCM, mono, 24kHz, 16 bit
        assert_eq!(u32::from_le_bytes([wav[16], wav[17], wav[18], wav[19]]), 16);
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(
            u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]),
            STANDARD_ABTASTRATE
        );
        // Byte-Rate = 24000 * 1 Kanal * 2 Bytes
        assert_eq!(
            u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]),
            STANDARD_ABTASTRATE * 2
        );
        // Block-Align = 2, Bits = 16
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 2);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);

        let daten_laenge = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(daten_laenge, pcm.len() as u32);
    }

    #[test]
    fn wav_roundtrip() {
        let pcm: Vec<u8> = (0..=255u8).cycle().take(960).collect();
        let wav = wav_mono16(&pcm, STANDARD_ABTASTRATE);
        let entpackt = wav_entpacken(&wav).unwrap();
        assert_eq!(entpackt, &pcm[..]);
    }

    #[test]
    fn wav_leere_payload() {
        let wav = wav_mono16(&[], STANDARD_ABTASTRATE);
        assert_eq!(wav.len(), WAV_HEADER_LAENGE);
        assert!(wav_entpacken(&wav).unwrap().is_empty());
    }

    #[test]
    fn wav_entpacken_fehlerfaelle() {
        assert!(matches!(
            wav_entpacken(&[0u8; 10]),
            Err(AudioError::WavUngueltig(_))
        ));

        let mut kaputt = wav_mono16(&[0u8; 4], STANDARD_ABTASTRATE);
        kaputt[0] = b'X'; // RIFF-Kennung zerstoeren
        assert!(matches!(
            wav_entpacken(&kaputt),
            Err(AudioError::WavUngueltig(_))
        ));

        // Deklarierte Laenge groesser als der Container
        let mut zu_lang = wav_mono16(&[0u8; 4], STANDARD_ABTASTRATE);
        zu_lang[40] = 0xFF;
        assert!(matches!(
            wav_entpacken(&zu_lang),
            Err(AudioError::WavUngueltig(_))
        ));
    }

    #[test]
    fn f32_pcm_roundtrip() {
        let samples = vec![-1.0f32, -0.5, 0.0, 0.25, 0.99];
        let bytes = f32_zu_pcm(&samples);
        let zurueck = pcm_zu_f32(&bytes).unwrap();
        assert_eq!(zurueck.len(), samples.len());
        for (a, b) in samples.iter().zip(zurueck.iter()) {
            assert!((a - b).abs() < 1.0 / 32768.0 + f32::EPSILON);
        }
    }

    #[test]
    fn puffer_dauer() {
        // 24000 Samples bei 24kHz = 1 Sekunde
        let bytes = vec![0u8; 48000];
        let puffer = DekodierterPuffer::aus_pcm_bytes(&bytes, STANDARD_ABTASTRATE).unwrap();
        assert_eq!(puffer.samples.len(), 24000);
        assert!((puffer.dauer() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn puffer_aus_base64() {
        let bytes: Vec<u8> = [100i16, -100, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let payload = base64_kodieren(&bytes);
        let puffer = DekodierterPuffer::aus_base64(&payload, STANDARD_ABTASTRATE).unwrap();
        assert_eq!(puffer.samples.len(), 3);
    }
}
