//! Mikrofon-Erfassung via cpal
//!
//! Eingabegeraete unterstuetzen die 16-kHz-Eingaberate des Duplex-Kanals
//! selten nativ. Der Stream laeuft deshalb in der nativen Konfiguration
//! des Geraets; der Callback mittelt Interleaved-Frames auf Mono, setzt
//! sie linear auf die Zielrate um und schreibt sie in einen lock-free
//! Ring-Buffer. Die Sitzung liest den Consumer in ihrem eigenen Takt aus
//! und verpackt die Samples als PCM-Chunks fuer den Kanal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, warn};

use crate::error::{AudioError, AudioResult};

/// Konfiguration der Mikrofon-Erfassung
#[derive(Debug, Clone)]
pub struct ErfassungsConfig {
    /// Zielrate der gelieferten Mono-Samples in Hz
    pub ziel_abtastrate: u32,
    /// Ring-Buffer-Kapazitaet in Samples
    pub puffer_groesse: usize,
}

impl Default for ErfassungsConfig {
    fn default() -> Self {
        Self {
            // Eingaberate des Duplex-Kanals
            ziel_abtastrate: 16_000,
            puffer_groesse: 16_000 * 2, // 2 Sekunden Puffer
        }
    }
}

/// Produziert Samples aus dem Mikrofon-Callback
pub type ErfassungsProducer = HeapProd<f32>;
/// Konsumiert Samples fuer die Sitzung
pub type ErfassungsConsumer = HeapCons<f32>;

/// Setzt den Geraete-Strom auf Mono bei der Zielrate um
///
/// Interleaved-Frames werden ueber alle Kanaele gemittelt, zwischen
/// benachbarten Mono-Samples wird linear interpoliert. Der
/// Interpolationsrest wird ueber Callback-Grenzen hinweg getragen, es
/// gehen keine Samples verloren.
struct MonoUmsetzer {
    kanaele: usize,
    schritt: f64,
    position: f64,
    mono: Vec<f32>,
}

impl MonoUmsetzer {
    fn neu(kanaele: usize, quell_rate: u32, ziel_rate: u32) -> Self {
        Self {
            kanaele: kanaele.max(1),
            schritt: quell_rate as f64 / ziel_rate.max(1) as f64,
            position: 0.0,
            mono: Vec::new(),
        }
    }

    fn verarbeiten<I>(&mut self, samples: I, heraus: &mut Vec<f32>)
    where
        I: IntoIterator<Item = f32>,
    {
        let mut summe = 0.0f32;
        let mut im_frame = 0usize;
        for sample in samples {
            summe += sample;
            im_frame += 1;
            if im_frame == self.kanaele {
                self.mono.push(summe / self.kanaele as f32);
                summe = 0.0;
                im_frame = 0;
            }
        }

        while (self.position as usize) + 1 < self.mono.len() {
            let index = self.position as usize;
            let bruch = (self.position - index as f64) as f32;
            let links = self.mono[index];
            let rechts = self.mono[index + 1];
            heraus.push(links + (rechts - links) * bruch);
            self.position += self.schritt;
        }

        // Verbrauchte Samples verwerfen, das letzte bleibt als linke
        // Stuetzstelle fuer den naechsten Callback erhalten
        let verbraucht = (self.position as usize).min(self.mono.len().saturating_sub(1));
        self.mono.drain(..verbraucht);
        self.position -= verbraucht as f64;
    }
}

/// Erfassungs-Stream – haelt den cpal-Stream am Leben
///
/// Wird der ErfassungsStrom gedroppt, stoppt die Aufnahme. Der Stream
/// ist !Send und gehoert auf einen dedizierten Thread.
pub struct ErfassungsStrom {
    _stream: Stream,
    quell_rate: u32,
    kanaele: u16,
    config: ErfassungsConfig,
}

impl ErfassungsStrom {
    pub fn config(&self) -> &ErfassungsConfig {
        &self.config
    }

    /// Native Abtastrate des Geraets
    pub fn quell_rate(&self) -> u32 {
        self.quell_rate
    }

    /// Native Kanalanzahl des Geraets
    pub fn kanaele(&self) -> u16 {
        self.kanaele
    }
}

/// Oeffnet die Erfassung auf dem Standard-Eingabegeraet
pub fn oeffne_standard_erfassung(
    config: ErfassungsConfig,
) -> AudioResult<(ErfassungsStrom, ErfassungsConsumer)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::KeinStandardEingabegeraet)?;
    oeffne_erfassungs_strom(&device, config)
}

/// Oeffnet einen Erfassungs-Stream auf dem gegebenen Geraet
///
/// Das Geraet laeuft in seiner nativen Konfiguration, die Umsetzung auf
/// Mono bei der Zielrate passiert im Callback. Gibt den Stream und den
/// Ring-Buffer-Consumer zurueck.
pub fn oeffne_erfassungs_strom(
    device: &Device,
    config: ErfassungsConfig,
) -> AudioResult<(ErfassungsStrom, ErfassungsConsumer)> {
    let nativ = device
        .default_input_config()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    let quell_rate = nativ.sample_rate().0;
    let kanaele = nativ.channels();
    let stream_config: StreamConfig = nativ.config();

    let rb = HeapRb::<f32>::new(config.puffer_groesse);
    let (producer, consumer) = rb.split();
    let umsetzer = MonoUmsetzer::neu(kanaele as usize, quell_rate, config.ziel_abtastrate);

    let stream = match nativ.sample_format() {
        SampleFormat::F32 => strom_bauen::<f32>(device, &stream_config, umsetzer, producer, |s| s)?,
        SampleFormat::I16 => strom_bauen::<i16>(device, &stream_config, umsetzer, producer, |s| {
            s as f32 / i16::MAX as f32
        })?,
        SampleFormat::U8 => strom_bauen::<u8>(device, &stream_config, umsetzer, producer, |s| {
            (s as f32 - 128.0) / 128.0
        })?,
        anderes => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                anderes
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        "Erfassung geoeffnet: {}Hz {}ch nativ -> {}Hz mono",
        quell_rate, kanaele, config.ziel_abtastrate
    );

    Ok((
        ErfassungsStrom {
            _stream: stream,
            quell_rate,
            kanaele,
            config,
        },
        consumer,
    ))
}

fn strom_bauen<T>(
    device: &Device,
    stream_config: &StreamConfig,
    mut umsetzer: MonoUmsetzer,
    mut producer: ErfassungsProducer,
    nach_f32: fn(T) -> f32,
) -> AudioResult<Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| error!("Erfassungs-Fehler: {}", err);
    let mut block = Vec::new();
    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _| {
                block.clear();
                umsetzer.verarbeiten(data.iter().map(|&s| nach_f32(s)), &mut block);
                let geschrieben = producer.push_slice(&block);
                if geschrieben < block.len() {
                    warn!(
                        "Erfassungs-Ring-Buffer voll, {} Samples verworfen",
                        block.len() - geschrieben
                    );
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamFehler(e.to_string()))
}
