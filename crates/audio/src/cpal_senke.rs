//! Cpal-Ausgabe-Senke – geplante Wiedergabe auf echter Hardware
//!
//! Implementiert [`AusgabeSenke`] ueber einen cpal OutputStream. Die
//! Ausgabe-Uhr ist ein Frame-Zaehler: jeder Callback rueckt sie um die
//! gerenderte Frame-Anzahl vor. Geplante Puffer werden im Callback an
//! ihrer Startposition in den Ausgabeblock gemischt.
//!
//! Der cpal-Stream ist !Send und muss deshalb ausserhalb der Senke am
//! Leben gehalten werden (dedizierter Thread, siehe mahi-studio). Die
//! Senke selbst ist ein klonbarer, thread-sicherer Griff auf den
//! geteilten Zustand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{AudioError, AudioResult};
use crate::pcm::DekodierterPuffer;
use crate::senke::{AbspielHandle, AusgabeSenke};

/// Konfiguration der Cpal-Senke
#[derive(Debug, Clone)]
pub struct CpalSenkenConfig {
    /// Abtastrate in Hz
    pub abtastrate: u32,
    /// Kanalanzahl (Mono-Puffer werden auf alle Kanaele dupliziert)
    pub kanaele: u16,
}

impl Default for CpalSenkenConfig {
    fn default() -> Self {
        Self {
            abtastrate: crate::pcm::STANDARD_ABTASTRATE,
            kanaele: 1,
        }
    }
}

/// Ein geplanter Puffer im Frame-Bereich der Ausgabe-Uhr
struct Abschnitt {
    handle: AbspielHandle,
    samples: Vec<f32>,
    start_frame: u64,
}

/// Geteilter Zustand zwischen Senke und cpal-Callback
struct SenkenZustand {
    /// Geplante und laufende Abschnitte (kurze kritische Abschnitte)
    geplante: Mutex<Vec<Abschnitt>>,
    /// Natuerlich beendete, noch nicht abgeholte Handles
    beendete: Mutex<Vec<AbspielHandle>>,
    /// Bisher gerenderte Frames – die Ausgabe-Uhr
    gerenderte_frames: AtomicU64,
    abtastrate: u32,
}

impl SenkenZustand {
    /// Mischt alle faelligen Abschnitte in einen Ausgabeblock
    ///
    /// `block` enthaelt `frames * kanaele` interleaved Samples und wurde
    /// vorab genullt. Abgeschlossene Abschnitte wandern in die
    /// Beendet-Liste.
    fn block_fuellen(&self, block: &mut [f32], kanaele: usize) {
        let frames = block.len() / kanaele;
        let basis = self.gerenderte_frames.load(Ordering::Relaxed);
        let block_ende = basis + frames as u64;

        let mut geplante = self.geplante.lock();
        let mut fertige: Vec<AbspielHandle> = Vec::new();

        for abschnitt in geplante.iter() {
            let laenge = abschnitt.samples.len() as u64;
            let ende = abschnitt.start_frame + laenge;
            if ende <= basis || abschnitt.start_frame >= block_ende {
                if ende <= basis {
                    fertige.push(abschnitt.handle);
                }
                continue;
            }

            // Ueberlappung [basis, block_ende) x [start, ende)
            let von = abschnitt.start_frame.max(basis);
            let bis = ende.min(block_ende);
            for frame in von..bis {
                let sample = abschnitt.samples[(frame - abschnitt.start_frame) as usize];
                let block_frame = (frame - basis) as usize;
                for kanal in 0..kanaele {
                    let idx = block_frame * kanaele + kanal;
                    block[idx] = (block[idx] + sample).clamp(-1.0, 1.0);
                }
            }
            if ende <= block_ende {
                fertige.push(abschnitt.handle);
            }
        }

        if !fertige.is_empty() {
            geplante.retain(|a| !fertige.contains(&a.handle));
            self.beendete.lock().extend(fertige);
        }
        drop(geplante);

        self.gerenderte_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }
}

/// Klonbarer, thread-sicherer Griff auf die Cpal-Ausgabe
#[derive(Clone)]
pub struct CpalSenke {
    zustand: Arc<SenkenZustand>,
}

impl AusgabeSenke for CpalSenke {
    fn jetzt(&self) -> f64 {
        self.zustand.gerenderte_frames.load(Ordering::Relaxed) as f64
            / self.zustand.abtastrate as f64
    }

    fn starten(
        &self,
        handle: AbspielHandle,
        puffer: DekodierterPuffer,
        start_zeit: f64,
    ) -> AudioResult<()> {
        let start_frame = (start_zeit * self.zustand.abtastrate as f64).round() as u64;
        self.zustand.geplante.lock().push(Abschnitt {
            handle,
            samples: puffer.samples,
            start_frame,
        });
        Ok(())
    }

    fn stoppen(&self, handle: AbspielHandle) {
        self.zustand.geplante.lock().retain(|a| a.handle != handle);
    }

    fn beendete(&self) -> Vec<AbspielHandle> {
        std::mem::take(&mut self.zustand.beendete.lock())
    }
}

/// Ausgabe-Stream – haelt den cpal-Stream am Leben
///
/// Wird der AusgabeStrom gedroppt, endet die Wiedergabe.
pub struct AusgabeStrom {
    _stream: Stream,
    config: CpalSenkenConfig,
}

impl AusgabeStrom {
    pub fn config(&self) -> &CpalSenkenConfig {
        &self.config
    }
}

/// Oeffnet einen Ausgabe-Stream auf dem Standard-Ausgabegeraet
pub fn oeffne_standard_ausgabe(
    config: CpalSenkenConfig,
) -> AudioResult<(AusgabeStrom, CpalSenke)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::KeinStandardAusgabegeraet)?;
    oeffne_ausgabe_strom(&device, config)
}

/// Oeffnet einen Ausgabe-Stream auf dem gegebenen Geraet
///
/// Gibt den Stream (muss am Leben gehalten werden, !Send) und die
/// klonbare Senke zurueck.
pub fn oeffne_ausgabe_strom(
    device: &Device,
    config: CpalSenkenConfig,
) -> AudioResult<(AusgabeStrom, CpalSenke)> {
    let stream_config = StreamConfig {
        channels: config.kanaele,
        sample_rate: cpal::SampleRate(config.abtastrate),
        buffer_size: cpal::BufferSize::Default,
    };

    let zustand = Arc::new(SenkenZustand {
        geplante: Mutex::new(Vec::new()),
        beendete: Mutex::new(Vec::new()),
        gerenderte_frames: AtomicU64::new(0),
        abtastrate: config.abtastrate,
    });

    let err_fn = |err| error!("Ausgabe-Fehler: {}", err);

    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::AusgabeGeraet(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.abtastrate
                && c.max_sample_rate().0 >= config.abtastrate
                && c.channels() >= config.kanaele
        });

    let sample_format = supported
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let kanaele = config.kanaele as usize;
    let stream = match sample_format {
        SampleFormat::F32 => {
            let cb_zustand = Arc::clone(&zustand);
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        data.fill(0.0);
                        cb_zustand.block_fuellen(data, kanaele);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::AusgabeGeraet(e.to_string()))?
        }
        SampleFormat::I16 => {
            let cb_zustand = Arc::clone(&zustand);
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| {
                        let mut float_block = vec![0.0f32; data.len()];
                        cb_zustand.block_fuellen(&mut float_block, kanaele);
                        for (out, s) in data.iter_mut().zip(float_block.iter()) {
                            *out = (*s * i16::MAX as f32)
                                .clamp(i16::MIN as f32, i16::MAX as f32)
                                as i16;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::AusgabeGeraet(e.to_string()))?
        }
        _ => {
            return Err(AudioError::AusgabeGeraet(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::AusgabeGeraet(e.to_string()))?;

    debug!(
        "Ausgabe-Stream geoeffnet: {}Hz {}ch",
        config.abtastrate, config.kanaele
    );

    Ok((
        AusgabeStrom {
            _stream: stream,
            config,
        },
        CpalSenke { zustand },
    ))
}
