//! Audio-capture context (C1): a cpal input stream callback feeding a
//! bounded channel with drop-oldest backpressure (§5). Grounded on the
//! teacher's `audio_capture/imp_cpal.rs` device-selection logic, but the
//! teacher's unbounded `Arc<Mutex<VecDeque<i16>>>` ring buffer with manual
//! eviction is replaced by a bounded `crossbeam_channel` — the eviction
//! policy the spec mandates is "drop oldest on a full bounded queue", which
//! a channel expresses directly instead of needing hand-rolled draining.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, SupportedStreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;
const CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no input device available")]
    NoInputDevice,
    #[error("input device {0} not found")]
    DeviceNotFound(String),
    #[error("failed to query device configs: {0}")]
    Configs(#[from] cpal::SupportedStreamConfigsError),
    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("failed to query device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error("resampler error: {0}")]
    Resample(#[from] rubato::ResamplerConstructionError),
}

/// One chunk of mono 16kHz s16le PCM, ready for the feature extractor.
pub struct AudioChunk(pub Vec<u8>);

/// Owns the input stream for as long as capture should run. Dropping it
/// stops the stream.
pub struct AudioCapture {
    _stream: Stream,
    receiver: Receiver<AudioChunk>,
}

impl AudioCapture {
    pub fn start(device_name: Option<&str>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => find_device(&host, name)?,
            None => host.default_input_device().ok_or(AudioError::NoInputDevice)?,
        };

        let config = device.default_input_config().map_err(|_| AudioError::NoInputDevice)?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let sample_format = config.sample_format();

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let stream = build_stream(&device, &config, sample_format, channels, sample_rate, tx)?;
        stream.play()?;

        Ok(Self { _stream: stream, receiver: rx })
    }

    /// Drain currently buffered chunks (non-blocking), used by the detector
    /// thread's tick loop.
    pub fn try_recv(&self) -> Option<AudioChunk> {
        self.receiver.try_recv().ok()
    }

    pub fn receiver(&self) -> Receiver<AudioChunk> {
        self.receiver.clone()
    }

    pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let mut names = Vec::new();
        for device in host.input_devices().map_err(|_| AudioError::NoInputDevice)? {
            names.push(device.name()?);
        }
        Ok(names)
    }
}

fn find_device(host: &cpal::Host, name: &str) -> Result<Device, AudioError> {
    for device in host.input_devices().map_err(|_| AudioError::NoInputDevice)? {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

fn build_stream(
    device: &Device,
    config: &SupportedStreamConfig,
    sample_format: SampleFormat,
    channels: u16,
    sample_rate: u32,
    tx: Sender<AudioChunk>,
) -> Result<Stream, AudioError> {
    let stream_config = config.config();
    let resampler = if sample_rate != TARGET_SAMPLE_RATE {
        Some(std::sync::Mutex::new(FftFixedIn::<f32>::new(
            sample_rate as usize,
            TARGET_SAMPLE_RATE as usize,
            1024,
            2,
            1,
        )?))
    } else {
        None
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let mono: Vec<f32> = downmix_i16(data, channels);
                emit(&mono, sample_rate, &resampler, &tx);
            },
            |err| log::error!("audio capture stream error: {err}"),
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                let mono: Vec<f32> = downmix_f32(data, channels);
                emit(&mono, sample_rate, &resampler, &tx);
            },
            |err| log::error!("audio capture stream error: {err}"),
            None,
        )?,
        other => {
            log::warn!("unsupported sample format {other:?}, falling back to f32");
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let mono: Vec<f32> = downmix_f32(data, channels);
                    emit(&mono, sample_rate, &resampler, &tx);
                },
                |err| log::error!("audio capture stream error: {err}"),
                None,
            )?
        }
    };
    Ok(stream)
}

fn downmix_i16(data: &[i16], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.iter().map(|s| f32::from(*s) / 32768.0).collect();
    }
    data.chunks_exact(channels as usize)
        .map(|frame| frame.iter().map(|s| f32::from(*s) / 32768.0).sum::<f32>() / channels as f32)
        .collect()
}

fn downmix_f32(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample (if needed) and push one PCM chunk onto the bounded channel,
/// dropping the oldest buffered chunk if the channel is full (§5: audio
/// capture must never block).
fn emit(
    mono: &[f32],
    sample_rate: u32,
    resampler: &Option<std::sync::Mutex<FftFixedIn<f32>>>,
    tx: &Sender<AudioChunk>,
) {
    let resampled = match resampler {
        Some(resampler) => {
            let mut guard = resampler.lock().expect("resampler mutex is never poisoned by a panic here");
            match guard.process(&[mono.to_vec()], None) {
                Ok(mut output) => output.remove(0),
                Err(err) => {
                    log::warn!("resampling failed, dropping chunk: {err}");
                    return;
                }
            }
        }
        None => mono.to_vec(),
    };
    let _ = sample_rate;

    let mut bytes = Vec::with_capacity(resampled.len() * 2);
    for sample in resampled {
        let clamped = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&clamped.to_le_bytes());
    }

    if let Err(err) = tx.try_send(AudioChunk(bytes)) {
        // Channel full: drop the oldest buffered chunk, then retry with the
        // same chunk we just failed to send rather than an error condition.
        let chunk = err.into_inner();
        let _ = tx.try_recv();
        let _ = tx.try_send(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_i16_stereo_averages_channels() {
        let data = [100i16, 300, -100, -300];
        let mono = downmix_i16(&data, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 200.0 / 32768.0).abs() < 1e-6);
        assert!((mono[1] - (-200.0 / 32768.0)).abs() < 1e-6);
    }

    #[test]
    fn downmix_f32_mono_is_passthrough() {
        let data = [0.1f32, 0.2, 0.3];
        let mono = downmix_f32(&data, 1);
        assert_eq!(mono, data);
    }

    #[test]
    fn full_channel_drops_oldest_rather_than_blocking() {
        let (tx, rx) = bounded(1);
        tx.try_send(AudioChunk(vec![1])).unwrap();
        emit(&[0.25; 4], TARGET_SAMPLE_RATE, &None, &tx);
        let chunk = rx.try_recv().unwrap();
        // The original chunk (`[1]`) was evicted; the real captured samples
        // survive rather than being replaced by an empty placeholder.
        assert_ne!(chunk.0, vec![1]);
        let expected: Vec<u8> = [0.25f32; 4]
            .iter()
            .flat_map(|s| ((s * 32768.0) as i16).to_le_bytes())
            .collect();
        assert_eq!(chunk.0, expected);
    }
}
