//! Audio capture via cpal, plus the device supervisor.
//!
//! The cpal callback converts device audio straight to 16 kHz mono PCM16
//! through a stateful one-pass converter and pushes the samples into a
//! lock-free SPSC ring. The supervisor thread owns the `cpal::Stream` (which
//! is not `Send`), assembles fixed 480-sample frames from the ring, feeds the
//! bounded frame queue, and runs the retry loop when the device fails:
//! exponential backoff 1 s, 2 s, 4 s, ... capped at 30 s, reset on a
//! successful open.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{FRAME_SIZE, RETRY_INITIAL_SECS, RETRY_MAX_SECS, SAMPLE_RATE};

use super::conflict::check_for_audio_conflicts;
use super::frame::AudioFrame;
use super::queue::FrameQueue;

/// Capacity of the callback -> supervisor sample ring (~1 s of audio).
const SAMPLE_RING_CAPACITY: usize = SAMPLE_RATE as usize;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("microphone access denied; check system privacy settings")]
    PermissionDenied,
    #[error("no usable input device: {0}")]
    DeviceUnavailable(String),
    #[error("input device lost: {0}")]
    DeviceLost(String),
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Events the supervisor reports to the application.
#[derive(Debug)]
pub enum AudioEvent {
    /// Capture is running; frames are flowing into the queue.
    DeviceReady,
    /// Capture failed or went away; a retry is scheduled.
    DeviceLost {
        error: String,
        advisory: Option<String>,
    },
}

fn classify_config_error(message: &str) -> DeviceError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("access") || lower.contains("denied") {
        DeviceError::PermissionDenied
    } else if lower.contains("format") || lower.contains("sample rate") {
        DeviceError::UnsupportedFormat(message.to_string())
    } else {
        DeviceError::DeviceUnavailable(message.to_string())
    }
}

/// Converts the device's native interleaved f32 buffers to 16 kHz mono PCM16
/// in a single pass: channel averaging, linear-interpolation rate conversion,
/// and quantization are fused. The interpolation cursor carries across
/// callback buffers, so resampling stays continuous at buffer edges.
struct MonoDownsampler {
    channels: usize,
    /// Input mono samples consumed per output sample.
    step: f64,
    /// Fractional position inside the current input segment.
    cursor: f64,
    /// Left edge of the current interpolation segment.
    previous: f32,
    primed: bool,
}

impl MonoDownsampler {
    fn new(channels: u16, native_rate: u32) -> Self {
        Self {
            channels: channels.max(1) as usize,
            step: native_rate as f64 / SAMPLE_RATE as f64,
            cursor: 0.0,
            previous: 0.0,
            primed: false,
        }
    }

    fn process(&mut self, interleaved: &[f32], out: &mut Vec<i16>) {
        for frame in interleaved.chunks_exact(self.channels) {
            let mono = frame.iter().sum::<f32>() / self.channels as f32;
            if !self.primed {
                self.previous = mono;
                self.primed = true;
                continue;
            }
            while self.cursor < 1.0 {
                let sample = self.previous + (mono - self.previous) * self.cursor as f32;
                out.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                self.cursor += self.step;
            }
            self.cursor -= 1.0;
            self.previous = mono;
        }
    }
}

/// Resolve the input device and the native format we will capture at.
fn pick_device(preferred: Option<&str>) -> Result<(cpal::Device, StreamConfig, u32), DeviceError> {
    let host = cpal::default_host();

    let device = match preferred {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?
            .find(|d| matches!(d.name(), Ok(n) if n == wanted))
            .ok_or_else(|| {
                DeviceError::DeviceUnavailable(format!("input device not found: {wanted}"))
            })?,
        None => host
            .default_input_device()
            .ok_or_else(|| DeviceError::DeviceUnavailable("no default input device".into()))?,
    };

    let native = device
        .default_input_config()
        .map_err(|e| classify_config_error(&e.to_string()))?;
    let native_rate = native.sample_rate().0;
    let config = StreamConfig {
        channels: native.channels(),
        sample_rate: native.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        native_rate,
        channels = config.channels,
        "Capturing at native format, converting to {} Hz mono PCM16",
        SAMPLE_RATE
    );
    Ok((device, config, native_rate))
}

/// Open the device and start streaming converted samples into a fresh SPSC
/// ring. Returns the stream (keep alive), the consumer half, an error channel
/// fed by the cpal error callback, and the shared overflow counter.
fn open_stream(
    device_name: Option<&str>,
) -> Result<
    (
        Stream,
        ringbuf::HeapCons<i16>,
        std_mpsc::Receiver<String>,
        Arc<AtomicU64>,
    ),
    DeviceError,
> {
    let (device, config, native_rate) = pick_device(device_name)?;

    let mut converter = MonoDownsampler::new(config.channels, native_rate);
    let mut converted: Vec<i16> = Vec::with_capacity(4096);
    let rb = HeapRb::<i16>::new(SAMPLE_RING_CAPACITY);
    let (mut producer, consumer) = rb.split();
    let (err_tx, err_rx) = std_mpsc::channel();
    let overflow = Arc::new(AtomicU64::new(0));
    let overflow_cb = overflow.clone();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                converted.clear();
                converter.process(data, &mut converted);
                let written = producer.push_slice(&converted);
                if written < converted.len() {
                    // OS buffer outran the supervisor; count, never block.
                    overflow_cb
                        .fetch_add((converted.len() - written) as u64, Ordering::Relaxed);
                }
            },
            move |err| {
                let _ = err_tx.send(err.to_string());
            },
            None,
        )
        .map_err(|e| classify_config_error(&e.to_string()))?;

    stream
        .play()
        .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;

    info!("Audio capture started");
    Ok((stream, consumer, err_rx, overflow))
}

/// Sleep in small slices so a shutdown request is honored promptly.
fn interruptible_sleep(duration: Duration, stop: &AtomicBool) {
    let mut remaining = duration;
    let slice = Duration::from_millis(100);
    while remaining > Duration::ZERO && !stop.load(Ordering::Acquire) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

/// Spawn the capture supervisor thread.
pub fn spawn_capture_supervisor(
    queue: Arc<FrameQueue>,
    events: mpsc::UnboundedSender<AudioEvent>,
    stop: Arc<AtomicBool>,
    device_name: Option<String>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("capture-supervisor".into())
        .spawn(move || {
            let mut backoff = Duration::from_secs(RETRY_INITIAL_SECS);

            while !stop.load(Ordering::Acquire) {
                match open_stream(device_name.as_deref()) {
                    Ok((stream, mut consumer, err_rx, overflow)) => {
                        backoff = Duration::from_secs(RETRY_INITIAL_SECS);
                        let _ = events.send(AudioEvent::DeviceReady);

                        let failure = pump_frames(&queue, &mut consumer, &err_rx, &overflow, &stop);
                        drop(stream);

                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        let message = DeviceError::DeviceLost(failure).to_string();
                        error!("{message}");
                        let _ = events.send(AudioEvent::DeviceLost {
                            error: message,
                            advisory: check_for_audio_conflicts(),
                        });
                    }
                    Err(e) => {
                        let advisory = match e {
                            DeviceError::PermissionDenied => None,
                            _ => check_for_audio_conflicts(),
                        };
                        error!("Audio capture failed to start: {e}");
                        let _ = events.send(AudioEvent::DeviceLost {
                            error: e.to_string(),
                            advisory,
                        });
                    }
                }

                interruptible_sleep(backoff, &stop);
                backoff = (backoff * 2).min(Duration::from_secs(RETRY_MAX_SECS));
            }
            info!("Capture supervisor exiting");
        })
        .expect("spawn capture supervisor")
}

/// Drain the sample ring into fixed-size frames until the stream errors or a
/// shutdown is requested. Returns the failure message on error exit.
fn pump_frames(
    queue: &FrameQueue,
    consumer: &mut ringbuf::HeapCons<i16>,
    err_rx: &std_mpsc::Receiver<String>,
    overflow: &AtomicU64,
    stop: &AtomicBool,
) -> String {
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SIZE * 2);
    let mut scratch = vec![0i16; FRAME_SIZE];
    let mut reported_overflow: u64 = 0;
    let mut queue_drops: u64 = 0;

    loop {
        if stop.load(Ordering::Acquire) {
            return String::new();
        }
        if let Ok(err) = err_rx.try_recv() {
            return err;
        }

        let read = consumer.pop_slice(&mut scratch);
        if read == 0 {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        pending.extend_from_slice(&scratch[..read]);

        while pending.len() >= FRAME_SIZE {
            let samples: Vec<i16> = pending.drain(..FRAME_SIZE).collect();
            if queue.push(AudioFrame::new(samples)) {
                queue_drops += 1;
                if queue_drops % 50 == 1 {
                    warn!(drops = queue_drops, "Frame queue overflow, dropping oldest");
                }
            }
        }

        let dropped = overflow.load(Ordering::Relaxed);
        if dropped > reported_overflow {
            warn!(
                dropped = dropped - reported_overflow,
                "Capture ring overflow (gap in audio)"
            );
            reported_overflow = dropped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rate_passes_samples_through() {
        let mut converter = MonoDownsampler::new(1, SAMPLE_RATE);
        let mut out = Vec::new();
        converter.process(&[0.0, 0.25, 0.5, 1.0], &mut out);
        // One sample of latency: the last input waits for its right edge.
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], (0.25 * i16::MAX as f32) as i16);
        converter.process(&[1.0], &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[3], i16::MAX);
    }

    #[test]
    fn two_to_one_decimation_halves_the_rate() {
        let mut converter = MonoDownsampler::new(1, SAMPLE_RATE * 2);
        let ramp: Vec<f32> = (0..200).map(|i| i as f32 / 200.0).collect();
        let mut out = Vec::new();
        converter.process(&ramp, &mut out);
        assert_eq!(out.len(), 100);
        // A monotone ramp stays monotone through interpolation.
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn channels_are_averaged_before_resampling() {
        let mut converter = MonoDownsampler::new(2, SAMPLE_RATE);
        let mut out = Vec::new();
        // Interleaved stereo frames averaging to 0.5, 0.5, 0.0.
        converter.process(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], &mut out);
        let half = (0.5f32 * i16::MAX as f32) as i16;
        assert_eq!(out, vec![half, half]);
    }

    #[test]
    fn conversion_is_continuous_across_buffer_splits() {
        let ramp: Vec<f32> = (0..96).map(|i| (i as f32 / 9.0).sin() * 0.8).collect();

        let mut whole = Vec::new();
        MonoDownsampler::new(1, 48_000).process(&ramp, &mut whole);

        let mut split = Vec::new();
        let mut converter = MonoDownsampler::new(1, 48_000);
        converter.process(&ramp[..37], &mut split);
        converter.process(&ramp[37..], &mut split);

        assert_eq!(whole, split);
    }

    #[test]
    fn quantization_is_clamped() {
        let mut converter = MonoDownsampler::new(1, SAMPLE_RATE);
        let mut out = Vec::new();
        converter.process(&[2.0, 2.0, -2.0], &mut out);
        assert_eq!(out[0], i16::MAX);
    }

    #[test]
    fn permission_errors_are_classified() {
        assert!(matches!(
            classify_config_error("Access denied by user"),
            DeviceError::PermissionDenied
        ));
        assert!(matches!(
            classify_config_error("sample rate not supported"),
            DeviceError::UnsupportedFormat(_)
        ));
        assert!(matches!(
            classify_config_error("device disconnected"),
            DeviceError::DeviceUnavailable(_)
        ));
    }
}
