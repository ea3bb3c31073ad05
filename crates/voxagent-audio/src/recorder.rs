//! Microphone recording. There can only be one active recording at a time and
//! the recorded audio is kept in memory as a WAV buffer.
//!
//! ## Format notes
//!
//! Samples are always written as 32 bit float WAV, roughly 470KiB every 5
//! seconds for a mono 48kHz device. Utterances for this app are short, so the
//! 25MiB vendor upload limit is not a concern.

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Host, Sample};
use hound::WavWriter;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::{AudioClip, Capture, CaptureError, Result};

type WavWriterHandle = Arc<Mutex<Option<WavWriter<MemoryWriter>>>>;

/// A cheaply cloneable handle to the inner data that is being recorded. The
/// finalize method for the wav writer does not return the inner data, so we
/// store it behind an Arc<Mutex> to allow for cheap cloning and access to the
/// inner data.
#[derive(Clone)]
struct MemoryWriter {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemoryWriter {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cursor::new(Vec::with_capacity(8 * 1024)))),
        }
    }

    fn try_into_inner(self) -> Result<Vec<u8>> {
        // Attempt to own the inner arc
        let owned = Arc::try_unwrap(self.inner).map_err(|_| {
            CaptureError::Anyhow(anyhow!("Failed to unwrap inner Arc in MemoryWriter"))
        })?;
        Ok(owned.into_inner().into_inner())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<Option<AudioClip>>>),
}

/// cpal backed [`Capture`] implementation.
///
/// cpal streams are not `Send`, so the host and the active stream live on a
/// dedicated thread and we talk to it over a channel.
pub struct MicRecorder {
    commands: mpsc::Sender<Command>,
    level: Arc<AtomicU32>,
}

impl MicRecorder {
    pub fn new() -> Self {
        let (commands, receiver) = mpsc::channel();
        let level = Arc::new(AtomicU32::new(0f32.to_bits()));

        let thread_level = level.clone();
        thread::Builder::new()
            .name("voxagent-audio".into())
            .spawn(move || audio_thread(receiver, thread_level))
            .map_err(|e| error!("failed to spawn audio thread: {}", e))
            .ok();

        Self { commands, level }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| CaptureError::ThreadGone)?;
        response.await.map_err(|_| CaptureError::ThreadGone)?
    }
}

impl Default for MicRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capture for MicRecorder {
    async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    async fn stop(&self) -> Result<Option<AudioClip>> {
        self.request(Command::Stop).await
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }
}

fn audio_thread(commands: mpsc::Receiver<Command>, level: Arc<AtomicU32>) {
    let host = cpal::default_host();
    let mut active: Option<RecordingHandle> = None;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(reply) => {
                let result = if active.is_some() {
                    Err(CaptureError::AlreadyRecording)
                } else {
                    start_recording(&host, level.clone()).map(|handle| {
                        active = Some(handle);
                    })
                };
                reply.send(result).ok();
            }
            Command::Stop(reply) => {
                let result = match active.take() {
                    Some(mut handle) => handle.finish(),
                    None => Ok(None),
                };
                level.store(0f32.to_bits(), Ordering::Relaxed);
                reply.send(result).ok();
            }
        }
    }

    debug!("audio thread exiting");
}

fn start_recording(host: &Host, level: Arc<AtomicU32>) -> Result<RecordingHandle> {
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;
    let config = device
        .default_input_config()
        .map_err(|_| CaptureError::NoInputDevice)?;

    info!(
        device_name = %device.name().unwrap_or_else(|_| "unknown".into()),
        config = ?config,
        "Recording from device"
    );

    let spec = hound::WavSpec {
        channels: config.channels(),
        sample_rate: config.sample_rate().0,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let buffer = MemoryWriter::new();
    let writer =
        WavWriter::new(buffer.clone(), spec).map_err(|e| CaptureError::Anyhow(e.into()))?;
    let writer = Arc::new(Mutex::new(Some(writer)));
    let samples = Arc::new(AtomicU64::new(0));

    let err_fn = move |err| {
        error!("an error occurred on stream: {}", err);
    };

    let sink = SampleSink {
        writer: writer.clone(),
        samples: samples.clone(),
        level,
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &_| sink.write(data),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &_| {
                let converted: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                sink.write(&converted)
            },
            err_fn,
            None,
        )?,
        sample_format => {
            return Err(CaptureError::SampleFormatNotSupported(format!(
                "{:?}",
                sample_format
            )));
        }
    };

    stream
        .play()
        .map_err(|e| anyhow!("failed to play stream: {}", e))?;

    Ok(RecordingHandle {
        stream,
        writer,
        samples,
        spec,
        buffer: Some(buffer),
    })
}

/// Everything the input callback needs, moved into the stream closure.
struct SampleSink {
    writer: WavWriterHandle,
    samples: Arc<AtomicU64>,
    level: Arc<AtomicU32>,
}

impl SampleSink {
    fn write(&self, data: &[f32]) {
        self.level
            .store(level_from_db(db_fs(data)).to_bits(), Ordering::Relaxed);

        if let Some(mut guard) = self.writer.try_lock() {
            if let Some(writer) = guard.as_mut() {
                for &sample in data.iter() {
                    writer.write_sample(sample).ok();
                }
                self.samples.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
        }
    }
}

/// Handle to the active recording. When dropped or finished, the recording
/// will end. You must call `finish` to receive the data.
struct RecordingHandle {
    stream: cpal::Stream,
    writer: WavWriterHandle,
    samples: Arc<AtomicU64>,
    spec: hound::WavSpec,
    // The buffer the data is being written to. Presence of this buffer
    // indicates if the recording has been finalized or not.
    buffer: Option<MemoryWriter>,
}

impl RecordingHandle {
    fn finish(&mut self) -> Result<Option<AudioClip>> {
        let Some(buffer) = self.buffer.take() else {
            return Ok(None);
        };
        info!("Ending recording.");
        // can not drop the stream through &mut self, pause and ignore errors.
        self.stream.pause().ok();
        // Finalize the writer so it writes the proper framing information.
        if let Some(writer) = self.writer.lock().take() {
            writer
                .finalize()
                .map_err(|e| CaptureError::Anyhow(anyhow!("Failed to finalize writer: {}", e)))?;
        }

        let frames = self.samples.load(Ordering::Relaxed) / u64::from(self.spec.channels.max(1));
        let duration = Duration::from_secs_f64(frames as f64 / f64::from(self.spec.sample_rate));

        let data = buffer.try_into_inner()?;
        Ok(Some(AudioClip::wav(data, duration)))
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        if self.buffer.is_some() {
            if let Err(e) = self.finish() {
                error!("failed to finalize recording: {}", e);
            }
        }
    }
}

pub const MIN_DB: f32 = -96.0;

/// Quietest level that still registers on the meter.
const METER_FLOOR_DB: f32 = -60.0;

/// Convert a slice of f32 samples to dBFS.
pub fn db_fs(data: &[f32]) -> f32 {
    let max_sample = data
        .iter()
        .fold(f32::EQUILIBRIUM, |max, &sample| sample.abs().max(max));

    (20.0 * max_sample.log10()).clamp(MIN_DB, 0.0)
}

/// Map a dBFS reading onto the `0.0..=1.0` meter range.
pub fn level_from_db(db: f32) -> f32 {
    ((db - METER_FLOOR_DB) / -METER_FLOOR_DB).clamp(0.0, 1.0)
}
