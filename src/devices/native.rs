//! cpal-backed capture devices and audio output

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use super::resample::StreamResampler;
use crate::device::{CaptureConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use crate::playback::{OutputContext, ScheduledSource, SourceId};
use crate::types::PcmBuffer;
use crate::{LiveError, Result};

/// Seconds of microphone audio the capture ring can hold
const CAPTURE_RING_SECONDS: usize = 2;

/// How often the capture thread drains the ring
const CAPTURE_DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Voices that can wait for the output callback to pick them up
const VOICE_QUEUE_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn device_label(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

fn input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| LiveError::media_access_with_source("cannot enumerate input devices", Box::new(e)))?
            .find(|device| device.name().ok().as_deref() == Some(name))
            .ok_or_else(|| LiveError::media_access(format!("input device '{}' not found", name))),
        None => host
            .default_input_device()
            .ok_or_else(|| LiveError::media_access("no input device available")),
    }
}

/// Mean of one interleaved frame
fn downmix<T>(frame: &[T]) -> f32
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
    sum / frame.len().max(1) as f32
}

/// Microphone capture through the default cpal host
///
/// Camera self-view is not available here; video requests are logged and
/// only an audio track is opened.
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    input_device: Option<String>,
}

impl CpalDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from the input device with this name instead of the default
    pub fn with_input_device(name: impl Into<String>) -> Self {
        Self { input_device: Some(name.into()) }
    }
}

#[async_trait::async_trait]
impl MediaDevices for CpalDevices {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>> {
        if !constraints.audio {
            return Err(LiveError::media_access("microphone capture is required"));
        }
        if constraints.video {
            debug!("Camera self-view is not supported by the cpal backend, capturing audio only");
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let name = self.input_device.clone();
        let target_rate = constraints.sample_rate;

        // cpal streams are not Send; the stream lives on its own thread
        std::thread::Builder::new()
            .name("connect-live-capture".into())
            .spawn(move || match start_capture(name.as_deref(), target_rate) {
                Ok(capture) => {
                    let _ = ready_tx.send(Ok(capture.label.clone()));
                    pump_capture(capture, stop_rx, audio_tx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| LiveError::media_access_with_source("cannot spawn capture thread", Box::new(e)))?;

        let label = ready_rx
            .await
            .map_err(|_| LiveError::media_access("capture thread exited before starting"))??;

        Ok(Box::new(CpalStream {
            tracks: vec![MediaTrack { kind: TrackKind::Audio, label }],
            audio: Some(UnboundedReceiverStream::new(audio_rx).boxed()),
            stop: Some(stop_tx),
        }))
    }
}

/// A running input stream and the non-realtime side of its ring buffer
struct InputCapture {
    stream: cpal::Stream,
    label: String,
    samples: Consumer<f32>,
    overruns: Arc<AtomicU64>,
    resampler: StreamResampler,
}

fn start_capture(name: Option<&str>, target_rate: u32) -> Result<InputCapture> {
    let device = input_device(name)?;
    let label = device_label(&device);

    let supported = device
        .default_input_config()
        .map_err(|e| LiveError::media_access_with_source("no usable input configuration", Box::new(e)))?;
    info!(device = %label, config = ?supported, "Opening input device");

    let config: StreamConfig = supported.config();
    let resampler = StreamResampler::new(config.sample_rate.0, target_rate)?;
    let (producer, samples) =
        RingBuffer::<f32>::new(config.sample_rate.0 as usize * CAPTURE_RING_SECONDS);
    let overruns = Arc::new(AtomicU64::new(0));

    let stream = match supported.sample_format() {
        SampleFormat::I16 => build_input::<i16>(&device, &config, producer, Arc::clone(&overruns))?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, producer, Arc::clone(&overruns))?,
        SampleFormat::F32 => build_input::<f32>(&device, &config, producer, Arc::clone(&overruns))?,
        format => {
            return Err(LiveError::media_access(format!("unsupported sample format {:?}", format)));
        }
    };

    stream
        .play()
        .map_err(|e| LiveError::media_access_with_source("failed to start capture", Box::new(e)))?;

    Ok(InputCapture { stream, label, samples, overruns, resampler })
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: Producer<f32>,
    overruns: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    if producer.push(downmix(frame)).is_err() {
                        overruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| LiveError::media_access_with_source("failed to open microphone", Box::new(e)))
}

/// Drain the capture ring, resample and forward until stopped
fn pump_capture(
    mut capture: InputCapture,
    stop_rx: std::sync::mpsc::Receiver<()>,
    tx: mpsc::UnboundedSender<Vec<f32>>,
) {
    let mut block = Vec::new();
    let mut reported = 0;

    loop {
        match stop_rx.recv_timeout(CAPTURE_DRAIN_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        block.clear();
        while let Ok(sample) = capture.samples.pop() {
            block.push(sample);
        }

        let overruns = capture.overruns.load(Ordering::Relaxed);
        if overruns > reported {
            warn!(dropped = overruns - reported, "Capture ring buffer overran");
            reported = overruns;
        }

        let mut out = Vec::new();
        if let Err(e) = capture.resampler.process(&block, &mut out) {
            error!("Capture resampling failed: {}", e);
            break;
        }
        // Receiver gone means the session is shutting down
        if !out.is_empty() && tx.send(out).is_err() {
            break;
        }
    }

    drop(capture.stream);
    debug!(device = %capture.label, "Capture stream dropped");
}

struct CpalStream {
    tracks: Vec<MediaTrack>,
    audio: Option<BoxStream<'static, Vec<f32>>>,
    stop: Option<std::sync::mpsc::Sender<()>>,
}

impl MediaStream for CpalStream {
    fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.clone()
    }

    fn take_audio(&mut self) -> Option<BoxStream<'static, Vec<f32>>> {
        self.audio.take()
    }

    fn stop_all_tracks(&mut self) {
        self.audio = None;
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// A buffer waiting for or in playback
struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    done: Option<oneshot::Sender<()>>,
}

/// Scheduling side of the mixer; hands voices to the output callback
struct VoiceQueue {
    sample_rate: u32,
    played: Arc<AtomicU64>,
    next_id: AtomicU64,
    producer: Mutex<Producer<Voice>>,
}

/// Callback side of the mixer; owns every voice it is playing
struct Mixer {
    played: Arc<AtomicU64>,
    incoming: Consumer<Voice>,
    voices: Vec<Voice>,
}

fn mixer(sample_rate: u32, capacity: usize) -> (VoiceQueue, Mixer) {
    let (producer, incoming) = RingBuffer::new(capacity);
    let played = Arc::new(AtomicU64::new(0));

    let queue = VoiceQueue {
        sample_rate,
        played: Arc::clone(&played),
        next_id: AtomicU64::new(0),
        producer: Mutex::new(producer),
    };
    let mixer = Mixer { played, incoming, voices: Vec::with_capacity(capacity) };
    (queue, mixer)
}

impl VoiceQueue {
    fn now(&self) -> f64 {
        self.played.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn add(&self, samples: Vec<f32>, start: f64) -> Result<ScheduledSource> {
        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (done, ended) = oneshot::channel();
        let start_frame = (start * self.sample_rate as f64).round().max(0.0) as u64;

        lock(&self.producer)
            .push(Voice { id, start_frame, samples, done: Some(done) })
            .map_err(|_| LiveError::media_access("playback queue is full"))?;
        Ok(ScheduledSource { id, ended })
    }
}

impl Mixer {
    /// Render the next block of mono frames and advance the clock
    fn render(&mut self, mix: &mut [f32]) {
        while let Ok(voice) = self.incoming.pop() {
            self.voices.push(voice);
        }

        mix.fill(0.0);
        let base = self.played.load(Ordering::Acquire);
        let block_end = base + mix.len() as u64;

        self.voices.retain_mut(|voice| {
            let end = voice.start_frame + voice.samples.len() as u64;
            let from = voice.start_frame.max(base);
            let to = end.min(block_end);
            for frame in from..to {
                mix[(frame - base) as usize] += voice.samples[(frame - voice.start_frame) as usize];
            }

            if end > block_end {
                return true;
            }
            if let Some(done) = voice.done.take() {
                let _ = done.send(());
            }
            false
        });

        for sample in mix.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.played.store(block_end, Ordering::Release);
    }
}

/// Speaker output through the default cpal host
///
/// The output clock counts frames actually rendered, so it never runs
/// ahead of what the listener has heard.
pub struct CpalOutput {
    queue: VoiceQueue,
    _keepalive: std::sync::mpsc::Sender<()>,
}

impl CpalOutput {
    /// Open the default output device and start rendering silence.
    ///
    /// Blocks until the device is running.
    pub fn open_default() -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (keepalive, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("connect-live-playback".into())
            .spawn(move || match start_output() {
                Ok((stream, queue)) => {
                    let _ = ready_tx.send(Ok(queue));
                    // Returns once every sender is dropped
                    while stop_rx.recv().is_ok() {}
                    drop(stream);
                    debug!("Playback stream dropped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| LiveError::media_access_with_source("cannot spawn playback thread", Box::new(e)))?;

        let queue = ready_rx
            .recv()
            .map_err(|_| LiveError::media_access("playback thread exited before starting"))??;

        Ok(Self { queue, _keepalive: keepalive })
    }

    /// Output device sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.queue.sample_rate
    }
}

impl std::fmt::Debug for CpalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalOutput")
            .field("sample_rate", &self.queue.sample_rate)
            .field("now", &self.queue.now())
            .finish()
    }
}

impl OutputContext for CpalOutput {
    fn now(&self) -> f64 {
        self.queue.now()
    }

    fn schedule(&self, buffer: PcmBuffer, start: f64) -> Result<ScheduledSource> {
        let frames = buffer.frames();
        let count = buffer.channel_count().max(1) as f32;
        let mono: Vec<f32> = (0..frames)
            .map(|i| (0..buffer.channel_count()).map(|c| buffer.channel(c)[i]).sum::<f32>() / count)
            .collect();

        let samples = StreamResampler::convert(&mono, buffer.sample_rate(), self.queue.sample_rate)?;
        self.queue.add(samples, start)
    }
}

fn start_output() -> Result<(cpal::Stream, VoiceQueue)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveError::media_access("no output device available"))?;
    let label = device_label(&device);

    let supported = device
        .default_output_config()
        .map_err(|e| LiveError::media_access_with_source("no usable output configuration", Box::new(e)))?;
    info!(device = %label, config = ?supported, "Opening output device");

    let config: StreamConfig = supported.config();
    let (queue, mixer) = mixer(config.sample_rate.0, VOICE_QUEUE_CAPACITY);

    let stream = match supported.sample_format() {
        SampleFormat::I16 => build_output::<i16>(&device, &config, mixer)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, mixer)?,
        SampleFormat::F32 => build_output::<f32>(&device, &config, mixer)?,
        format => {
            return Err(LiveError::media_access(format!("unsupported sample format {:?}", format)));
        }
    };

    stream
        .play()
        .map_err(|e| LiveError::media_access_with_source("failed to start playback", Box::new(e)))?;

    Ok((stream, queue))
}

fn build_output<T>(device: &Device, config: &StreamConfig, mut mixer: Mixer) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mix = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mix.resize(frames, 0.0);
                mixer.render(&mut mix);

                for (frame, &value) in data.chunks_mut(channels).zip(mix.iter()) {
                    frame.fill(T::from_sample(value));
                }
            },
            move |err| {
                warn!("Audio playback error: {}", err);
            },
            None,
        )
        .map_err(|e| LiveError::media_access_with_source("failed to open speaker", Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixer_plays_voices_at_their_start_frame() {
        let (queue, mut mixer) = mixer(10, 8);
        let mut first = queue.add(vec![0.5; 4], 0.2).unwrap();
        let mut block = vec![0.0; 8];

        mixer.render(&mut block);
        assert_eq!(block, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert!((queue.now() - 0.8).abs() < 1e-9);
        assert!(first.ended.try_recv().is_ok());
    }

    #[test]
    fn voices_spanning_blocks_finish_in_the_later_block() {
        let (queue, mut mixer) = mixer(10, 8);
        let mut source = queue.add(vec![0.25; 6], 0.0).unwrap();
        let mut block = vec![0.0; 4];

        mixer.render(&mut block);
        assert_eq!(block, vec![0.25; 4]);
        assert!(source.ended.try_recv().is_err());

        mixer.render(&mut block);
        assert_eq!(block, vec![0.25, 0.25, 0.0, 0.0]);
        assert!(source.ended.try_recv().is_ok());
    }

    #[test]
    fn overlapping_voices_are_summed_and_clamped() {
        let (queue, mut mixer) = mixer(10, 8);
        queue.add(vec![0.75; 2], 0.0).unwrap();
        queue.add(vec![0.75; 2], 0.0).unwrap();
        let mut block = vec![0.0; 2];

        mixer.render(&mut block);
        assert_eq!(block, vec![1.0, 1.0]);
    }

    #[test]
    fn full_voice_queue_rejects_new_voices() {
        let (queue, mut mixer) = mixer(10, 2);
        let first = queue.add(vec![0.1; 2], 0.0).unwrap();
        queue.add(vec![0.1; 2], 0.2).unwrap();

        let err = queue.add(vec![0.1; 2], 0.4).unwrap_err();
        assert!(matches!(err, LiveError::MediaAccess { .. }));

        // The callback picks queued voices up, freeing room
        let mut block = vec![0.0; 1];
        mixer.render(&mut block);
        let third = queue.add(vec![0.1; 2], 0.4).unwrap();
        assert_ne!(third.id, first.id);
    }

    #[test]
    fn scheduling_from_another_thread_reaches_the_callback() {
        let (queue, mut mixer) = mixer(10, 8);
        let queue = Arc::new(queue);

        let scheduler = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.add(vec![0.5; 2], 0.0).unwrap())
        };
        let mut source = scheduler.join().unwrap();

        let mut block = vec![0.0; 4];
        mixer.render(&mut block);
        assert_eq!(block, vec![0.5, 0.5, 0.0, 0.0]);
        assert!(source.ended.try_recv().is_ok());
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[0.5f32, -0.5]), 0.0);
        assert!((downmix(&[i16::MAX, i16::MAX]) - 1.0).abs() < 1e-3);
    }
}
