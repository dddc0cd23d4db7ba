// Playback engine
// Owns the transport state machine, the playback clock, and the background
// decode worker. The cpal stream is built, started, and dropped inside the
// worker thread, so no platform stream handle ever crosses threads.

use std::sync::atomic::{
    AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::decoder::AudioDecoder;
use crate::error::{PlayerError, Result};
use crate::ringbuffer::PcmRing;

/// Upper bound on buffered audio between decode and output, in seconds.
const RING_SECONDS: usize = 4;

/// Audio decoded ahead of the device before the stream starts, per session.
const PRE_BUFFER_MS: u32 = 100;

const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Transport states of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Transport {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl Transport {
    fn from_u8(value: u8) -> Transport {
        match value {
            1 => Transport::Playing,
            2 => Transport::Paused,
            _ => Transport::Stopped,
        }
    }
}

/// State shared between control threads, the decode worker, and the output
/// callback. Control operations arrive on arbitrary threads through a shared
/// reference, so every mutable field lives behind an atomic or a mutex.
pub struct EngineShared {
    transport: AtomicU8,
    stop_flag: AtomicBool,

    // Playback clock: base set by seek/stop, frames counted by the output
    // callback as it consumes the ring. Together they give the audible
    // position, not the decode-ahead position.
    clock_base_us: AtomicI64,
    played_frames: AtomicU64,
    sample_rate: AtomicU32,
    channels: AtomicUsize,

    volume_bits: AtomicU32,
    muted: AtomicBool,

    underrun_events: AtomicU64,
    underrun_frames: AtomicU64,

    ring: PcmRing,
    pending_error: Mutex<Option<PlayerError>>,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            transport: AtomicU8::new(Transport::Stopped as u8),
            stop_flag: AtomicBool::new(false),
            clock_base_us: AtomicI64::new(0),
            played_frames: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            channels: AtomicUsize::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            underrun_events: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            ring: PcmRing::new(2),
            pending_error: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> Transport {
        Transport::from_u8(self.transport.load(Ordering::SeqCst))
    }

    fn set_transport(&self, transport: Transport) {
        self.transport.store(transport as u8, Ordering::SeqCst);
    }

    /// Size the clock and ring for a newly opened stream.
    pub fn configure_stream(&self, sample_rate: u32, channels: usize) {
        self.sample_rate.store(sample_rate, Ordering::SeqCst);
        self.channels.store(channels, Ordering::SeqCst);
        self.ring
            .resize(sample_rate as usize * channels * RING_SECONDS);
    }

    /// Audible position in microseconds.
    pub fn position_us(&self) -> i64 {
        let rate = self.sample_rate.load(Ordering::SeqCst).max(1) as u64;
        let played = self.played_frames.load(Ordering::SeqCst);
        self.clock_base_us.load(Ordering::SeqCst)
            + (played.saturating_mul(1_000_000) / rate) as i64
    }

    /// Rebase the clock; the base is visible before this returns.
    pub fn reset_clock(&self, base_us: i64) {
        self.played_frames.store(0, Ordering::SeqCst);
        self.clock_base_us.store(base_us, Ordering::SeqCst);
    }

    pub fn ring(&self) -> &PcmRing {
        &self.ring
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.volume_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    // Mute is a silence gate in front of the stored volume.
    fn gain(&self) -> f32 {
        if self.muted() {
            0.0
        } else {
            self.volume()
        }
    }

    pub fn record_background_error(&self, err: PlayerError) {
        *self.pending_error.lock() = Some(err);
    }

    /// Drain the failure left behind by a dead worker, if any.
    pub fn take_background_error(&self) -> Option<PlayerError> {
        self.pending_error.lock().take()
    }

    pub fn underrun_events(&self) -> u64 {
        self.underrun_events.load(Ordering::Relaxed)
    }
}

/// Fill one output buffer from the ring, applying the volume/mute gain.
///
/// Runs on the real-time audio thread: no locks beyond the ring's own, no
/// blocking. While paused the queue is not drained, so resuming continues
/// from the exact sample where pause landed. A starved ring is an underrun:
/// the remainder is silence, counted but never fatal, and the clock only
/// advances by frames actually delivered.
fn fill_output(shared: &EngineShared, data: &mut [f32]) {
    if shared.transport() != Transport::Playing {
        data.fill(0.0);
        return;
    }

    let read = shared.ring.read(data);
    let gain = shared.gain();
    if (gain - 1.0).abs() > f32::EPSILON {
        for sample in &mut data[..read] {
            *sample *= gain;
        }
    }

    let channels = shared.channels.load(Ordering::SeqCst).max(1);
    if read < data.len() {
        data[read..].fill(0.0);
        shared.underrun_events.fetch_add(1, Ordering::Relaxed);
        shared
            .underrun_frames
            .fetch_add(((data.len() - read) / channels) as u64, Ordering::Relaxed);
    }
    shared
        .played_frames
        .fetch_add((read / channels) as u64, Ordering::SeqCst);
}

/// Transport control over the shared state plus the worker lifecycle.
///
/// One worker exists per playing session; `stop` joins it before returning,
/// so Stopped always means no residual background activity.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Spawn the decode worker for a new session and enter Playing.
    ///
    /// The worker opens the output device itself so that no platform audio
    /// handle has to cross a thread boundary; callers wanting a synchronous
    /// device check probe availability before calling this.
    pub fn start(&self, decoder: Arc<Mutex<Option<AudioDecoder>>>) -> Result<()> {
        // Collect a worker left over from a finished session first.
        self.join_worker();

        self.shared.stop_flag.store(false, Ordering::SeqCst);
        self.shared.set_transport(Transport::Playing);

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("tonearm-playback".to_string())
            .spawn(move || run_session(shared, decoder))
            .map_err(|e| {
                self.shared.set_transport(Transport::Stopped);
                PlayerError::IoFailure(format!("failed to spawn playback worker: {}", e))
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Playing -> Paused. Output is silenced, decode position frozen.
    pub fn pause(&self) {
        self.shared.set_transport(Transport::Paused);
    }

    /// Paused -> Playing without touching the position.
    pub fn resume(&self) {
        self.shared.set_transport(Transport::Playing);
    }

    /// Tear the session down and rewind the clock. The worker is joined
    /// before this returns; cancellation latency is bounded by one decode
    /// step.
    pub fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.join_worker();
        self.shared.stop_flag.store(false, Ordering::SeqCst);
        self.shared.set_transport(Transport::Stopped);
        self.shared.ring.clear();
        self.shared.reset_clock(0);
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker entry point. Failures land in the shared error slot; the engine
/// always leaves Stopped behind when the session ends on its own.
fn run_session(shared: Arc<EngineShared>, decoder: Arc<Mutex<Option<AudioDecoder>>>) {
    log::info!("playback worker started");
    if let Err(err) = session_loop(&shared, &decoder) {
        log::error!("playback worker failed: {}", err);
        shared.record_background_error(err);
    }
    shared.set_transport(Transport::Stopped);
    log::info!("playback worker exited");
}

fn session_loop(
    shared: &Arc<EngineShared>,
    decoder: &Arc<Mutex<Option<AudioDecoder>>>,
) -> Result<()> {
    let (sample_rate, channels) = {
        let guard = decoder.lock();
        let dec = guard.as_ref().ok_or(PlayerError::NoFileOpen)?;
        (dec.sample_rate(), dec.channels())
    };

    let device = cpal::default_host().default_output_device().ok_or_else(|| {
        PlayerError::OutputDeviceUnavailable("no default output device".to_string())
    })?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlayerError::OutputDeviceUnavailable(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(PlayerError::OutputDeviceUnavailable(format!(
            "unsupported device sample format {:?}",
            supported.sample_format()
        )));
    }

    let config = cpal::StreamConfig {
        channels: channels as cpal::ChannelCount,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    log::debug!("output stream config: {:?}", config);

    let shared_cb = shared.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_output(&shared_cb, data);
            },
            |err| log::warn!("output stream error: {}", err),
            None,
        )
        .map_err(|e| PlayerError::OutputDeviceUnavailable(e.to_string()))?;

    // Decode a little ahead so the device does not start on an empty ring.
    prebuffer(shared, decoder, sample_rate, channels)?;

    stream
        .play()
        .map_err(|e| PlayerError::OutputDeviceUnavailable(e.to_string()))?;

    let result = decode_loop(shared, decoder);

    let _ = stream.pause();
    drop(stream);
    result
}

fn prebuffer(
    shared: &EngineShared,
    decoder: &Arc<Mutex<Option<AudioDecoder>>>,
    sample_rate: u32,
    channels: usize,
) -> Result<()> {
    let target = (sample_rate * PRE_BUFFER_MS / 1000) as usize * channels;
    while shared.ring.len() < target && !shared.stop_flag.load(Ordering::SeqCst) {
        let frame = {
            let mut guard = decoder.lock();
            let dec = match guard.as_mut() {
                Some(dec) => dec,
                None => return Ok(()),
            };
            dec.next_frame()?
        };
        match frame {
            Some(frame) => {
                shared.ring.write(&frame.samples);
            }
            None => break,
        }
    }
    Ok(())
}

fn decode_loop(shared: &EngineShared, decoder: &Arc<Mutex<Option<AudioDecoder>>>) -> Result<()> {
    loop {
        if shared.stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        if shared.transport() == Transport::Paused {
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let frame = {
            let mut guard = decoder.lock();
            let dec = match guard.as_mut() {
                Some(dec) => dec,
                None => return Ok(()),
            };
            dec.next_frame()?
        };

        match frame {
            Some(frame) => push_samples(shared, &frame.samples),
            None => {
                drain_to_end(shared);
                return Ok(());
            }
        }
    }
}

/// Write a decoded frame into the ring, backing off while it is full.
fn push_samples(shared: &EngineShared, samples: &[f32]) {
    let mut written = 0;
    while written < samples.len() {
        if shared.stop_flag.load(Ordering::SeqCst) {
            return;
        }
        let n = shared.ring.write(&samples[written..]);
        if n == 0 {
            let backoff = if shared.ring.fullness() > 0.9 { 15 } else { 5 };
            thread::sleep(Duration::from_millis(backoff));
        } else {
            written += n;
        }
    }
}

/// Let the device finish what is buffered before the session ends.
fn drain_to_end(shared: &EngineShared) {
    log::info!("end of stream, draining ring");
    while !shared.ring.is_empty() && !shared.stop_flag.load(Ordering::SeqCst) {
        thread::sleep(IDLE_SLEEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_for(rate: u32, channels: usize) -> EngineShared {
        let shared = EngineShared::new();
        shared.configure_stream(rate, channels);
        shared
    }

    #[test]
    fn engine_starts_stopped() {
        let engine = PlaybackEngine::new();
        assert_eq!(engine.shared().transport(), Transport::Stopped);
        assert_eq!(engine.shared().position_us(), 0);
    }

    #[test]
    fn pause_resume_toggle_transport() {
        let engine = PlaybackEngine::new();
        engine.resume();
        assert_eq!(engine.shared().transport(), Transport::Playing);
        engine.pause();
        assert_eq!(engine.shared().transport(), Transport::Paused);
        engine.resume();
        assert_eq!(engine.shared().transport(), Transport::Playing);
    }

    #[test]
    fn stop_rewinds_clock_and_clears_ring() {
        let engine = PlaybackEngine::new();
        let shared = engine.shared();
        shared.configure_stream(48_000, 2);
        shared.ring().write(&[0.5; 256]);
        shared.reset_clock(750_000);
        engine.stop();
        assert_eq!(shared.transport(), Transport::Stopped);
        assert_eq!(shared.position_us(), 0);
        assert!(shared.ring().is_empty());
    }

    #[test]
    fn clock_counts_consumed_frames_only() {
        let shared = shared_for(1_000, 2);
        shared.set_transport(Transport::Playing);
        shared.ring().write(&[0.1; 500]);

        // 100 interleaved stereo samples = 50 frames = 50ms at 1kHz.
        let mut out = [0.0f32; 100];
        fill_output(&shared, &mut out);
        assert_eq!(shared.position_us(), 50_000);

        // Draining the rest moves the clock by what was actually read.
        let mut out = [0.0f32; 1000];
        fill_output(&shared, &mut out);
        assert_eq!(shared.position_us(), 250_000);
    }

    #[test]
    fn fill_applies_volume_gain() {
        let shared = shared_for(1_000, 1);
        shared.set_transport(Transport::Playing);
        shared.set_volume(0.5);
        shared.ring().write(&[1.0, 1.0]);

        let mut out = [0.0f32; 2];
        fill_output(&shared, &mut out);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn mute_silences_without_touching_volume() {
        let shared = shared_for(1_000, 1);
        shared.set_transport(Transport::Playing);
        shared.set_volume(0.7);
        shared.set_muted(true);
        shared.ring().write(&[1.0, 1.0]);

        let mut out = [0.5f32; 2];
        fill_output(&shared, &mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(shared.volume(), 0.7);

        shared.set_muted(false);
        assert_eq!(shared.volume(), 0.7);
    }

    #[test]
    fn paused_output_is_silence_and_ring_is_not_drained() {
        let shared = shared_for(1_000, 1);
        shared.set_transport(Transport::Paused);
        shared.ring().write(&[1.0; 8]);

        let mut out = [0.9f32; 4];
        fill_output(&shared, &mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(shared.ring().len(), 8);
        assert_eq!(shared.position_us(), 0);
    }

    #[test]
    fn underrun_fills_silence_and_holds_clock() {
        let shared = shared_for(1_000, 1);
        shared.set_transport(Transport::Playing);
        shared.ring().write(&[1.0, 1.0]);

        let mut out = [0.7f32; 6];
        fill_output(&shared, &mut out);
        assert_eq!(&out[2..], &[0.0; 4]);
        assert_eq!(shared.underrun_events(), 1);
        // Only the two delivered frames advance the clock.
        assert_eq!(shared.position_us(), 2_000);
    }

    #[test]
    fn volume_clamps_into_unit_range() {
        let shared = EngineShared::new();
        shared.set_volume(5.0);
        assert_eq!(shared.volume(), 1.0);
        shared.set_volume(-1.0);
        assert_eq!(shared.volume(), 0.0);
        shared.set_volume(f32::NAN);
        assert_eq!(shared.volume(), 0.0);
    }

    #[test]
    fn background_error_slot_is_drained_once() {
        let shared = EngineShared::new();
        shared.record_background_error(PlayerError::CorruptHeader("bad packet".to_string()));
        let err = shared.take_background_error().unwrap();
        assert_eq!(err.code(), -4);
        assert!(shared.take_background_error().is_none());
    }

    #[test]
    fn seek_rebase_is_visible_immediately() {
        let shared = shared_for(48_000, 2);
        shared.reset_clock(2_500_000);
        assert_eq!(shared.position_us(), 2_500_000);
    }
}
