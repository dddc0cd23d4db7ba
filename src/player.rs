// Player: one opened file, one transport, one playback session at a time.
// pause/stop/seek/set_mute arrive on a shared reference from arbitrary
// threads, so everything they touch is interior-synchronized.

use std::path::Path;
use std::sync::Arc;

use cpal::traits::HostTrait;
use parking_lot::Mutex;

use crate::decoder::AudioDecoder;
use crate::engine::{PlaybackEngine, Transport};
use crate::error::{PlayerError, Result};
use crate::metadata::{MediaInfo, DURATION_UNKNOWN};

pub struct Player {
    media: Mutex<Option<MediaInfo>>,
    // Shared with the decode worker; locked per frame on that side.
    decoder: Arc<Mutex<Option<AudioDecoder>>>,
    engine: PlaybackEngine,
}

impl Player {
    /// An inert player: nothing open, transport Stopped.
    pub fn new() -> Self {
        Self {
            media: Mutex::new(None),
            decoder: Arc::new(Mutex::new(None)),
            engine: PlaybackEngine::new(),
        }
    }

    /// Open `path`, replacing any previously opened file.
    ///
    /// Tears down a session left over from the prior file (the worker is
    /// joined before its decoder is dropped), probes the new file, and
    /// leaves the player Stopped at position zero.
    pub fn open(&mut self, path: &str) -> Result<()> {
        log::info!("opening {}", path);
        self.engine.stop();
        *self.decoder.lock() = None;
        *self.media.lock() = None;
        // A failure from the torn-down session is no longer meaningful.
        let _ = self.engine.shared().take_background_error();

        let (decoder, info) = AudioDecoder::open(Path::new(path))?;
        self.engine
            .shared()
            .configure_stream(info.sample_rate, info.channels as usize);
        self.engine.shared().reset_clock(0);

        *self.decoder.lock() = Some(decoder);
        *self.media.lock() = Some(info);
        Ok(())
    }

    /// Start or resume playback from the current position.
    pub fn play(&mut self) -> Result<()> {
        match self.engine.shared().transport() {
            Transport::Playing => Ok(()),
            Transport::Paused => {
                self.engine.resume();
                Ok(())
            }
            Transport::Stopped => {
                if self.media.lock().is_none() {
                    return Err(PlayerError::NoFileOpen);
                }
                // Synchronous availability check; the worker opens the
                // device again on its own thread.
                if cpal::default_host().default_output_device().is_none() {
                    return Err(PlayerError::OutputDeviceUnavailable(
                        "no default output device".to_string(),
                    ));
                }
                self.engine.start(self.decoder.clone())
            }
        }
    }

    /// Suspend output, freezing the position. Fails unless Playing.
    pub fn pause(&self) -> Result<()> {
        if self.engine.shared().transport() != Transport::Playing {
            return Err(PlayerError::NotPlaying);
        }
        self.engine.pause();
        Ok(())
    }

    /// Halt playback and rewind to the start of the stream.
    pub fn stop(&self) -> Result<()> {
        self.engine.stop();
        if let Some(decoder) = self.decoder.lock().as_mut() {
            let _ = decoder.seek_to(0);
        }
        Ok(())
    }

    /// Reposition without changing the transport state.
    ///
    /// The clock is rebased under the decoder lock, so a worker mid-session
    /// cannot deliver a stale pre-seek position once this returns.
    pub fn seek(&self, position_us: i64) -> Result<()> {
        let mut guard = self.decoder.lock();
        let decoder = guard.as_mut().ok_or(PlayerError::NoFileOpen)?;
        let landed = decoder.seek_to(position_us)?;
        self.engine.shared().ring().clear();
        self.engine.shared().reset_clock(landed);
        Ok(())
    }

    pub fn bitrate(&self) -> u32 {
        self.media
            .lock()
            .as_ref()
            .map(|info| info.bitrate_bps)
            .unwrap_or(0)
    }

    pub fn duration_us(&self) -> i64 {
        self.media
            .lock()
            .as_ref()
            .map(|info| info.duration_us)
            .unwrap_or(DURATION_UNKNOWN)
    }

    /// Audible position; never past a known duration.
    pub fn current_time_us(&self) -> i64 {
        let position = self.engine.shared().position_us();
        match self.duration_us() {
            duration if duration >= 0 => position.min(duration),
            _ => position,
        }
    }

    /// True only while actively producing output (Paused reports false).
    pub fn is_playing(&self) -> bool {
        self.engine.shared().transport() == Transport::Playing
    }

    pub fn volume(&self) -> f32 {
        self.engine.shared().volume()
    }

    /// Clamp into `[0.0, 1.0]` and apply as output gain.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.engine.shared().set_volume(volume);
        Ok(())
    }

    /// Gate the output without touching the stored volume.
    pub fn set_mute(&self, muted: bool) -> Result<()> {
        self.engine.shared().set_muted(muted);
        Ok(())
    }

    pub fn album_cover_size(&self) -> u32 {
        self.media
            .lock()
            .as_ref()
            .and_then(|info| info.cover.as_ref())
            .map(|cover| cover.len() as u32)
            .unwrap_or(0)
    }

    /// Pointer to the embedded cover bytes, null if none.
    ///
    /// The allocation is owned by this player and stays put until the next
    /// `open` or the player is freed.
    pub fn album_cover_ptr(&self) -> *const u8 {
        self.media
            .lock()
            .as_ref()
            .and_then(|info| info.cover.as_ref())
            .map(|cover| cover.as_ptr())
            .unwrap_or(std::ptr::null())
    }

    /// Failure left behind by a dead playback worker, if any.
    ///
    /// The worker cannot reach the error slot of whichever thread will ask,
    /// so it parks the failure here; the control surface forwards it to the
    /// calling thread's error state on the next operation.
    pub fn take_background_error(&self) -> Option<PlayerError> {
        self.engine.shared().take_background_error()
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.engine.stop();
    }
}
