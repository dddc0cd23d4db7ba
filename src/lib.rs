// Local-file audio playback engine with a C-compatible control surface.
//
// Pipeline: a file is probed and decoded with Symphonia, a background worker
// feeds a bounded PCM ring buffer, and a cpal output stream drains it while
// the playback clock tracks frames actually delivered to the device. Foreign
// callers drive everything through the opaque handles in `ffi` and read
// failure detail back through the thread-scoped `last_error` channel.

pub mod decoder;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod last_error;
pub mod metadata;
pub mod player;
pub mod ringbuffer;

// Re-exports
pub use decoder::{AudioDecoder, PcmFrame};
pub use engine::{PlaybackEngine, Transport};
pub use error::{PlayerError, Result};
pub use metadata::MediaInfo;
pub use player::Player;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_player_is_inert() {
        let player = Player::new();
        assert!(!player.is_playing());
        assert_eq!(player.current_time_us(), 0);
    }
}
