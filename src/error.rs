// Error types for the playback engine
// Every variant maps to a stable negative return code for the C boundary.

use std::fmt;

use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};

/// Playback engine error types
#[derive(Debug, Clone)]
pub enum PlayerError {
    /// Handle does not refer to a live player
    InvalidHandle,

    /// Source file does not exist or cannot be opened
    FileNotFound(String),

    /// Container/codec not recognized by the decode backend
    UnsupportedFormat(String),

    /// Container recognized but its headers/packets are malformed
    CorruptHeader(String),

    /// I/O failure while reading the source
    IoFailure(String),

    /// Operation requires an opened file
    NoFileOpen,

    /// Operation requires active playback
    NotPlaying,

    /// No usable output device, or the device rejected the stream
    OutputDeviceUnavailable(String),

    /// Seek target lies outside the known stream duration
    SeekOutOfRange(String),

    /// Source does not support random access
    SeekUnsupported(String),
}

impl PlayerError {
    /// Stable return code for the C boundary. `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            PlayerError::InvalidHandle => -1,
            PlayerError::FileNotFound(_) => -2,
            PlayerError::UnsupportedFormat(_) => -3,
            PlayerError::CorruptHeader(_) => -4,
            PlayerError::IoFailure(_) => -5,
            PlayerError::NoFileOpen => -6,
            PlayerError::NotPlaying => -7,
            PlayerError::OutputDeviceUnavailable(_) => -8,
            PlayerError::SeekOutOfRange(_) => -9,
            PlayerError::SeekUnsupported(_) => -10,
        }
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlayerError::InvalidHandle => write!(f, "Invalid player handle"),
            PlayerError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            PlayerError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            PlayerError::CorruptHeader(msg) => write!(f, "Corrupt stream: {}", msg),
            PlayerError::IoFailure(msg) => write!(f, "IO error: {}", msg),
            PlayerError::NoFileOpen => write!(f, "No file open"),
            PlayerError::NotPlaying => write!(f, "Not playing"),
            PlayerError::OutputDeviceUnavailable(msg) => {
                write!(f, "Output device unavailable: {}", msg)
            }
            PlayerError::SeekOutOfRange(msg) => write!(f, "Seek out of range: {}", msg),
            PlayerError::SeekUnsupported(msg) => write!(f, "Seek unsupported: {}", msg),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, PlayerError>;

// Conversion implementations
impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            PlayerError::FileNotFound(err.to_string())
        } else {
            PlayerError::IoFailure(err.to_string())
        }
    }
}

impl From<SymphoniaError> for PlayerError {
    fn from(err: SymphoniaError) -> Self {
        match err {
            SymphoniaError::IoError(e) => PlayerError::IoFailure(e.to_string()),
            SymphoniaError::Unsupported(what) => PlayerError::UnsupportedFormat(what.to_string()),
            SymphoniaError::DecodeError(what) => PlayerError::CorruptHeader(what.to_string()),
            SymphoniaError::LimitError(what) => PlayerError::CorruptHeader(what.to_string()),
            SymphoniaError::ResetRequired => {
                PlayerError::CorruptHeader("decoder reset required".to_string())
            }
            SymphoniaError::SeekError(kind) => match kind {
                SeekErrorKind::OutOfRange => {
                    PlayerError::SeekOutOfRange("target past end of stream".to_string())
                }
                SeekErrorKind::Unseekable | SeekErrorKind::ForwardOnly => {
                    PlayerError::SeekUnsupported("source does not support random access".to_string())
                }
                SeekErrorKind::InvalidTrack => {
                    PlayerError::SeekUnsupported("no seekable track".to_string())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_negative() {
        let cases: Vec<(PlayerError, i32)> = vec![
            (PlayerError::InvalidHandle, -1),
            (PlayerError::FileNotFound(String::new()), -2),
            (PlayerError::UnsupportedFormat(String::new()), -3),
            (PlayerError::CorruptHeader(String::new()), -4),
            (PlayerError::IoFailure(String::new()), -5),
            (PlayerError::NoFileOpen, -6),
            (PlayerError::NotPlaying, -7),
            (PlayerError::OutputDeviceUnavailable(String::new()), -8),
            (PlayerError::SeekOutOfRange(String::new()), -9),
            (PlayerError::SeekUnsupported(String::new()), -10),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn io_not_found_maps_to_file_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.flac");
        let err: PlayerError = io.into();
        assert_eq!(err.code(), -2);
        assert!(err.to_string().contains("missing.flac"));
    }

    #[test]
    fn io_other_maps_to_io_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PlayerError = io.into();
        assert_eq!(err.code(), -5);
    }

    #[test]
    fn symphonia_seek_kinds_map_to_seek_errors() {
        let err: PlayerError = SymphoniaError::SeekError(SeekErrorKind::OutOfRange).into();
        assert_eq!(err.code(), -9);
        let err: PlayerError = SymphoniaError::SeekError(SeekErrorKind::Unseekable).into();
        assert_eq!(err.code(), -10);
    }
}
