// Decode pipeline built on Symphonia
// Produces timestamped interleaved f32 frames and supports accurate seeking.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{PlayerError, Result};
use crate::metadata::{self, MediaInfo};

// Isolated decode errors are recoverable; give up after this many in a row.
const MAX_DECODE_RETRIES: u32 = 3;

/// One packet's worth of decoded audio
pub struct PcmFrame {
    /// Interleaved `f32` samples
    pub samples: Vec<f32>,
    /// Presentation timestamp of the first sample, in microseconds
    pub pts_us: i64,
}

/// Pull-based decoder over a probed container.
///
/// The sequence is finite: `next_frame` returns `Ok(None)` at end of stream
/// and only an explicit [`AudioDecoder::seek_to`] restarts it.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    channels: usize,
    duration_us: i64,
    // After a seek: discard decoded samples before this track timestamp.
    skip_until_ts: Option<u64>,
}

impl std::fmt::Debug for AudioDecoder {
    // `format`/`decoder` are trait objects without `Debug`; summarize the rest.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDecoder")
            .field("track_id", &self.track_id)
            .field("time_base", &self.time_base)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_us", &self.duration_us)
            .field("skip_until_ts", &self.skip_until_ts)
            .finish_non_exhaustive()
    }
}

impl AudioDecoder {
    /// Probe `path`, extract its metadata, and set up decoding for the
    /// default audio track.
    pub fn open(path: &Path) -> Result<(Self, MediaInfo)> {
        let file = File::open(path).map_err(PlayerError::from)?;
        let source_len = file.metadata().ok().map(|m| m.len());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                // Running out of bytes while still searching for a container
                // marker means the data is not a recognizable format.
                SymphoniaError::IoError(ref io)
                    if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    PlayerError::UnsupportedFormat(
                        "could not identify container format".to_string(),
                    )
                }
                other => other.into(),
            })?;

        let info = metadata::extract(&mut probed, source_len)?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| PlayerError::UnsupportedFormat("no default audio track".to_string()))?;
        let track_id = track.id;
        let time_base = track.codec_params.time_base;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(PlayerError::from)?;

        log::info!(
            "decoder ready for {:?}: track {} at {}Hz",
            path,
            track_id,
            info.sample_rate
        );

        Ok((
            Self {
                format,
                decoder,
                track_id,
                time_base,
                sample_rate: info.sample_rate,
                channels: info.channels as usize,
                duration_us: info.duration_us,
                skip_until_ts: None,
            },
            info,
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decode the next frame of the selected track.
    ///
    /// Returns `Ok(None)` at end of stream. Packets from other tracks are
    /// skipped, and up to [`MAX_DECODE_RETRIES`] consecutive packet-level
    /// decode errors are tolerated before giving up.
    pub fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        let mut decode_errors = 0u32;
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let packet_ts = packet.ts();
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(what)) => {
                    decode_errors += 1;
                    if decode_errors > MAX_DECODE_RETRIES {
                        return Err(PlayerError::CorruptHeader(what.to_string()));
                    }
                    log::warn!("dropping undecodable packet: {}", what);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let frames = decoded.frames() as u64;
            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            let mut samples = sample_buf.samples().to_vec();
            let mut pts = packet_ts;

            if let Some(target) = self.skip_until_ts {
                if packet_ts + frames <= target {
                    continue;
                }
                if packet_ts < target {
                    let skip = (target - packet_ts) as usize * self.channels;
                    samples.drain(..skip.min(samples.len()));
                    pts = target;
                }
                self.skip_until_ts = None;
            }

            return Ok(Some(PcmFrame {
                samples,
                pts_us: self.ts_to_us(pts),
            }));
        }
    }

    /// Reposition to `position_us`.
    ///
    /// Seeks the container to the sync point at or before the target, resets
    /// the codec, and arranges for samples before the target to be discarded,
    /// so the next delivered frame starts at the requested timestamp. Returns
    /// the landed position. Negative targets clamp to zero; targets past a
    /// known duration fail with `SeekOutOfRange` without moving the stream.
    pub fn seek_to(&mut self, position_us: i64) -> Result<i64> {
        if self.duration_us >= 0 && position_us > self.duration_us {
            return Err(PlayerError::SeekOutOfRange(format!(
                "{}us past end of {}us stream",
                position_us, self.duration_us
            )));
        }
        let target_us = position_us.max(0);
        let time = Time::from(target_us as f64 / 1_000_000.0);

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(PlayerError::from)?;

        self.decoder.reset();
        self.skip_until_ts = Some(seeked.required_ts);

        let landed = self.ts_to_us(seeked.required_ts);
        log::debug!(
            "seek to {}us landed at {}us (sync point {}us)",
            target_us,
            landed,
            self.ts_to_us(seeked.actual_ts)
        );
        Ok(landed)
    }

    fn ts_to_us(&self, ts: u64) -> i64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds as i64 * 1_000_000 + (time.frac * 1_000_000.0).round() as i64
            }
            None => (ts.saturating_mul(1_000_000) / self.sample_rate.max(1) as u64) as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const RATE: u32 = 8_000;
    const FRAMES: u32 = 8_000; // exactly one second

    /// Write a canonical 16-bit mono PCM WAV into the temp dir.
    fn write_wav_fixture(tag: &str) -> PathBuf {
        let data_len = FRAMES * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&RATE.to_le_bytes());
        bytes.extend_from_slice(&(RATE * 2).to_le_bytes()); // byte rate
        bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
        bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..FRAMES {
            let sample = ((i % 100) as i16 - 50) * 200;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let path = std::env::temp_dir().join(format!(
            "tonearm-decoder-{}-{}.wav",
            tag,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, &bytes).unwrap();
        path
    }

    #[test]
    fn open_reports_stream_parameters() {
        let path = write_wav_fixture("params");
        let (decoder, info) = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.sample_rate(), RATE);
        assert_eq!(decoder.channels(), 1);
        assert_eq!(info.duration_us, 1_000_000);
        // 44-byte header + 16000 data bytes over exactly one second.
        assert_eq!(info.bitrate_bps, 16_044 * 8);
        assert!(info.cover.is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn decodes_every_frame_then_ends() {
        let path = write_wav_fixture("drain");
        let (mut decoder, _) = AudioDecoder::open(&path).unwrap();

        let mut total = 0usize;
        let mut first_pts = None;
        while let Some(frame) = decoder.next_frame().unwrap() {
            first_pts.get_or_insert(frame.pts_us);
            total += frame.samples.len();
        }
        assert_eq!(first_pts, Some(0));
        assert_eq!(total, FRAMES as usize);
        // End of stream is terminal, not an error.
        assert!(decoder.next_frame().unwrap().is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_lands_on_requested_timestamp() {
        let path = write_wav_fixture("seek");
        let (mut decoder, _) = AudioDecoder::open(&path).unwrap();

        let landed = decoder.seek_to(500_000).unwrap();
        assert_eq!(landed, 500_000);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.pts_us, 500_000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_past_end_fails_without_moving() {
        let path = write_wav_fixture("range");
        let (mut decoder, _) = AudioDecoder::open(&path).unwrap();

        let err = decoder.seek_to(2_000_000).unwrap_err();
        assert_eq!(err.code(), -9);
        // Stream still starts at zero.
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.pts_us, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn seek_to_zero_restarts_after_end() {
        let path = write_wav_fixture("restart");
        let (mut decoder, _) = AudioDecoder::open(&path).unwrap();
        while decoder.next_frame().unwrap().is_some() {}

        decoder.seek_to(0).unwrap();
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.pts_us, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn negative_seek_clamps_to_start() {
        let path = write_wav_fixture("clamp");
        let (mut decoder, _) = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.seek_to(-5).unwrap(), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = AudioDecoder::open(Path::new("/nonexistent/track.flac")).unwrap_err();
        assert_eq!(err.code(), -2);
    }

    #[test]
    fn garbage_file_is_unsupported() {
        let path = std::env::temp_dir().join(format!(
            "tonearm-decoder-garbage-{}.bin",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, b"definitely not audio data").unwrap();
        let err = AudioDecoder::open(&path).unwrap_err();
        assert_eq!(err.code(), -3);
        let _ = std::fs::remove_file(&path);
    }
}
