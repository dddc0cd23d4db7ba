// Stream metadata extraction
// Runs once at open time against the probed container; everything here is
// write-once for the lifetime of the opened file.

use symphonia::core::codecs::CodecParameters;
use symphonia::core::meta::{MetadataRevision, StandardVisualKey};
use symphonia::core::probe::ProbeResult;

use crate::error::{PlayerError, Result};

/// Duration sentinel when the container does not declare a length.
pub const DURATION_UNKNOWN: i64 = -1;

/// Per-file stream parameters captured at open time
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Total stream length in microseconds, [`DURATION_UNKNOWN`] if absent
    pub duration_us: i64,

    /// Average bitrate in bits per second, `0` if unknown
    pub bitrate_bps: u32,

    /// Decoded sample rate
    pub sample_rate: u32,

    /// Decoded channel count
    pub channels: u16,

    /// First embedded cover image, if the container carries one
    pub cover: Option<Vec<u8>>,
}

/// Extract stream parameters and tags from a freshly probed container.
///
/// `source_len` is the total encoded size in bytes, used to estimate the
/// bitrate when the container does not store one.
pub fn extract(probed: &mut ProbeResult, source_len: Option<u64>) -> Result<MediaInfo> {
    let track = probed
        .format
        .default_track()
        .ok_or_else(|| PlayerError::UnsupportedFormat("no default audio track".to_string()))?;

    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| PlayerError::UnsupportedFormat("sample rate not declared".to_string()))?;
    let channels = params
        .channels
        .ok_or_else(|| PlayerError::UnsupportedFormat("channel layout not declared".to_string()))?
        .count() as u16;

    let duration_us = duration_us_from_params(params).unwrap_or(DURATION_UNKNOWN);
    let bitrate_bps = source_len
        .map(|len| estimate_bitrate(len, duration_us))
        .unwrap_or(0);

    // Tag metadata can surface either at the probe layer (e.g. ID3v2 read
    // ahead of the container) or inside the format reader itself.
    let mut cover = probed
        .metadata
        .get()
        .as_ref()
        .and_then(|m| m.current())
        .and_then(select_cover);
    if cover.is_none() {
        cover = probed.format.metadata().current().and_then(select_cover);
    }

    log::info!(
        "extracted metadata: {}Hz, {} channels, duration {}us, bitrate {}bps, cover {}",
        sample_rate,
        channels,
        duration_us,
        bitrate_bps,
        cover.as_ref().map(|c| c.len()).unwrap_or(0),
    );

    Ok(MediaInfo {
        duration_us,
        bitrate_bps,
        sample_rate,
        channels,
        cover,
    })
}

/// Stream length in microseconds from codec metadata, `None` when the
/// container does not provide total frames and a usable rate.
fn duration_us_from_params(params: &CodecParameters) -> Option<i64> {
    let frames = params.n_frames?;
    if let Some(tb) = params.time_base {
        let time = tb.calc_time(frames);
        return Some(time.seconds as i64 * 1_000_000 + (time.frac * 1_000_000.0).round() as i64);
    }
    let rate = params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some((frames.saturating_mul(1_000_000) / rate) as i64)
}

/// Average bitrate as `(encoded bytes * 8) / duration`, rounded to the
/// nearest integer; `0` when the duration is unknown.
fn estimate_bitrate(source_len: u64, duration_us: i64) -> u32 {
    if duration_us <= 0 {
        return 0;
    }
    let bits = source_len as u128 * 8 * 1_000_000;
    let dur = duration_us as u128;
    ((bits + dur / 2) / dur) as u32
}

/// Pick the front cover when tagged as such, otherwise the first visual.
fn select_cover(rev: &MetadataRevision) -> Option<Vec<u8>> {
    let mut best = rev
        .visuals()
        .iter()
        .find(|visual| visual.usage == Some(StandardVisualKey::FrontCover));
    if best.is_none() {
        best = rev.visuals().first();
    }
    best.map(|visual| visual.data.to_vec())
}
