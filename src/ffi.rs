// C ABI for the playback engine
// Handles are opaque non-zero ids resolved through a process-wide registry;
// an unknown id is InvalidHandle, never a dereference. Failure detail travels
// through the thread-scoped error channel (`last_error`), so every return
// value here stays a plain integer, float, or borrowed pointer.

use std::collections::HashMap;
use std::os::raw::c_char;
use std::sync::Once;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{PlayerError, Result};
use crate::last_error::{self, INSUFFICIENT_CAPACITY};
use crate::player::Player;

static PLAYER_REGISTRY: Lazy<Mutex<HashMap<i64, Player>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_HANDLE: Lazy<Mutex<i64>> = Lazy::new(|| Mutex::new(1));
static INIT_LOGGER: Once = Once::new();

fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .try_init();
    });
}

fn register_player(player: Player) -> i64 {
    init_logging();
    let mut next = NEXT_HANDLE.lock();
    let handle = *next;
    *next += 1;
    drop(next);

    PLAYER_REGISTRY.lock().insert(handle, player);
    log::info!("created player handle {}", handle);
    handle
}

/// Surface a failure a dead playback worker left behind: forward it to the
/// error channel of whichever thread is asking now.
fn forward_background_error(player: &Player) {
    if let Some(err) = player.take_background_error() {
        log::warn!("forwarding background playback error: {}", err);
        last_error::record_error(&err);
    }
}

fn with_player<R>(handle: i64, f: impl FnOnce(&Player) -> Result<R>) -> Result<R> {
    let registry = PLAYER_REGISTRY.lock();
    let player = registry.get(&handle).ok_or(PlayerError::InvalidHandle)?;
    forward_background_error(player);
    f(player)
}

fn with_player_mut<R>(handle: i64, f: impl FnOnce(&mut Player) -> Result<R>) -> Result<R> {
    let mut registry = PLAYER_REGISTRY.lock();
    let player = registry.get_mut(&handle).ok_or(PlayerError::InvalidHandle)?;
    forward_background_error(player);
    f(player)
}

fn to_code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            log::error!("operation failed: {}", err);
            last_error::record_error(&err);
            err.code()
        }
    }
}

/// Allocate an inert player. Returns its handle (> 0).
#[no_mangle]
pub extern "C" fn tonearm_player_new() -> i64 {
    register_player(Player::new())
}

/// Release a player. Exactly-once: the handle is dead afterwards.
#[no_mangle]
pub extern "C" fn tonearm_player_free(handle: i64) -> i32 {
    let player = PLAYER_REGISTRY.lock().remove(&handle);
    match player {
        Some(player) => {
            // Dropping joins any live worker; keep that outside the registry
            // lock so other players stay reachable meanwhile.
            drop(player);
            log::info!("freed player handle {}", handle);
            0
        }
        None => to_code(Err(PlayerError::InvalidHandle)),
    }
}

/// Open a file for playback. `0` on success, negative code on failure.
#[no_mangle]
pub extern "C" fn tonearm_player_open(handle: i64, path: *const c_char) -> i32 {
    if path.is_null() {
        return to_code(Err(PlayerError::IoFailure("path pointer is null".to_string())));
    }
    let path = match unsafe { std::ffi::CStr::from_ptr(path) }.to_str() {
        Ok(path) => path,
        Err(_) => {
            return to_code(Err(PlayerError::IoFailure(
                "path is not valid UTF-8".to_string(),
            )));
        }
    };
    to_code(with_player_mut(handle, |player| player.open(path)))
}

#[no_mangle]
pub extern "C" fn tonearm_player_play(handle: i64) -> i32 {
    to_code(with_player_mut(handle, |player| player.play()))
}

#[no_mangle]
pub extern "C" fn tonearm_player_pause(handle: i64) -> i32 {
    to_code(with_player(handle, |player| player.pause()))
}

#[no_mangle]
pub extern "C" fn tonearm_player_stop(handle: i64) -> i32 {
    to_code(with_player(handle, |player| player.stop()))
}

#[no_mangle]
pub extern "C" fn tonearm_player_seek(handle: i64, position_us: i64) -> i32 {
    to_code(with_player(handle, |player| player.seek(position_us)))
}

/// Average bitrate in bits per second, `0` if unknown or the handle is dead.
#[no_mangle]
pub extern "C" fn tonearm_player_get_bitrate(handle: i64) -> u32 {
    with_player(handle, |player| Ok(player.bitrate())).unwrap_or_else(|err| {
        last_error::record_error(&err);
        0
    })
}

/// Stream duration in microseconds, negative if unknown or unopened.
#[no_mangle]
pub extern "C" fn tonearm_player_get_duration(handle: i64) -> i64 {
    with_player(handle, |player| Ok(player.duration_us())).unwrap_or_else(|err| {
        last_error::record_error(&err);
        -1
    })
}

/// Audible playback position in microseconds.
#[no_mangle]
pub extern "C" fn tonearm_player_get_current_time(handle: i64) -> i64 {
    with_player(handle, |player| Ok(player.current_time_us())).unwrap_or_else(|err| {
        last_error::record_error(&err);
        -1
    })
}

/// `1` while actively producing output, else `0` (Paused reports `0`).
#[no_mangle]
pub extern "C" fn tonearm_player_is_playing(handle: i64) -> i32 {
    with_player(handle, |player| Ok(player.is_playing()))
        .map(|playing| if playing { 1 } else { 0 })
        .unwrap_or_else(|err| {
            last_error::record_error(&err);
            0
        })
}

/// Last explicitly set volume, regardless of mute state.
#[no_mangle]
pub extern "C" fn tonearm_player_get_volume(handle: i64) -> f32 {
    with_player(handle, |player| Ok(player.volume())).unwrap_or_else(|err| {
        last_error::record_error(&err);
        0.0
    })
}

#[no_mangle]
pub extern "C" fn tonearm_player_set_volume(handle: i64, volume: f32) -> i32 {
    to_code(with_player_mut(handle, |player| player.set_volume(volume)))
}

#[no_mangle]
pub extern "C" fn tonearm_player_set_mute(handle: i64, mute: i32) -> i32 {
    to_code(with_player(handle, |player| player.set_mute(mute != 0)))
}

/// Borrowed pointer to the embedded cover image, null if none.
///
/// Pair with [`tonearm_player_get_album_cover_size`]; the bytes stay valid
/// until the next `open` on this handle or `free`.
#[no_mangle]
pub extern "C" fn tonearm_player_get_album_cover(handle: i64) -> *const u8 {
    with_player(handle, |player| Ok(player.album_cover_ptr())).unwrap_or(std::ptr::null())
}

#[no_mangle]
pub extern "C" fn tonearm_player_get_album_cover_size(handle: i64) -> u32 {
    with_player(handle, |player| Ok(player.album_cover_size())).unwrap_or(0)
}

/// Empty the calling thread's error slot.
#[no_mangle]
pub extern "C" fn tonearm_clear_last_error() {
    last_error::clear_last_error();
}

/// Length of the calling thread's last error in UTF-8 code units.
#[no_mangle]
pub extern "C" fn tonearm_last_error_length() -> i32 {
    last_error::last_error_length()
}

/// Length of the calling thread's last error in UTF-16 code units.
#[no_mangle]
pub extern "C" fn tonearm_last_error_length_utf16() -> i32 {
    last_error::last_error_length_utf16()
}

/// Copy the last error into `buf` as UTF-8. All-or-nothing; returns bytes
/// written, `0` with no error set, or `-1` on a null/undersized buffer.
#[no_mangle]
pub extern "C" fn tonearm_error_message_utf8(buf: *mut c_char, capacity: i32) -> i32 {
    if buf.is_null() || capacity < 0 {
        return INSUFFICIENT_CAPACITY;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buf as *mut u8, capacity as usize) };
    last_error::copy_message_utf8(buf)
}

/// UTF-16 variant of [`tonearm_error_message_utf8`]; capacity and the return
/// value are in UTF-16 code units.
#[no_mangle]
pub extern "C" fn tonearm_error_message_utf16(buf: *mut u16, capacity: i32) -> i32 {
    if buf.is_null() || capacity < 0 {
        return INSUFFICIENT_CAPACITY;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buf, capacity as usize) };
    last_error::copy_message_utf16(buf)
}
