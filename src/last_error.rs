// Thread-scoped last-error storage
// Fallible operations record their failure text here so foreign callers can
// retrieve it with the two-step size-then-fill protocol: the callee never
// allocates memory the caller's runtime would have to free.

use std::cell::RefCell;
use std::fmt::Display;

/// Returned by the fill operations when the caller's buffer cannot hold the
/// whole message. Nothing is written in that case.
pub const INSUFFICIENT_CAPACITY: i32 = -1;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Overwrite the calling thread's last error with `err`'s display text.
pub fn record_error<E: Display>(err: &E) {
    let message = err.to_string();
    log::debug!("recording error on current thread: {}", message);
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(message);
    });
}

/// Empty the calling thread's error slot. Never fails.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

/// Length of the current message in UTF-8 code units, `0` if none is set.
pub fn last_error_length() -> i32 {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|msg| msg.len() as i32)
            .unwrap_or(0)
    })
}

/// Length of the current message in UTF-16 code units, `0` if none is set.
pub fn last_error_length_utf16() -> i32 {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|msg| msg.encode_utf16().count() as i32)
            .unwrap_or(0)
    })
}

/// Copy the current message into `buf` as UTF-8.
///
/// All-or-nothing: returns the number of bytes written, `0` if no error is
/// set, or [`INSUFFICIENT_CAPACITY`] (leaving `buf` untouched) if the full
/// message does not fit. No NUL terminator is appended.
pub fn copy_message_utf8(buf: &mut [u8]) -> i32 {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let message = match slot.as_ref() {
            Some(msg) => msg.as_bytes(),
            None => return 0,
        };
        if message.len() > buf.len() {
            return INSUFFICIENT_CAPACITY;
        }
        buf[..message.len()].copy_from_slice(message);
        message.len() as i32
    })
}

/// Copy the current message into `buf` as UTF-16 code units.
///
/// Same contract as [`copy_message_utf8`], with capacity and the return value
/// measured in UTF-16 code units.
pub fn copy_message_utf16(buf: &mut [u16]) -> i32 {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let message = match slot.as_ref() {
            Some(msg) => msg,
            None => return 0,
        };
        let needed = message.encode_utf16().count();
        if needed > buf.len() {
            return INSUFFICIENT_CAPACITY;
        }
        for (dst, unit) in buf.iter_mut().zip(message.encode_utf16()) {
            *dst = unit;
        }
        needed as i32
    })
}
