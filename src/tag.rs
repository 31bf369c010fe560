//! Entry tag generation.
//!
//! An entry tag is a deterministic fingerprint of a value's serialized form.
//! It identifies cache entries and is sent as the precondition of conditional
//! remote fetches. It is collision-tolerant, not cryptographic.
//!
//! ```text
//! canonical JSON (sorted keys) ──► rolling hash (u32) ──► base-36, 7 chars
//! ```

use crate::key::canonical_json;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a content tag. `u32::MAX` in base 36 is `1z141z3`.
pub const TAG_LEN: usize = 7;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Compute the entry tag for a value.
///
/// Equal content always yields the same tag, whatever the field order of the
/// type it came from. Never fails: if the value cannot be serialized, a
/// timestamp+random tag is returned instead, which will simply never match on
/// a conditional fetch.
pub fn entry_tag<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(value) => tag_for_bytes(canonical_json(&value).as_bytes()),
        Err(e) => {
            warn!("Entry tag fallback, value not serializable: {}", e);
            fallback_tag()
        }
    }
}

/// Tag for already-serialized content.
pub fn tag_for_bytes(bytes: &[u8]) -> String {
    to_base36(fingerprint(bytes) as u64, TAG_LEN)
}

/// Shift-and-add rolling hash, `h = h * 31 + b` in 32-bit arithmetic.
pub fn fingerprint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |hash, &b| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(u32::from(b))
    })
}

fn fallback_tag() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    format!(
        "{}-{}",
        to_base36(now, 0),
        to_base36(u64::from(rand::random::<u32>()), 0)
    )
}

/// Render `value` in base 36, left-padded with zeros to `width`.
fn to_base36(mut value: u64, width: usize) -> String {
    let mut digits = Vec::with_capacity(width.max(13));
    loop {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.reverse();
    // Only ASCII digits were pushed.
    String::from_utf8(digits).unwrap_or_default()
}
