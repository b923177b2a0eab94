use heapless::String;

use super::cursor::LfnFragment;
use super::{FatError, MAX_LFN_SLOTS, NAME_MAX};

/// Rejected characters for a path component, per the on-disk format.
const RESERVED_CHARS: &[u8] = b"\\/:*?\"<>|";

pub(crate) fn validate_component<E>(name: &str) -> Result<(), FatError<E>> {
    if name.is_empty() || name.chars().all(char::is_whitespace) {
        return Err(FatError::InvalidName);
    }
    if name.bytes().any(|b| RESERVED_CHARS.contains(&b)) {
        return Err(FatError::InvalidName);
    }
    if name.len() > NAME_MAX {
        return Err(FatError::NameTooLong);
    }
    Ok(())
}

pub(crate) fn short_name_checksum(short: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for byte in short.iter() {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(*byte);
    }
    sum
}

/// "NAME    EXT" -> "NAME.EXT". Returns the used length.
pub(crate) fn short_name_to_text(raw: &[u8; 11], out: &mut [u8; 12]) -> usize {
    let mut len = 0usize;
    for &b in &raw[0..8] {
        if b == b' ' {
            break;
        }
        out[len] = b;
        len += 1;
    }
    if raw[8..11].iter().any(|&b| b != b' ') {
        out[len] = b'.';
        len += 1;
        for &b in &raw[8..11] {
            if b == b' ' {
                break;
            }
            out[len] = b;
            len += 1;
        }
    }
    len
}

pub(crate) fn ascii_eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// Dot-delimited, case-insensitive comparison of a component against a raw
/// 8.3 entry name.
pub(crate) fn matches_short_name(component: &str, raw: &[u8; 11]) -> bool {
    let mut text = [0u8; 12];
    let len = short_name_to_text(raw, &mut text);
    ascii_eq_ignore_case(component.as_bytes(), &text[..len])
}

pub(crate) enum LfnTakeError {
    /// Fragments present but incomplete, or their checksum disagrees with
    /// the short entry they precede.
    Mismatch,
    TooLong,
}

/// Collects long-name fragments until the short entry they describe shows
/// up. Fragments arrive in descending ordinal order, last-marked first; the
/// accumulator keeps no position state, so a name that spans a sector or
/// cluster boundary assembles exactly like one that does not.
pub(crate) struct LfnAccumulator {
    expected: u8,
    checksum: u8,
    seen_mask: u32,
    units: [[u16; 13]; MAX_LFN_SLOTS],
}

impl LfnAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            expected: 0,
            checksum: 0,
            seen_mask: 0,
            units: [[0xFFFF; 13]; MAX_LFN_SLOTS],
        }
    }

    pub(crate) fn clear(&mut self) {
        self.expected = 0;
        self.checksum = 0;
        self.seen_mask = 0;
    }

    /// Returns false when the fragment cannot belong to a well-formed
    /// sequence; the accumulator resets itself in that case.
    pub(crate) fn push(&mut self, fragment: &LfnFragment) -> bool {
        if fragment.ordinal == 0 || fragment.ordinal as usize > MAX_LFN_SLOTS {
            self.clear();
            return false;
        }
        if fragment.is_last {
            if self.expected != 0 {
                // A new sequence started before the previous one met its
                // short entry.
                self.clear();
                return false;
            }
            self.expected = fragment.ordinal;
            self.checksum = fragment.checksum;
        } else if self.expected == 0 {
            // Orphan fragment with no leading last-marked one.
            return false;
        }
        if fragment.ordinal > self.expected || fragment.checksum != self.checksum {
            self.clear();
            return false;
        }
        let bit = 1u32 << (fragment.ordinal - 1);
        if !fragment.is_last && self.seen_mask & bit != 0 {
            self.clear();
            return false;
        }
        self.units[(fragment.ordinal - 1) as usize] = fragment.units;
        self.seen_mask |= bit;
        true
    }

    /// Consumes the accumulated fragments for the short entry that follows
    /// them. `Ok(None)` when no fragments were pending.
    pub(crate) fn take_long_name(
        &mut self,
        short_raw: &[u8; 11],
    ) -> Result<Option<String<NAME_MAX>>, LfnTakeError> {
        if self.expected == 0 {
            return Ok(None);
        }

        let complete = self.seen_mask == (1u32 << self.expected) - 1;
        let checksum_ok = self.checksum == short_name_checksum(short_raw);
        if !complete || !checksum_ok {
            self.clear();
            return Err(LfnTakeError::Mismatch);
        }

        let mut name = String::new();
        'slots: for slot in 0..self.expected as usize {
            for &unit in self.units[slot].iter() {
                // Terminator or padding ends the name; anything below space
                // cannot appear in a stored name.
                if unit == 0x0000 || unit == 0xFFFF || unit < 0x20 {
                    break 'slots;
                }
                let Some(ch) = char::from_u32(unit as u32) else {
                    continue;
                };
                if name.push(ch).is_err() {
                    self.clear();
                    return Err(LfnTakeError::TooLong);
                }
            }
        }
        self.clear();
        if name.is_empty() {
            return Err(LfnTakeError::Mismatch);
        }
        Ok(Some(name))
    }
}
