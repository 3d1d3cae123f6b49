use std::str;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use memchr::memchr;

use crate::error::{Error, Result};

/// Parses an integer-shaped field into a signed 64-bit integer.
///
/// Fields of up to 18 digits cannot overflow and go through a bare digit
/// loop; longer fields fall back to the standard parser, which detects
/// overflow.
pub(crate) fn parse_i64(bytes: &[u8], line: u64, column: usize) -> Result<i64> {
    let (neg, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    if digits.len() <= 18 {
        let mut n: i64 = 0;
        for &b in digits {
            n = n * 10 + (b - b'0') as i64;
        }

        return Ok(if neg { -n } else { n });
    }

    match str::from_utf8(bytes).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => Ok(n),
        None => Err(Error::Overflow { line, column }),
    }
}

/// Parses a float-shaped field. `inf`, `infinity` and `nan` in any case,
/// optionally signed, are accepted.
pub(crate) fn parse_f64(bytes: &[u8], line: u64, column: usize) -> Result<f64> {
    // fast_float does not take an explicit leading plus
    let bytes = match bytes.first() {
        Some(b'+') => &bytes[1..],
        _ => bytes,
    };

    fast_float::parse(bytes).map_err(|_| Error::FloatParse { line, column })
}

/// Parses a bool-shaped field. The scanner has already validated the
/// literal, so only the first byte matters.
#[inline(always)]
pub(crate) fn parse_bool(bytes: &[u8]) -> bool {
    !matches!(bytes.first(), Some(b'f') | Some(b'F'))
}

/// Materializes a plain field into an owned string, validating UTF-8.
///
/// The scanner only checks continuation bytes, so overlong and other
/// ill-formed sequences are caught here.
pub(crate) fn materialize_str(bytes: &[u8], line: u64, column: usize) -> Result<String> {
    match str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_owned()),
        Err(err) => Err(Error::InvalidByteInField {
            line,
            column,
            byte: bytes[err.valid_up_to()],
        }),
    }
}

/// Collapses doubled quote bytes of a quoted field into `out`.
pub(crate) fn unescape_into(bytes: &[u8], quote: u8, out: &mut Vec<u8>) {
    let len = bytes.len();
    let mut pos: usize = 0;

    while pos < len {
        match memchr(quote, &bytes[pos..]) {
            Some(offset) => {
                let limit = pos + offset + 1;
                out.extend_from_slice(&bytes[pos..limit]);

                // skip the second quote of the pair
                pos = limit + (bytes.get(limit) == Some(&quote)) as usize;
            }
            None => break,
        }
    }

    out.extend_from_slice(&bytes[pos..]);
}

/// Materializes a quoted field, collapsing doubled quotes, reusing `scratch`
/// across calls.
pub(crate) fn materialize_quoted_str(
    bytes: &[u8],
    quote: u8,
    scratch: &mut Vec<u8>,
    line: u64,
    column: usize,
) -> Result<String> {
    scratch.clear();
    unescape_into(bytes, quote, scratch);
    materialize_str(scratch, line, column)
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parses a datetime with the separator observed on the first value of the
/// column. Fractional seconds are optional and truncated to millisecond
/// precision.
pub(crate) fn parse_datetime(s: &str, t_separator: bool) -> Option<NaiveDateTime> {
    let format = if t_separator {
        "%Y-%m-%dT%H:%M:%S%.f"
    } else {
        "%Y-%m-%d %H:%M:%S%.f"
    };

    let parsed = NaiveDateTime::parse_from_str(s, format).ok()?;
    let millis = parsed.nanosecond() / 1_000_000 * 1_000_000;

    Some(parsed.with_nanosecond(millis).unwrap_or(parsed))
}

const CACHE_CAP: usize = 8;
const CACHE_CHECK_MISSES: u64 = 4096;

/// Recently materialized strings of one column.
///
/// A short MRU list probed by a packed meta word (length, first byte, last
/// byte) before comparing bytes. Low-entropy columns keep hitting, so the
/// cache pays for itself there; on columns where the hit rate stays under
/// 10% it switches itself off after every 4096-miss window.
pub(crate) struct StringCache {
    entries: Vec<(u64, String)>,
    hits: u64,
    misses: u64,
    enabled: bool,
}

impl StringCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CACHE_CAP),
            hits: 0,
            misses: 0,
            enabled: true,
        }
    }

    #[inline(always)]
    fn meta(bytes: &[u8]) -> u64 {
        let first = *bytes.first().unwrap_or(&0) as u64;
        let last = *bytes.last().unwrap_or(&0) as u64;

        ((bytes.len() as u64) << 16) | (first << 8) | last
    }

    /// Looks the raw field bytes up, returning an owned copy of the cached
    /// string on a hit.
    pub(crate) fn lookup(&mut self, bytes: &[u8]) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let meta = Self::meta(bytes);

        for idx in 0..self.entries.len() {
            let (entry_meta, ref entry) = self.entries[idx];

            if entry_meta == meta && entry.as_bytes() == bytes {
                self.hits += 1;

                // MRU: bubble the hit to the front
                if idx > 0 {
                    self.entries.swap(idx, idx - 1);
                }

                return Some(self.entries[idx.saturating_sub(1)].1.clone());
            }
        }

        self.misses += 1;

        if self.misses % CACHE_CHECK_MISSES == 0 {
            let rate = self.hits as f64 / (self.hits + self.misses) as f64;

            if rate < 0.1 {
                self.enabled = false;
                self.entries.clear();
            }
        }

        None
    }

    /// Records a freshly materialized string after a miss.
    pub(crate) fn insert(&mut self, bytes: &[u8], value: &str) {
        if !self.enabled {
            return;
        }

        self.entries.truncate(CACHE_CAP - 1);
        self.entries.insert(0, (Self::meta(bytes), value.to_owned()));
    }
}
