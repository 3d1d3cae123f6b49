use memchr::memchr2;

use crate::error::{Error, Result};
use crate::token::{kind, Token, MAX_FIELD_LEN};

/// Frozen per-read parameters consulted by the scanners.
pub(crate) struct ScanConfig {
    pub(crate) delim: u8,
    /// `None` disables quoting entirely.
    pub(crate) quote: Option<u8>,
    pub(crate) trim: bool,
    pub(crate) lzstring: bool,
    pub(crate) skipblank: bool,
    pub(crate) comment: Option<Vec<u8>>,
}

/// Result of scanning one line of the framed region.
#[derive(Debug)]
pub(crate) enum ScanOutcome {
    /// A full record was tokenized into the row slot; `pos` is one past its
    /// terminator and `newlines` counts the LF bytes consumed (more than one
    /// for multi-line quoted fields).
    Record { pos: usize, newlines: u64 },
    /// The line was consumed without producing a record (blank or comment).
    Skip { pos: usize, newlines: u64 },
    /// The frame ended inside an open quoted field; the caller extends the
    /// frame and rescans from the start of the record.
    NeedMore,
}

/// Result of scanning one record into a growable token list (header
/// scanning and column counting, where the width is not yet known).
#[derive(Debug)]
pub(crate) enum FieldsOutcome {
    Fields {
        tokens: Vec<Token>,
        pos: usize,
        newlines: u64,
    },
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    Sign,
    Zero,
    Integer,
    Dot,
    PointFloat,
    Exponent,
    ExponentSign,
    ExponentFloat,
    SpecialFloat,
    Boolean,
    Na,
    Str,
    IntegerSpace,
    FloatSpace,
    BooleanSpace,
    NaSpace,
    StrSpace,
    QuoteEnd,
    QuoteEndSpace,
}

/// Shape of a field finished in an unquoted state.
fn shape_kind(state: State) -> u8 {
    match state {
        // an empty field is missing by definition
        State::Begin => kind::MISSING,
        State::Zero | State::Integer | State::IntegerSpace => kind::INTEGER | kind::FLOAT,
        State::PointFloat | State::ExponentFloat | State::FloatSpace | State::SpecialFloat => {
            kind::FLOAT
        }
        State::Boolean | State::BooleanSpace => kind::BOOLEAN,
        State::Na | State::NaSpace => kind::MISSING,
        _ => kind::STRING,
    }
}

/// Shape of a quoted field at its closing quote. A doubled quote anywhere
/// forces the unescaping string path; an empty quote pair is missing.
fn quoted_kind(state: State, escaped: bool, empty: bool) -> u8 {
    if escaped {
        kind::QUOTED
    } else if empty {
        kind::MISSING
    } else {
        match state {
            State::Zero | State::Integer => kind::INTEGER | kind::FLOAT,
            State::PointFloat | State::ExponentFloat | State::SpecialFloat => kind::FLOAT,
            State::Boolean => kind::BOOLEAN,
            State::Na => kind::MISSING,
            _ => kind::STRING,
        }
    }
}

#[inline(always)]
fn matches_fold(buf: &[u8], i: usize, lit: &[u8]) -> bool {
    buf.get(i..i + lit.len())
        .map_or(false, |s| s.eq_ignore_ascii_case(lit))
}

#[inline(always)]
fn invalid_byte(line: u64, column: usize, byte: u8) -> Error {
    Error::InvalidByteInField { line, column, byte }
}

#[inline(always)]
fn emit(row: &mut [Token], col: usize, k: u8, start: usize, end: usize, line: u64) -> Result<()> {
    if col >= row.len() {
        return Err(Error::UnexpectedColumnCount {
            line,
            expected: row.len(),
            got: col + 1,
        });
    }

    if k == kind::MISSING {
        row[col] = Token::missing();
    } else {
        let len = end - start;

        if len as u64 > MAX_FIELD_LEN {
            return Err(Error::FieldTooLong { line });
        }

        row[col] = Token::pack(k, start, len);
    }

    Ok(())
}

/// Number of bytes of the UTF-8 sequence led by `b`, or `None` for bytes
/// that cannot start a sequence.
#[inline(always)]
fn utf8_len(b: u8) -> Option<usize> {
    match b {
        0xc2..=0xdf => Some(2),
        0xe0..=0xef => Some(3),
        0xf0..=0xf4 => Some(4),
        _ => None,
    }
}

/// Consumes the comment line starting at `pos`, returning the position past
/// its terminator.
fn skip_comment_line(buf: &[u8], pos: usize) -> (usize, u64) {
    match memchr2(b'\n', b'\r', &buf[pos..]) {
        Some(offset) => {
            let t = pos + offset;

            if buf[t] == b'\r' && buf.get(t + 1) == Some(&b'\n') {
                (t + 2, 1)
            } else {
                (t + 1, 1)
            }
        }
        // the frame invariant guarantees a terminator
        None => (buf.len(), 0),
    }
}

/// Scans one record at `pos` into `row`, classifying each field's shape.
///
/// The buffer must be a framed region (it ends on a line terminator).
/// `at_eof` tells the scanner the frame cannot extend, turning an open
/// quoted field at the buffer end into an error instead of
/// [`ScanOutcome::NeedMore`].
pub(crate) fn scan_record(
    buf: &[u8],
    pos: usize,
    line: u64,
    row: &mut [Token],
    cfg: &ScanConfig,
    at_eof: bool,
) -> Result<ScanOutcome> {
    if let Some(prefix) = &cfg.comment {
        if buf[pos..].starts_with(prefix) {
            let (after, newlines) = skip_comment_line(buf, pos);
            return Ok(ScanOutcome::Skip { pos: after, newlines });
        }
    }

    let quote = cfg.quote;

    let mut col = 0usize;
    let mut i = pos;
    let mut state = State::Begin;
    let mut in_quote = false;
    let mut escaped = false;
    let mut closed_kind = kind::STRING;
    let mut start = i;
    let mut end = i;
    let mut only_space = true;
    let mut newlines: u64 = 0;

    loop {
        if i >= buf.len() {
            // every unquoted state consumes the frame's final terminator, so
            // running off the end means an open quoted field
            debug_assert!(in_quote);

            if at_eof {
                return Err(invalid_byte(line, col + 1, quote.unwrap_or(b'"')));
            }

            return Ok(ScanOutcome::NeedMore);
        }

        let b = buf[i];

        if in_quote {
            if Some(b) == quote {
                if buf.get(i + 1) == Some(&b) {
                    // doubled quote: literal quote byte, field needs unescaping
                    escaped = true;
                    state = State::Str;
                    i += 2;
                    end = i;
                } else {
                    closed_kind = quoted_kind(state, escaped, start == i);
                    end = i;
                    i += 1;
                    in_quote = false;
                    state = State::QuoteEnd;
                }
                continue;
            }

            if b == b'\n' || b == b'\r' {
                // literal newline inside a quoted field
                if b == b'\n' {
                    newlines += 1;
                }

                state = State::Str;
                i += 1;
                end = i;
                continue;
            }
        } else if b == cfg.delim || b == b'\n' || b == b'\r' {
            let k = match state {
                State::QuoteEnd | State::QuoteEndSpace => closed_kind,
                s => shape_kind(s),
            };

            emit(row, col, k, start, end, line)?;
            col += 1;

            if b == cfg.delim {
                i += 1;
                state = State::Begin;
                start = i;
                end = i;
                escaped = false;
                only_space = false;
                continue;
            }

            let after = if b == b'\r' && buf.get(i + 1) == Some(&b'\n') {
                i + 2
            } else {
                i + 1
            };
            newlines += 1;

            if cfg.skipblank && only_space && col == 1 {
                return Ok(ScanOutcome::Skip { pos: after, newlines });
            }

            if col != row.len() {
                return Err(Error::UnexpectedColumnCount {
                    line,
                    expected: row.len(),
                    got: col,
                });
            }

            return Ok(ScanOutcome::Record { pos: after, newlines });
        }

        only_space &= b == b' ';

        // state transitions for one content byte; `true` falls through to the
        // generic string/UTF-8 path below
        let fall_through = match state {
            State::Begin => match b {
                b' ' if cfg.trim && !in_quote => {
                    i += 1;
                    start = i;
                    end = i;
                    false
                }
                q if Some(q) == quote && !in_quote => {
                    in_quote = true;
                    escaped = false;
                    i += 1;
                    start = i;
                    end = i;
                    false
                }
                b'+' | b'-' => {
                    state = State::Sign;
                    i += 1;
                    end = i;
                    false
                }
                b'0' => {
                    state = if cfg.lzstring { State::Zero } else { State::Integer };
                    i += 1;
                    end = i;
                    false
                }
                b'1'..=b'9' => {
                    state = State::Integer;
                    i += 1;
                    end = i;
                    false
                }
                b'.' => {
                    state = State::Dot;
                    i += 1;
                    end = i;
                    false
                }
                b't' | b'T' => {
                    i += if matches_fold(buf, i + 1, b"rue") { 4 } else { 1 };
                    end = i;
                    state = State::Boolean;
                    false
                }
                b'f' | b'F' => {
                    i += if matches_fold(buf, i + 1, b"alse") { 5 } else { 1 };
                    end = i;
                    state = State::Boolean;
                    false
                }
                b'i' | b'I' => {
                    if matches_fold(buf, i + 1, b"nfinity") {
                        i += 8;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else if matches_fold(buf, i + 1, b"nf") {
                        i += 3;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else {
                        true
                    }
                }
                b'n' => {
                    if matches_fold(buf, i + 1, b"an") {
                        i += 3;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else {
                        true
                    }
                }
                b'N' => {
                    if matches_fold(buf, i + 1, b"an") {
                        i += 3;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else if buf.get(i + 1) == Some(&b'A') {
                        // the missing literal is case-sensitive
                        i += 2;
                        end = i;
                        state = State::Na;
                        false
                    } else {
                        true
                    }
                }
                _ => true,
            },
            State::Sign => match b {
                b'0'..=b'9' => {
                    state = State::Integer;
                    i += 1;
                    end = i;
                    false
                }
                b'.' => {
                    state = State::Dot;
                    i += 1;
                    end = i;
                    false
                }
                b'i' | b'I' => {
                    if matches_fold(buf, i + 1, b"nfinity") {
                        i += 8;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else if matches_fold(buf, i + 1, b"nf") {
                        i += 3;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else {
                        true
                    }
                }
                b'n' | b'N' => {
                    if matches_fold(buf, i + 1, b"an") {
                        i += 3;
                        end = i;
                        state = State::SpecialFloat;
                        false
                    } else {
                        true
                    }
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::StrSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Zero => match b {
                // a second digit after a leading zero downgrades to string
                b'0'..=b'9' => {
                    state = State::Str;
                    i += 1;
                    end = i;
                    false
                }
                b'.' => {
                    state = State::PointFloat;
                    i += 1;
                    end = i;
                    false
                }
                b'e' | b'E' => {
                    state = State::Exponent;
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::IntegerSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Integer => match b {
                b'0'..=b'9' => {
                    i += 1;
                    end = i;
                    false
                }
                b'.' => {
                    state = State::PointFloat;
                    i += 1;
                    end = i;
                    false
                }
                b'e' | b'E' => {
                    state = State::Exponent;
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::IntegerSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Dot => match b {
                b'0'..=b'9' => {
                    state = State::PointFloat;
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::StrSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::PointFloat => match b {
                b'0'..=b'9' => {
                    i += 1;
                    end = i;
                    false
                }
                b'e' | b'E' => {
                    state = State::Exponent;
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::FloatSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Exponent => match b {
                b'0'..=b'9' => {
                    state = State::ExponentFloat;
                    i += 1;
                    end = i;
                    false
                }
                b'+' | b'-' => {
                    state = State::ExponentSign;
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::StrSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::ExponentSign => match b {
                b'0'..=b'9' => {
                    state = State::ExponentFloat;
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::StrSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::ExponentFloat => match b {
                b'0'..=b'9' => {
                    i += 1;
                    end = i;
                    false
                }
                b' ' if cfg.trim && !in_quote => {
                    state = State::FloatSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::SpecialFloat => match b {
                b' ' if cfg.trim && !in_quote => {
                    state = State::FloatSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Boolean => match b {
                b' ' if cfg.trim && !in_quote => {
                    state = State::BooleanSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Na => match b {
                b' ' if cfg.trim && !in_quote => {
                    state = State::NaSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::Str => match b {
                b' ' if cfg.trim && !in_quote => {
                    state = State::StrSpace;
                    i += 1;
                    false
                }
                _ => true,
            },
            State::IntegerSpace
            | State::FloatSpace
            | State::BooleanSpace
            | State::NaSpace
            | State::StrSpace => match b {
                b' ' => {
                    i += 1;
                    false
                }
                // trailing space was interior after all
                _ => true,
            },
            State::QuoteEnd => match b {
                b' ' if cfg.trim => {
                    state = State::QuoteEndSpace;
                    i += 1;
                    false
                }
                _ => return Err(invalid_byte(line, col + 1, b)),
            },
            State::QuoteEndSpace => match b {
                b' ' => {
                    i += 1;
                    false
                }
                _ => return Err(invalid_byte(line, col + 1, b)),
            },
        };

        if fall_through {
            if Some(b) == quote && !in_quote {
                // a quote opening anywhere but the start of a field
                return Err(invalid_byte(line, col + 1, b));
            }

            // stray control bytes are invalid; a control delimiter (tab) is
            // still literal content inside quotes
            if b < 0x20 && !(in_quote && b == cfg.delim) {
                return Err(invalid_byte(line, col + 1, b));
            }

            if b < 0x80 {
                i += 1;
            } else {
                let n = match utf8_len(b) {
                    Some(n) => n,
                    None => return Err(invalid_byte(line, col + 1, b)),
                };

                if i + n > buf.len() {
                    if in_quote && !at_eof {
                        return Ok(ScanOutcome::NeedMore);
                    }

                    return Err(invalid_byte(line, col + 1, b));
                }

                for k in 1..n {
                    if buf[i + k] & 0xc0 != 0x80 {
                        return Err(invalid_byte(line, col + 1, buf[i + k]));
                    }
                }

                i += n;
            }

            end = i;
            state = State::Str;
        }
    }
}

/// Scans one record into a growable token list, producing only string and
/// quoted-string tokens (an empty cell is a zero-length string).
///
/// Used for the header line and for counting the columns of the first data
/// row. With `allow_multiline` off, a quoted field reaching the frame end is
/// an error: header names may not span lines.
pub(crate) fn scan_fields(
    buf: &[u8],
    pos: usize,
    line: u64,
    cfg: &ScanConfig,
    allow_multiline: bool,
    at_eof: bool,
) -> Result<FieldsOutcome> {
    let quote = cfg.quote;

    let mut tokens = Vec::new();
    let mut i = pos;
    let mut state = State::Begin;
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = i;
    let mut end = i;
    let mut newlines: u64 = 0;

    loop {
        if i >= buf.len() {
            debug_assert!(in_quote);

            if !allow_multiline || at_eof {
                return Err(invalid_byte(line, tokens.len() + 1, *buf.last().unwrap_or(&b'\n')));
            }

            return Ok(FieldsOutcome::NeedMore);
        }

        let b = buf[i];

        if in_quote {
            if Some(b) == quote {
                if buf.get(i + 1) == Some(&b) {
                    escaped = true;
                    i += 2;
                    end = i;
                } else {
                    end = i;
                    i += 1;
                    in_quote = false;
                    state = State::QuoteEnd;
                }
                continue;
            }

            if b == b'\n' || b == b'\r' {
                if !allow_multiline {
                    return Err(invalid_byte(line, tokens.len() + 1, b));
                }

                if b == b'\n' {
                    newlines += 1;
                }

                i += 1;
                end = i;
                continue;
            }
        } else if b == cfg.delim || b == b'\n' || b == b'\r' {
            let k = if escaped { kind::QUOTED } else { kind::STRING };
            let len = end - start;

            if len as u64 > MAX_FIELD_LEN {
                return Err(Error::FieldTooLong { line });
            }

            tokens.push(Token::pack(k, start, len));

            if b == cfg.delim {
                i += 1;
                state = State::Begin;
                start = i;
                end = i;
                escaped = false;
                continue;
            }

            let after = if b == b'\r' && buf.get(i + 1) == Some(&b'\n') {
                i + 2
            } else {
                i + 1
            };
            newlines += 1;

            return Ok(FieldsOutcome::Fields {
                tokens,
                pos: after,
                newlines,
            });
        }

        match state {
            State::Begin => match b {
                b' ' if cfg.trim && !in_quote => {
                    i += 1;
                    start = i;
                    end = i;
                    continue;
                }
                q if Some(q) == quote && !in_quote => {
                    in_quote = true;
                    escaped = false;
                    i += 1;
                    start = i;
                    end = i;
                    continue;
                }
                _ => state = State::Str,
            },
            State::Str | State::StrSpace => {
                if b == b' ' && cfg.trim && !in_quote {
                    state = State::StrSpace;
                    i += 1;
                    continue;
                }

                state = State::Str;
            }
            State::QuoteEnd => {
                if b == b' ' && cfg.trim {
                    state = State::QuoteEndSpace;
                    i += 1;
                    continue;
                }

                return Err(invalid_byte(line, tokens.len() + 1, b));
            }
            State::QuoteEndSpace => {
                if b == b' ' {
                    i += 1;
                    continue;
                }

                return Err(invalid_byte(line, tokens.len() + 1, b));
            }
            _ => state = State::Str,
        }

        // generic content byte
        if Some(b) == quote && !in_quote {
            return Err(invalid_byte(line, tokens.len() + 1, b));
        }

        if b < 0x20 && !(in_quote && b == cfg.delim) {
            return Err(invalid_byte(line, tokens.len() + 1, b));
        }

        if b < 0x80 {
            i += 1;
        } else {
            let n = match utf8_len(b) {
                Some(n) => n,
                None => return Err(invalid_byte(line, tokens.len() + 1, b)),
            };

            if i + n > buf.len() {
                if in_quote && allow_multiline && !at_eof {
                    return Ok(FieldsOutcome::NeedMore);
                }

                return Err(invalid_byte(line, tokens.len() + 1, b));
            }

            for k in 1..n {
                if buf[i + k] & 0xc0 != 0x80 {
                    return Err(invalid_byte(line, tokens.len() + 1, buf[i + k]));
                }
            }

            i += n;
        }

        end = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScanConfig {
        ScanConfig {
            delim: b',',
            quote: Some(b'"'),
            trim: true,
            lzstring: true,
            skipblank: false,
            comment: None,
        }
    }

    /// Scans every record of `input`, returning `(kind, bytes)` per cell.
    fn scan_all(input: &str, ncols: usize, cfg: &ScanConfig) -> Result<Vec<Vec<(u8, Vec<u8>)>>> {
        let mut input = input.as_bytes().to_vec();
        if !input.ends_with(b"\n") && !input.ends_with(b"\r") {
            input.push(b'\n');
        }

        let mut out = Vec::new();
        let mut row = vec![Token::missing(); ncols];
        let mut pos = 0;
        let mut line = 1;

        while pos < input.len() {
            match scan_record(&input, pos, line, &mut row, cfg, true)? {
                ScanOutcome::Record { pos: p, newlines } => {
                    out.push(
                        row.iter()
                            .map(|t| {
                                if t.is_missing() {
                                    (kind::MISSING, Vec::new())
                                } else {
                                    (t.kind(), t.bytes(&input).to_vec())
                                }
                            })
                            .collect(),
                    );
                    pos = p;
                    line += newlines;
                }
                ScanOutcome::Skip { pos: p, newlines } => {
                    pos = p;
                    line += newlines;
                }
                ScanOutcome::NeedMore => unreachable!("whole input was provided"),
            }
        }

        Ok(out)
    }

    fn single(input: &str, cfg: &ScanConfig) -> (u8, Vec<u8>) {
        let rows = scan_all(input, 1, cfg).unwrap();
        assert_eq!(rows.len(), 1);
        rows.into_iter().next().unwrap().into_iter().next().unwrap()
    }

    const INT: u8 = kind::INTEGER | kind::FLOAT;

    #[test]
    fn test_shapes() {
        let cfg = config();

        assert_eq!(single("42", &cfg), (INT, b"42".to_vec()));
        assert_eq!(single("-7", &cfg), (INT, b"-7".to_vec()));
        assert_eq!(single("+8", &cfg), (INT, b"+8".to_vec()));
        assert_eq!(single("0", &cfg), (INT, b"0".to_vec()));
        assert_eq!(single("2.0", &cfg), (kind::FLOAT, b"2.0".to_vec()));
        assert_eq!(single(".5", &cfg), (kind::FLOAT, b".5".to_vec()));
        assert_eq!(single("1e5", &cfg), (kind::FLOAT, b"1e5".to_vec()));
        assert_eq!(single("-1.25e-3", &cfg), (kind::FLOAT, b"-1.25e-3".to_vec()));
        assert_eq!(single("true", &cfg), (kind::BOOLEAN, b"true".to_vec()));
        assert_eq!(single("f", &cfg), (kind::BOOLEAN, b"f".to_vec()));
        assert_eq!(single("hello", &cfg), (kind::STRING, b"hello".to_vec()));
        assert_eq!(single("1992-01", &cfg), (kind::STRING, b"1992-01".to_vec()));
    }

    #[test]
    fn test_float_specials() {
        let cfg = config();

        for literal in ["inf", "-inf", "Inf", "INFINITY", "-Infinity", "nan", "NaN", "NAN", "-nan"] {
            let (k, _) = single(literal, &cfg);
            assert_eq!(k, kind::FLOAT, "{literal:?} should be float-shaped");
        }
    }

    #[test]
    fn test_degenerate_numbers_are_strings() {
        let cfg = config();

        for literal in ["1e", "1e+", "-", "+", ".", "1.2.3", "12a", "e5", "tr", "truex", "infin"] {
            let (k, _) = single(literal, &cfg);
            assert_eq!(k, kind::STRING, "{literal:?} should be string-shaped");
        }
    }

    #[test]
    fn test_missing_literals() {
        let cfg = config();

        assert_eq!(single("NA", &cfg).0, kind::MISSING);
        assert_eq!(single("\"NA\"", &cfg).0, kind::MISSING);
        assert_eq!(single("\"\"", &cfg).0, kind::MISSING);
        assert_eq!(single("NA ", &cfg).0, kind::MISSING);

        // only the exact-case literal is missing
        assert_eq!(single("na", &cfg).0, kind::STRING);
        assert_eq!(single("Na", &cfg).0, kind::STRING);
        assert_eq!(single("nA", &cfg).0, kind::STRING);
        assert_eq!(single("NAN", &cfg).0, kind::FLOAT);
        assert_eq!(single("NAx", &cfg).0, kind::STRING);
    }

    #[test]
    fn test_empty_fields_are_missing() {
        let cfg = config();
        let rows = scan_all("a,,c\n,x,\n", 3, &cfg).unwrap();

        assert_eq!(rows[0][1].0, kind::MISSING);
        assert_eq!(rows[1][0].0, kind::MISSING);
        assert_eq!(rows[1][2].0, kind::MISSING);
    }

    #[test]
    fn test_leading_zero_policy() {
        let with_lz = config();
        let without_lz = ScanConfig {
            lzstring: false,
            ..config()
        };

        assert_eq!(single("0007", &with_lz).0, kind::STRING);
        assert_eq!(single("00", &with_lz).0, kind::STRING);
        assert_eq!(single("0007", &without_lz).0, INT);
        assert_eq!(single("0", &with_lz).0, INT);
        assert_eq!(single("0.25", &with_lz).0, kind::FLOAT);
    }

    #[test]
    fn test_quoted_fields() {
        let cfg = config();

        assert_eq!(single("\"hi, there\"", &cfg), (kind::STRING, b"hi, there".to_vec()));
        assert_eq!(single("\"a\"\"b\"", &cfg), (kind::QUOTED, b"a\"\"b".to_vec()));
        assert_eq!(single("\"12\"", &cfg), (INT, b"12".to_vec()));
        assert_eq!(single("\"true\"", &cfg), (kind::BOOLEAN, b"true".to_vec()));
        assert_eq!(single("\" 12\"", &cfg), (kind::STRING, b" 12".to_vec()));
    }

    #[test]
    fn test_quoted_multiline() {
        let cfg = config();
        let rows = scan_all("\"oh,\nthere\",ok\n", 2, &cfg).unwrap();

        assert_eq!(rows[0][0], (kind::STRING, b"oh,\nthere".to_vec()));
        assert_eq!(rows[0][1], (kind::STRING, b"ok".to_vec()));
    }

    #[test]
    fn test_need_more_inside_open_quote() {
        let cfg = config();
        let mut row = vec![Token::missing(); 2];

        let outcome = scan_record(b"\"open,\n", 0, 1, &mut row, &cfg, false).unwrap();
        assert!(matches!(outcome, ScanOutcome::NeedMore));

        // at EOF the quote can never close
        let err = scan_record(b"\"open,\n", 0, 1, &mut row, &cfg, true).unwrap_err();
        assert!(matches!(err, Error::InvalidByteInField { .. }));
    }

    #[test]
    fn test_trim() {
        let trimmed = config();
        let untrimmed = ScanConfig {
            trim: false,
            ..config()
        };

        assert_eq!(single("  12  ", &trimmed), (INT, b"12".to_vec()));
        assert_eq!(single("  12  ", &untrimmed), (kind::STRING, b"  12  ".to_vec()));
        assert_eq!(single("12 x", &trimmed), (kind::STRING, b"12 x".to_vec()));
        assert_eq!(single(" \"ok\" ", &trimmed), (kind::STRING, b"ok".to_vec()));
        assert_eq!(single("  inf ", &trimmed), (kind::FLOAT, b"inf".to_vec()));
        assert_eq!(single("  ", &trimmed).0, kind::MISSING);
    }

    #[test]
    fn test_line_endings() {
        let cfg = config();

        for input in ["1,x\n2,y\n", "1,x\r\n2,y\r\n", "1,x\r2,y\r"] {
            let rows = scan_all(input, 2, &cfg).unwrap();
            assert_eq!(rows.len(), 2, "{input:?}");
            assert_eq!(rows[0][0], (INT, b"1".to_vec()));
            assert_eq!(rows[1][1], (kind::STRING, b"y".to_vec()));
        }
    }

    #[test]
    fn test_column_count_policy() {
        let cfg = config();

        // a trailing empty cell is legal and missing
        let rows = scan_all("1,2,\n", 3, &cfg).unwrap();
        assert_eq!(rows[0][2].0, kind::MISSING);

        let err = scan_all("1,2\n", 3, &cfg).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedColumnCount { expected: 3, got: 2, .. }
        ));

        let err = scan_all("1,2,3,4\n", 3, &cfg).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedColumnCount { expected: 3, got: 4, .. }
        ));
    }

    #[test]
    fn test_comments_and_blanks() {
        let cfg = ScanConfig {
            skipblank: true,
            comment: Some(b"#".to_vec()),
            ..config()
        };

        let rows = scan_all("# lead\n1,2\n\n   \n# mid\n3,4\n", 2, &cfg).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], (INT, b"1".to_vec()));
        assert_eq!(rows[1][1], (INT, b"4".to_vec()));
    }

    #[test]
    fn test_blank_lines_error_without_skipblank() {
        let cfg = config();
        let err = scan_all("1,2\n\n3,4\n", 2, &cfg).unwrap_err();
        assert!(matches!(err, Error::UnexpectedColumnCount { got: 1, .. }));
    }

    #[test]
    fn test_quote_misuse() {
        let cfg = config();

        assert!(scan_all("ab\"cd\n", 1, &cfg).is_err());
        assert!(scan_all("\"ab\"cd\n", 1, &cfg).is_err());
        assert!(scan_all("12\"\n", 1, &cfg).is_err());
    }

    #[test]
    fn test_no_quote_mode() {
        let cfg = ScanConfig {
            quote: None,
            ..config()
        };

        assert_eq!(single("ab\"cd", &cfg), (kind::STRING, b"ab\"cd".to_vec()));
        assert_eq!(single("\"12\"", &cfg), (kind::STRING, b"\"12\"".to_vec()));
    }

    #[test]
    fn test_control_bytes_rejected() {
        let cfg = config();

        let err = scan_all("a\x01b\n", 1, &cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidByteInField { byte: 0x01, .. }));
    }

    #[test]
    fn test_multibyte_utf8() {
        let cfg = config();

        assert_eq!(single("héllo", &cfg), (kind::STRING, "héllo".as_bytes().to_vec()));
        assert_eq!(single("日本語", &cfg), (kind::STRING, "日本語".as_bytes().to_vec()));
        assert_eq!(single("🦀", &cfg), (kind::STRING, "🦀".as_bytes().to_vec()));

        // lone continuation byte and truncated sequence
        let mut row = vec![Token::missing(); 1];
        assert!(scan_record(b"\x80x\n", 0, 1, &mut row, &cfg, true).is_err());
        assert!(scan_record(b"\xc3\n", 0, 1, &mut row, &cfg, true).is_err());
    }

    #[test]
    fn test_tab_delimiter() {
        let cfg = ScanConfig {
            delim: b'\t',
            ..config()
        };

        let rows = scan_all("1\thello\t2.5\n", 3, &cfg).unwrap();
        assert_eq!(rows[0][0], (INT, b"1".to_vec()));
        assert_eq!(rows[0][1], (kind::STRING, b"hello".to_vec()));
        assert_eq!(rows[0][2], (kind::FLOAT, b"2.5".to_vec()));
    }

    #[test]
    fn test_newline_count_spans_quoted_fields() {
        let cfg = config();
        let input = b"\"a\nb\nc\",x\n";
        let mut row = vec![Token::missing(); 2];

        match scan_record(input, 0, 1, &mut row, &cfg, true).unwrap() {
            ScanOutcome::Record { pos, newlines } => {
                assert_eq!(pos, input.len());
                assert_eq!(newlines, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_field_length_limit() {
        let cfg = config();
        let mut row = vec![Token::missing(); 1];

        let max = MAX_FIELD_LEN as usize;

        let mut input = vec![b'x'; max];
        input.push(b'\n');
        let outcome = scan_record(&input, 0, 1, &mut row, &cfg, true).unwrap();
        assert!(matches!(outcome, ScanOutcome::Record { .. }));
        assert_eq!(row[0].location(), (0, max));

        let mut input = vec![b'x'; max + 1];
        input.push(b'\n');
        let err = scan_record(&input, 0, 1, &mut row, &cfg, true).unwrap_err();
        assert!(matches!(err, Error::FieldTooLong { line: 1 }));
    }

    #[test]
    fn test_scan_fields_header() {
        let cfg = config();

        match scan_fields(b"col1,,\"col 3\"\n", 0, 1, &cfg, false, true).unwrap() {
            FieldsOutcome::Fields { tokens, pos, .. } => {
                assert_eq!(tokens.len(), 3);
                assert_eq!(pos, 14);
                assert_eq!(tokens[0].bytes(b"col1,,\"col 3\"\n"), b"col1");
                assert_eq!(tokens[1].location().1, 0);
                assert_eq!(tokens[2].bytes(b"col1,,\"col 3\"\n"), b"col 3");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_scan_fields_rejects_multiline_header() {
        let cfg = config();
        let err = scan_fields(b"\"a\nb\",c\n", 0, 1, &cfg, false, true).unwrap_err();
        assert!(matches!(err, Error::InvalidByteInField { .. }));
    }

    #[test]
    fn test_scan_fields_counts_multiline_rows_when_allowed() {
        let cfg = config();

        match scan_fields(b"\"a\nb\",c\n", 0, 1, &cfg, true, true).unwrap() {
            FieldsOutcome::Fields { tokens, newlines, .. } => {
                assert_eq!(tokens.len(), 2);
                assert_eq!(newlines, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
