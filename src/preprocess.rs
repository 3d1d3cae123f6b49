use std::collections::HashSet;
use std::io::Read;

use memchr::memchr2;

use crate::buffer::ChunkBuffer;
use crate::error::Result;
use crate::token::{kind, Token};
use crate::value;

/// Consumes exactly `n` line terminators from the stream, or everything if
/// the input has fewer lines.
pub(crate) fn skip_lines(
    buffer: &mut ChunkBuffer,
    src: &mut dyn Read,
    n: u64,
    line: &mut u64,
) -> Result<()> {
    let mut remaining = n;

    while remaining > 0 {
        let frame = buffer.frame(src)?;
        if frame == 0 {
            return Ok(());
        }

        let mut pos = 0;

        while remaining > 0 && pos < frame {
            match memchr2(b'\n', b'\r', &buffer.bytes()[pos..frame]) {
                Some(offset) => {
                    let t = pos + offset;
                    pos = if buffer.bytes()[t] == b'\r' && buffer.bytes().get(t + 1) == Some(&b'\n')
                    {
                        t + 2
                    } else {
                        t + 1
                    };
                    remaining -= 1;
                    *line += 1;
                }
                None => break,
            }
        }

        buffer.consume(pos);
    }

    Ok(())
}

/// Consumes leading blank lines and comment lines, per configuration, until
/// a real line (or the end of the stream) is at the front of the buffer.
pub(crate) fn skip_preamble(
    buffer: &mut ChunkBuffer,
    src: &mut dyn Read,
    skipblank: bool,
    comment: Option<&[u8]>,
    line: &mut u64,
) -> Result<()> {
    loop {
        let frame = buffer.frame(src)?;
        if frame == 0 {
            return Ok(());
        }

        let bytes = &buffer.bytes()[..frame];
        let nl = match memchr2(b'\n', b'\r', bytes) {
            Some(nl) => nl,
            None => return Ok(()),
        };

        let content = &bytes[..nl];
        let is_comment = comment.map_or(false, |prefix| content.starts_with(prefix));
        let is_blank = skipblank && content.iter().all(|&b| b == b' ');

        if !is_comment && !is_blank {
            return Ok(());
        }

        let after = if bytes[nl] == b'\r' && bytes.get(nl + 1) == Some(&b'\n') {
            nl + 2
        } else {
            nl + 1
        };

        buffer.consume(after);
        *line += 1;
    }
}

/// The first line of a framed region, terminator excluded.
pub(crate) fn first_line(frame: &[u8]) -> &[u8] {
    match memchr2(b'\n', b'\r', frame) {
        Some(i) => &frame[..i],
        None => frame,
    }
}

const DELIM_CANDIDATES: [u8; 5] = [b',', b'\t', b'|', b';', b':'];

/// Picks the most frequent candidate delimiter on the given line. Ties go to
/// the earlier candidate in `, \t | ; :` order; a line with none of them
/// falls back to comma.
pub(crate) fn guess_delimiter(line: &[u8]) -> u8 {
    let mut counts = [0usize; DELIM_CANDIDATES.len()];

    for &b in line {
        for (i, &candidate) in DELIM_CANDIDATES.iter().enumerate() {
            if b == candidate {
                counts[i] += 1;
            }
        }
    }

    let mut best = 0;
    for i in 1..DELIM_CANDIDATES.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }

    DELIM_CANDIDATES[best]
}

/// Materializes header tokens into column names. Empty header cells become
/// `UNNAMED_{i}` with 1-based indices, leaving 0 free for the row-name
/// column some files carry.
pub(crate) fn header_names(
    tokens: &[Token],
    bytes: &[u8],
    quote: Option<u8>,
    line: u64,
) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(tokens.len());
    let mut scratch = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let raw = token.bytes(bytes);

        let name = if raw.is_empty() {
            format!("UNNAMED_{}", i + 1)
        } else if token.kind() & kind::QUOTED != 0 {
            value::materialize_quoted_str(raw, quote.unwrap_or(b'"'), &mut scratch, line, i + 1)?
        } else {
            value::materialize_str(raw, line, i + 1)?
        };

        names.push(name);
    }

    Ok(names)
}

/// `X1..Xn`, used when the input has no header line.
pub(crate) fn synthetic_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("X{i}")).collect()
}

const RESERVED: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while",
];

/// Rewrites a name into a safe identifier: anything outside `[A-Za-z0-9_]`
/// becomes `_`, and a leading digit or a reserved word gets a `_` prefix.
pub(crate) fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    if out.is_empty() {
        return "_".to_string();
    }

    if out.as_bytes()[0].is_ascii_digit() || RESERVED.contains(&out.as_str()) {
        out.insert(0, '_');
    }

    out
}

/// Makes names pairwise distinct by suffixing `_{k}` to repeats.
pub(crate) fn dedup_names(names: &mut [String]) {
    let mut seen: HashSet<String> = HashSet::with_capacity(names.len());

    for name in names.iter_mut() {
        if seen.contains(name.as_str()) {
            let mut k = 1;

            loop {
                let candidate = format!("{name}_{k}");

                if !seen.contains(&candidate) {
                    *name = candidate;
                    break;
                }

                k += 1;
            }
        }

        seen.insert(name.clone());
    }
}
