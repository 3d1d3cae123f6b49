use std::io::{ErrorKind, Read};

use memchr::memrchr2;

use crate::error::{Error, Result};
use crate::token::MAX_START;

/// Hard cap on the buffer: every byte must stay addressable by a token.
pub(crate) const MAX_CHUNK: u64 = MAX_START;

/// What the end-scan of the filled region found.
enum Boundary {
    /// A frame ends at this position (one past the terminator).
    At(usize),
    /// The region ends with a CR; one more byte decides CR vs CR+LF.
    TrailingCr,
    /// No terminator in the filled region.
    None,
}

/// Reusable byte buffer framing whole lines out of a source.
///
/// The invariant handed to the scanners: the framed region ends on a line
/// terminator (LF, CR+LF, or a lone CR the source confirmed is not followed
/// by LF). At EOF an LF is synthesized when the source did not end with one.
///
/// The buffer starts at `2^chunkbits` bytes and doubles whenever a single
/// record (or, with `chunkbits = 0`, the whole input) needs more room, up to
/// [`MAX_CHUNK`]; past that, [`Error::LineTooLong`].
pub(crate) struct ChunkBuffer {
    data: Vec<u8>,
    cap: usize,
    eof: bool,
    single: bool,
}

impl ChunkBuffer {
    pub(crate) fn with_chunkbits(chunkbits: u32) -> Self {
        let (cap, single) = if chunkbits == 0 {
            (1 << 20, true)
        } else {
            (1usize << chunkbits, false)
        };

        Self {
            data: Vec::with_capacity(cap),
            cap,
            eof: false,
            single,
        }
    }

    #[inline(always)]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Drops the first `n` bytes, sliding the unscanned tail to the front.
    /// This is the framer's only copy.
    pub(crate) fn consume(&mut self, n: usize) {
        self.data.drain(..n);
    }

    /// Returns a frame length `n` such that `bytes()[..n]` ends on a line
    /// terminator, filling from the source as needed. `0` means the source
    /// is exhausted and nothing is buffered.
    pub(crate) fn frame(&mut self, src: &mut dyn Read) -> Result<usize> {
        if self.single {
            // the whole input is one frame, so inference never reconciles
            while !self.eof {
                self.fill_some(src)?;
            }

            if self.data.is_empty() {
                return Ok(0);
            }

            if self.data.last().map_or(true, |&b| b != b'\n' && b != b'\r') {
                self.push_synthetic_lf()?;
            }

            return Ok(self.data.len());
        }

        loop {
            match self.find_boundary() {
                Boundary::At(n) => return Ok(n),
                Boundary::TrailingCr if self.eof => return Ok(self.data.len()),
                Boundary::None if self.eof => {
                    if self.data.is_empty() {
                        return Ok(0);
                    }

                    self.push_synthetic_lf()?;
                    return Ok(self.data.len());
                }
                _ => {
                    self.fill_some(src)?;
                }
            }
        }
    }

    /// Acquires more bytes so an open quoted field can keep scanning, and
    /// returns the new frame length. Loops until the frame extends past
    /// `prev` or the source is exhausted; at EOF the whole buffer is framed
    /// (terminator synthesized if need be), so a return equal to `prev`
    /// means the input truly ended inside the field.
    pub(crate) fn extend_frame(&mut self, src: &mut dyn Read, prev: usize) -> Result<usize> {
        loop {
            if self.eof {
                if self.data.last().map_or(true, |&b| b != b'\n' && b != b'\r') {
                    self.push_synthetic_lf()?;
                }

                return Ok(self.data.len());
            }

            self.fill_some(src)?;

            if let Boundary::At(n) = self.find_boundary() {
                if n > prev {
                    return Ok(n);
                }
            }
        }
    }

    fn find_boundary(&self) -> Boundary {
        match memrchr2(b'\n', b'\r', &self.data) {
            None => Boundary::None,
            Some(i) if self.data[i] == b'\n' => Boundary::At(i + 1),
            Some(i) if i + 1 < self.data.len() => {
                // CR with a successor: CR+LF ends past the LF
                if self.data[i + 1] == b'\n' {
                    Boundary::At(i + 2)
                } else {
                    Boundary::At(i + 1)
                }
            }
            Some(_) => Boundary::TrailingCr,
        }
    }

    /// Reads once from the source into spare room, growing first when full.
    fn fill_some(&mut self, src: &mut dyn Read) -> Result<usize> {
        if self.data.len() == self.cap {
            self.grow()?;
        }

        let start = self.data.len();
        self.data.resize(self.cap, 0);

        loop {
            match src.read(&mut self.data[start..]) {
                Ok(n) => {
                    self.data.truncate(start + n);

                    if n == 0 {
                        self.eof = true;
                    }

                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.data.truncate(start);
                    return Err(err.into());
                }
            }
        }
    }

    fn grow(&mut self) -> Result<()> {
        if self.cap as u64 >= MAX_CHUNK {
            return Err(Error::LineTooLong);
        }

        self.cap = ((self.cap as u64).saturating_mul(2)).min(MAX_CHUNK) as usize;
        self.data.reserve_exact(self.cap - self.data.len());

        Ok(())
    }

    fn push_synthetic_lf(&mut self) -> Result<()> {
        if self.data.len() == self.cap {
            self.grow()?;
        }

        self.data.push(b'\n');
        Ok(())
    }
}
