use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error surfaced by every fallible operation in this crate.
///
/// Nothing is retried internally; the single deliberately ignored failure is
/// the end-of-parse promotion of string columns to dates, which silently
/// reverts on a value that does not parse.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration was rejected before any byte was read.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single record outgrew the 2^36 - 1 byte buffer limit.
    #[error("record too long: a single record exceeds the 68719476735 byte buffer limit")]
    LineTooLong,

    /// A single field outgrew the 2^24 - 1 byte token limit.
    #[error("field too long on line {line}: a single field is limited to 16777215 bytes")]
    FieldTooLong { line: u64 },

    /// A row had more or fewer cells than the established column count.
    #[error("line {line}: expected {expected} columns, found {got}")]
    UnexpectedColumnCount { line: u64, expected: usize, got: usize },

    /// Quote misuse, a stray control byte, or a malformed UTF-8 sequence.
    #[error("line {line}, column {column}: invalid byte {byte:#04x} in field")]
    InvalidByteInField { line: u64, column: usize, byte: u8 },

    /// No column names were recoverable at the header line.
    #[error("no column names recoverable at the header line")]
    EmptyHeader,

    /// An integer-shaped field does not fit a signed 64-bit integer.
    #[error("line {line}, column {column}: integer out of 64-bit range")]
    Overflow { line: u64, column: usize },

    /// A float-shaped field was rejected by the float parser.
    #[error("line {line}, column {column}: malformed float")]
    FloatParse { line: u64, column: usize },

    /// Two chunks inferred irreconcilable types for the same column.
    #[error(
        "column {column:?} changed type between chunks ({old}, then {new}); \
         rerun with a larger chunkbits, or chunkbits = 0 to read the whole \
         input as a single chunk"
    )]
    TypeInferenceConflict {
        column: String,
        old: &'static str,
        new: &'static str,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
