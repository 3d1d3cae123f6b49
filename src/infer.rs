use crate::error::{Error, Result};
use crate::token::{kind, TokenRows};

/// Concrete type a column can take during reading.
///
/// Dates never come out of inference: they are a post-parse promotion of
/// string columns, which keeps the hot path type-stable across chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnType {
    /// Every value seen so far was missing.
    Missing,
    Int64,
    Float64,
    Bool,
    Str,
}

impl ColumnType {
    pub(crate) fn name(self) -> &'static str {
        match self {
            ColumnType::Missing => "missing",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
            ColumnType::Str => "string",
        }
    }
}

/// An inferred column type plus whether any missing value was observed, in
/// which case the materialized column carries a missingness mask.
pub(crate) type Inferred = (ColumnType, bool);

const SHAPE_MASK: u8 = kind::INTEGER | kind::FLOAT | kind::BOOLEAN;

/// Folded shape information for one column over one chunk: the AND of all
/// non-missing token kinds, whether any token was a quoted string needing
/// unescaping, and monotone any/all missing flags.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnSummary {
    shapes: u8,
    quoted: bool,
    any_missing: bool,
    all_missing: bool,
}

/// Folds one column of the token matrix into its summary.
pub(crate) fn summarize(rows: &TokenRows, col: usize) -> ColumnSummary {
    let mut shapes = SHAPE_MASK;
    let mut quoted = false;
    let mut any_missing = false;
    let mut all_missing = true;

    for token in rows.column(col) {
        if token.is_missing() {
            any_missing = true;
        } else {
            all_missing = false;
            let k = token.kind();
            shapes &= k & SHAPE_MASK;
            quoted |= k & kind::QUOTED != 0;
        }
    }

    ColumnSummary {
        shapes,
        quoted,
        any_missing,
        all_missing,
    }
}

impl ColumnSummary {
    /// Whether the column contains quoted fields with doubled quotes, which
    /// forces the unescaping string path when parsing.
    pub(crate) fn needs_unescape(self) -> bool {
        self.quoted
    }

    /// Picks the narrowest type accepted by every non-missing value.
    pub(crate) fn infer(self) -> Inferred {
        if self.all_missing {
            return (ColumnType::Missing, true);
        }

        let ty = if self.shapes & kind::INTEGER != 0 {
            ColumnType::Int64
        } else if self.shapes & kind::FLOAT != 0 {
            ColumnType::Float64
        } else if self.shapes & kind::BOOLEAN != 0 {
            ColumnType::Bool
        } else {
            ColumnType::Str
        };

        (ty, self.any_missing)
    }
}

/// Reconciles a column's accumulated type with the type inferred for a new
/// chunk. Integer and float widen to float; an all-missing side widens to the
/// other; an accumulated string column absorbs anything. Every other pair
/// would force rewriting already-materialized values and fails instead.
pub(crate) fn reconcile(name: &str, old: Inferred, new: Inferred) -> Result<Inferred> {
    use ColumnType::*;

    let nullable = old.1 || new.1;

    let ty = match (old.0, new.0) {
        (s, t) if s == t => s,
        (Missing, t) => t,
        (s, Missing) => s,
        (Int64, Float64) | (Float64, Int64) => Float64,
        (Str, _) => Str,
        (s, t) => {
            return Err(Error::TypeInferenceConflict {
                column: name.to_string(),
                old: s.name(),
                new: t.name(),
            })
        }
    };

    Ok((ty, nullable))
}
