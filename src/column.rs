use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use crate::infer::ColumnType;

/// Bitset marking which rows of a column are missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MissingMask {
    words: Vec<u64>,
    len: usize,
}

impl MissingMask {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A mask of `len` rows, all marked `missing`.
    pub(crate) fn filled(len: usize, missing: bool) -> Self {
        let word = if missing { u64::MAX } else { 0 };
        let mut mask = Self {
            words: vec![word; len.div_ceil(64)],
            len,
        };

        // clear the tail bits past `len`
        if missing && len % 64 != 0 {
            if let Some(last) = mask.words.last_mut() {
                *last &= (1u64 << (len % 64)) - 1;
            }
        }

        mask
    }

    #[inline]
    pub(crate) fn push(&mut self, missing: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }

        if missing {
            self.words[self.len / 64] |= 1 << (self.len % 64);
        }

        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether row `i` is missing.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len);
        self.words[i / 64] >> (i % 64) & 1 == 1
    }

    pub fn count_missing(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub(crate) fn extend_from(&mut self, other: &MissingMask) {
        for i in 0..other.len {
            self.push(other.get(i));
        }
    }
}

impl fmt::Debug for MissingMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MissingMask({}/{})", self.count_missing(), self.len)
    }
}

/// One borrowed cell of a column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Str(&'a str),
}

/// A fully materialized, typed column.
///
/// Values live in a dense vector; when any row was missing, a sidecar
/// [`MissingMask`] marks the rows whose slot holds a meaningless default.
/// A column where every row was missing stays untyped as [`Column::Missing`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64 {
        values: Vec<i64>,
        missing: Option<MissingMask>,
    },
    Float64 {
        values: Vec<f64>,
        missing: Option<MissingMask>,
    },
    Bool {
        values: Vec<bool>,
        missing: Option<MissingMask>,
    },
    Date {
        values: Vec<NaiveDate>,
        missing: Option<MissingMask>,
    },
    DateTime {
        values: Vec<NaiveDateTime>,
        missing: Option<MissingMask>,
    },
    Str {
        values: Vec<String>,
        missing: Option<MissingMask>,
    },
    Missing {
        len: usize,
    },
}

impl Column {
    /// Number of rows, missing ones included.
    pub fn len(&self) -> usize {
        match self {
            Column::Int64 { values, .. } => values.len(),
            Column::Float64 { values, .. } => values.len(),
            Column::Bool { values, .. } => values.len(),
            Column::Date { values, .. } => values.len(),
            Column::DateTime { values, .. } => values.len(),
            Column::Str { values, .. } => values.len(),
            Column::Missing { len } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int64 { .. } => "int64",
            Column::Float64 { .. } => "float64",
            Column::Bool { .. } => "bool",
            Column::Date { .. } => "date",
            Column::DateTime { .. } => "datetime",
            Column::Str { .. } => "string",
            Column::Missing { .. } => "missing",
        }
    }

    /// Whether any row of the column is missing.
    pub fn is_optional(&self) -> bool {
        match self {
            Column::Missing { len } => *len > 0,
            _ => self.missing_mask().is_some(),
        }
    }

    pub fn missing_mask(&self) -> Option<&MissingMask> {
        match self {
            Column::Int64 { missing, .. }
            | Column::Float64 { missing, .. }
            | Column::Bool { missing, .. }
            | Column::Date { missing, .. }
            | Column::DateTime { missing, .. }
            | Column::Str { missing, .. } => missing.as_ref(),
            Column::Missing { .. } => None,
        }
    }

    /// Whether row `row` is missing. Panics when out of bounds.
    pub fn is_missing(&self, row: usize) -> bool {
        assert!(row < self.len());

        match self {
            Column::Missing { .. } => true,
            _ => self.missing_mask().map_or(false, |mask| mask.get(row)),
        }
    }

    /// The cell at `row`, or `None` when it is missing. Panics when out of
    /// bounds.
    pub fn value(&self, row: usize) -> Option<Value<'_>> {
        if self.is_missing(row) {
            return None;
        }

        Some(match self {
            Column::Int64 { values, .. } => Value::Int(values[row]),
            Column::Float64 { values, .. } => Value::Float(values[row]),
            Column::Bool { values, .. } => Value::Bool(values[row]),
            Column::Date { values, .. } => Value::Date(values[row]),
            Column::DateTime { values, .. } => Value::DateTime(values[row]),
            Column::Str { values, .. } => Value::Str(&values[row]),
            Column::Missing { .. } => unreachable!(),
        })
    }

    /// Rewrites the column's storage at a wider type, carrying the mask
    /// along. Only the widenings the reconciliation table allows occur:
    /// int to float, and an all-missing column to any concrete type.
    pub(crate) fn widen_to(self, ty: ColumnType) -> Column {
        match (self, ty) {
            (Column::Int64 { values, missing }, ColumnType::Float64) => Column::Float64 {
                values: values.into_iter().map(|v| v as f64).collect(),
                missing,
            },
            (Column::Missing { len }, ty) => {
                let missing = Some(MissingMask::filled(len, true));

                match ty {
                    ColumnType::Int64 => Column::Int64 { values: vec![0; len], missing },
                    ColumnType::Float64 => Column::Float64 { values: vec![0.0; len], missing },
                    ColumnType::Bool => Column::Bool { values: vec![false; len], missing },
                    ColumnType::Str => Column::Str {
                        values: vec![String::new(); len],
                        missing,
                    },
                    ColumnType::Missing => Column::Missing { len },
                }
            }
            (col, _) => col,
        }
    }

    /// Appends another column of the same variant, merging masks. The caller
    /// (the chunk driver) has widened both sides to a common type first.
    pub(crate) fn append(&mut self, other: Column) {
        fn merge<T>(
            values: &mut Vec<T>,
            missing: &mut Option<MissingMask>,
            mut other_values: Vec<T>,
            other_missing: Option<MissingMask>,
        ) {
            if missing.is_some() || other_missing.is_some() {
                let mask = missing.get_or_insert_with(|| MissingMask::filled(values.len(), false));

                match &other_missing {
                    Some(other_mask) => mask.extend_from(other_mask),
                    None => {
                        for _ in 0..other_values.len() {
                            mask.push(false);
                        }
                    }
                }
            }

            values.append(&mut other_values);
        }

        match (self, other) {
            (Column::Int64 { values, missing }, Column::Int64 { values: v, missing: m }) => {
                merge(values, missing, v, m)
            }
            (Column::Float64 { values, missing }, Column::Float64 { values: v, missing: m }) => {
                merge(values, missing, v, m)
            }
            (Column::Bool { values, missing }, Column::Bool { values: v, missing: m }) => {
                merge(values, missing, v, m)
            }
            (Column::Date { values, missing }, Column::Date { values: v, missing: m }) => {
                merge(values, missing, v, m)
            }
            (Column::DateTime { values, missing }, Column::DateTime { values: v, missing: m }) => {
                merge(values, missing, v, m)
            }
            (Column::Str { values, missing }, Column::Str { values: v, missing: m }) => {
                merge(values, missing, v, m)
            }
            (Column::Missing { len }, Column::Missing { len: other_len }) => *len += other_len,
            (this, other) => unreachable!(
                "appending {} column onto {} column",
                other.type_name(),
                this.type_name()
            ),
        }
    }
}

/// Builder used while parsing one chunk's worth of one column.
pub(crate) struct ColumnChunk<T> {
    values: Vec<T>,
    missing: Option<MissingMask>,
}

impl<T: Default> ColumnChunk<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            missing: None,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: T) {
        if let Some(mask) = &mut self.missing {
            mask.push(false);
        }

        self.values.push(value);
    }

    /// Appends a missing row, creating the mask retroactively on first use so
    /// columns that never see a missing value never pay for one.
    #[inline]
    pub(crate) fn push_missing(&mut self) {
        self.missing
            .get_or_insert_with(|| MissingMask::filled(self.values.len(), false))
            .push(true);
        self.values.push(T::default());
    }

    pub(crate) fn into_parts(self) -> (Vec<T>, Option<MissingMask>) {
        (self.values, self.missing)
    }
}
