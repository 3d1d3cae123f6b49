use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use memchr::memchr_iter;
use regex::Regex;

use crate::buffer::ChunkBuffer;
use crate::column::{Column, ColumnChunk, MissingMask};
use crate::error::{Error, Result};
use crate::infer::{self, ColumnSummary, ColumnType, Inferred};
use crate::preprocess;
use crate::scanner::{self, FieldsOutcome, ScanConfig, ScanOutcome};
use crate::source;
use crate::token::{kind, TokenRows};
use crate::value::{self, StringCache};

/// A fully materialized table: one typed column per name, all columns the
/// same length.
#[derive(Debug, Clone)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Looks a column up by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn into_parts(self) -> (Vec<Column>, Vec<String>) {
        (self.columns, self.names)
    }
}

/// Builds a configured delimited-text reader.
///
/// All options are validated when reading starts; invalid combinations are
/// rejected with [`Error::InvalidConfig`] before any byte is read.
#[derive(Debug, Clone)]
pub struct ReaderBuilder {
    delim: Option<u8>,
    quote: Option<u8>,
    trim: bool,
    lzstring: bool,
    skip: u64,
    skipblank: bool,
    comment: Option<Vec<u8>>,
    colnames: Option<Vec<String>>,
    normalizenames: bool,
    hasheader: Option<bool>,
    chunkbits: u32,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self {
            delim: None,
            quote: Some(b'"'),
            trim: true,
            lzstring: true,
            skip: 0,
            skipblank: false,
            comment: None,
            colnames: None,
            normalizenames: false,
            hasheader: None,
            chunkbits: 20,
        }
    }
}

impl ReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the field delimiter.
    ///
    /// When unset, the delimiter is guessed from the first line by counting
    /// `, \t | ; :` occurrences.
    pub fn delimiter(&mut self, delim: u8) -> &mut Self {
        self.delim = Some(delim);
        self
    }

    /// Set the quote byte.
    ///
    /// Will default to a double quote.
    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.quote = Some(quote);
        self
    }

    /// Disable quoting entirely: the quote byte becomes ordinary content.
    pub fn no_quote(&mut self) -> &mut Self {
        self.quote = None;
        self
    }

    /// Strip ASCII spaces around unquoted fields.
    ///
    /// Will default to `true`.
    pub fn trim(&mut self, yes: bool) -> &mut Self {
        self.trim = yes;
        self
    }

    /// Treat numerics with excess leading zeros (`0007`) as strings.
    ///
    /// Will default to `true`.
    pub fn lzstring(&mut self, yes: bool) -> &mut Self {
        self.lzstring = yes;
        self
    }

    /// Discard this many lines before anything else.
    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.skip = n;
        self
    }

    /// Drop blank lines anywhere in the input.
    ///
    /// Will default to `false`.
    pub fn skipblank(&mut self, yes: bool) -> &mut Self {
        self.skipblank = yes;
        self
    }

    /// Treat lines starting with this prefix as comments and drop them.
    pub fn comment(&mut self, prefix: &str) -> &mut Self {
        self.comment = Some(prefix.as_bytes().to_vec());
        self
    }

    /// Override the column names.
    ///
    /// Unless [`Self::hasheader`] is set explicitly, providing names also
    /// means the input has no header line.
    pub fn colnames<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.colnames = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Rewrite names into safe identifiers.
    ///
    /// Will default to `false`.
    pub fn normalizenames(&mut self, yes: bool) -> &mut Self {
        self.normalizenames = yes;
        self
    }

    /// Whether the first record is a header.
    ///
    /// Will default to `true`, unless [`Self::colnames`] was provided. With
    /// no header, columns are named `X1..Xn`.
    pub fn hasheader(&mut self, yes: bool) -> &mut Self {
        self.hasheader = Some(yes);
        self
    }

    /// Set the chunk size to `2^k` bytes, `k` in `14..=36`; `0` reads the
    /// whole input as a single chunk.
    ///
    /// Will default to `20` (1 MiB chunks).
    pub fn chunkbits(&mut self, k: u32) -> &mut Self {
        self.chunkbits = k;
        self
    }

    /// Reads a table out of anything implementing [`std::io::Read`],
    /// transparently decompressing gzip, xz and zstd streams.
    pub fn read_from<'a, R: Read + 'a>(&self, reader: R) -> Result<Table> {
        self.validate()?;

        let mut src = source::strip_bom(source::decode_stream(reader)?)?;
        read_table(self, &mut src)
    }

    /// Reads a table from a file, transparently decompressing it.
    pub fn read_path(&self, path: impl AsRef<Path>) -> Result<Table> {
        self.validate()?;

        let mut src = source::strip_bom(source::open_path(path.as_ref())?)?;
        read_table(self, &mut src)
    }

    fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Error {
            Error::InvalidConfig(msg.to_string())
        }

        if self.chunkbits != 0 && !(14..=36).contains(&self.chunkbits) {
            return Err(invalid("chunkbits must be 0 or between 14 and 36"));
        }

        if self.delim.is_some() && self.delim == self.quote {
            return Err(invalid("delimiter and quote must differ"));
        }

        if matches!(self.delim, Some(b'\n') | Some(b'\r')) {
            return Err(invalid("delimiter cannot be a line terminator"));
        }

        if matches!(self.quote, Some(b'\n') | Some(b'\r')) {
            return Err(invalid("quote cannot be a line terminator"));
        }

        if self.trim && self.delim == Some(b' ') {
            return Err(invalid("trimming cannot be combined with a space delimiter"));
        }

        if self.trim && self.quote == Some(b' ') {
            return Err(invalid("trimming cannot be combined with a space quote"));
        }

        if let Some(comment) = &self.comment {
            if comment.is_empty() {
                return Err(invalid("comment prefix cannot be empty"));
            }

            if comment.iter().any(|&b| b == b'\n' || b == b'\r') {
                return Err(invalid("comment prefix cannot contain line breaks"));
            }
        }

        if let Some(colnames) = &self.colnames {
            if colnames.is_empty() {
                return Err(invalid("colnames cannot be empty"));
            }

            let mut sorted = colnames.clone();
            sorted.sort();
            sorted.dedup();

            if sorted.len() != colnames.len() {
                return Err(invalid("colnames must be distinct"));
            }
        }

        Ok(())
    }
}

/// Reads a delimited table with an explicit delimiter.
pub fn read_dlm<'a, R: Read + 'a>(reader: R, delim: u8) -> Result<Table> {
    ReaderBuilder::new().delimiter(delim).read_from(reader)
}

/// Reads a comma-separated table.
pub fn read_csv<'a, R: Read + 'a>(reader: R) -> Result<Table> {
    read_dlm(reader, b',')
}

/// Reads a tab-separated table.
pub fn read_tsv<'a, R: Read + 'a>(reader: R) -> Result<Table> {
    read_dlm(reader, b'\t')
}

fn read_table(opts: &ReaderBuilder, src: &mut dyn Read) -> Result<Table> {
    let mut buffer = ChunkBuffer::with_chunkbits(opts.chunkbits);
    let mut line: u64 = 1;

    preprocess::skip_lines(&mut buffer, src, opts.skip, &mut line)?;
    preprocess::skip_preamble(&mut buffer, src, opts.skipblank, opts.comment.as_deref(), &mut line)?;

    let frame = buffer.frame(src)?;
    if frame == 0 {
        return Err(Error::EmptyHeader);
    }

    let delim = match opts.delim {
        Some(delim) => delim,
        None => {
            let guessed = preprocess::guess_delimiter(preprocess::first_line(&buffer.bytes()[..frame]));
            debug!("guessed delimiter {:?}", guessed as char);
            guessed
        }
    };

    let cfg = ScanConfig {
        delim,
        quote: opts.quote,
        trim: opts.trim,
        lzstring: opts.lzstring,
        skipblank: opts.skipblank,
        comment: opts.comment.clone(),
    };

    // header record
    let hasheader = opts.hasheader.unwrap_or(opts.colnames.is_none());
    let header = if hasheader {
        let at_eof = buffer.is_eof() && frame == buffer.len();

        match scanner::scan_fields(&buffer.bytes()[..frame], 0, line, &cfg, false, at_eof)? {
            FieldsOutcome::Fields { tokens, pos, newlines } => {
                let names = preprocess::header_names(&tokens, buffer.bytes(), cfg.quote, line)?;
                line += newlines;
                buffer.consume(pos);
                Some(names)
            }
            // header fields may not span lines, so the scan never suspends
            FieldsOutcome::NeedMore => unreachable!(),
        }
    } else {
        None
    };

    // count the first data row, without consuming it, to settle the width
    preprocess::skip_preamble(&mut buffer, src, opts.skipblank, opts.comment.as_deref(), &mut line)?;
    let first_count = count_first_row(&mut buffer, src, line, &cfg)?;

    let (mut names, ncols) = match (header, first_count) {
        // R-style row-name files: one unnamed leading data column
        (Some(mut names), Some(n)) if n == names.len() + 1 => {
            names.insert(0, "UNNAMED_0".to_string());
            (names, n)
        }
        (Some(names), Some(n)) if n == names.len() => (names, n),
        (Some(names), Some(n)) => {
            return Err(Error::UnexpectedColumnCount {
                line,
                expected: names.len(),
                got: n,
            })
        }
        (Some(names), None) => {
            let n = names.len();
            (names, n)
        }
        (None, Some(n)) => (preprocess::synthetic_names(n), n),
        (None, None) => return Err(Error::EmptyHeader),
    };

    if let Some(colnames) = &opts.colnames {
        if colnames.len() != ncols {
            return Err(Error::UnexpectedColumnCount {
                line,
                expected: colnames.len(),
                got: ncols,
            });
        }

        names = colnames.clone();
    }

    // chunk loop: frame, scan, summarize, infer or reconcile, parse, append
    let mut columns: Vec<Column> = Vec::new();
    let mut types: Vec<Inferred> = Vec::new();
    let mut caches: Vec<Option<StringCache>> = (0..ncols).map(|_| None).collect();
    let mut scratch: Vec<u8> = Vec::new();
    let mut rows = TokenRows::with_capacity(ncols, 0);
    let mut first_chunk = true;

    loop {
        let mut frame = buffer.frame(src)?;
        if frame == 0 {
            break;
        }

        if first_chunk {
            // amortize the matrix from the newline density of the first frame
            let estimate = memchr_iter(b'\n', &buffer.bytes()[..frame]).count().max(5);
            rows.reserve_rows(estimate);
        }

        rows.clear();
        let mut pos = 0usize;

        while pos < frame {
            let at_eof = buffer.is_eof() && frame == buffer.len();
            let row = rows.push_row(line);

            match scanner::scan_record(&buffer.bytes()[..frame], pos, line, row, &cfg, at_eof)? {
                ScanOutcome::Record { pos: p, newlines } => {
                    line += newlines;
                    pos = p;
                }
                ScanOutcome::Skip { pos: p, newlines } => {
                    rows.pop_row();
                    line += newlines;
                    pos = p;
                }
                ScanOutcome::NeedMore => {
                    rows.pop_row();
                    frame = buffer.extend_frame(src, frame)?;
                }
            }
        }

        if rows.is_empty() {
            buffer.consume(pos);
            continue;
        }

        let summaries: Vec<ColumnSummary> = (0..ncols).map(|c| infer::summarize(&rows, c)).collect();

        if first_chunk {
            types = summaries.iter().map(|s| s.infer()).collect();
        } else {
            for c in 0..ncols {
                types[c] = infer::reconcile(&names[c], types[c], summaries[c].infer())?;
            }
        }

        debug!(
            "chunk of {} rows, {} bytes; column types: [{}]",
            rows.nrows(),
            pos,
            types
                .iter()
                .map(|(ty, _)| ty.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        // parse the whole chunk before extending any accumulated column, so
        // a failure leaves no partial state behind
        let mut staged: Vec<Column> = Vec::with_capacity(ncols);
        for c in 0..ncols {
            staged.push(parse_column(&rows, c, types[c].0, summaries[c], &cfg, buffer.bytes(), &mut caches[c], &mut scratch)?);
        }

        if first_chunk {
            columns = staged;
        } else {
            for (c, chunk_col) in staged.into_iter().enumerate() {
                let accumulated = std::mem::replace(&mut columns[c], Column::Missing { len: 0 });
                let mut widened = accumulated.widen_to(types[c].0);
                widened.append(chunk_col);
                columns[c] = widened;
            }
        }

        first_chunk = false;
        buffer.consume(pos);
    }

    // a header with zero data rows still yields its columns
    if columns.is_empty() {
        columns = (0..ncols)
            .map(|_| Column::Str {
                values: Vec::new(),
                missing: None,
            })
            .collect();
    }

    for column in columns.iter_mut() {
        let current = std::mem::replace(column, Column::Missing { len: 0 });
        *column = promote_string_column(current);
    }

    if opts.normalizenames {
        for name in names.iter_mut() {
            *name = preprocess::normalize_name(name);
        }
    }

    preprocess::dedup_names(&mut names);

    Ok(Table { names, columns })
}

/// Counts the cells of the record at the front of the buffer without
/// consuming it; `None` when the stream is exhausted.
fn count_first_row(
    buffer: &mut ChunkBuffer,
    src: &mut dyn Read,
    line: u64,
    cfg: &ScanConfig,
) -> Result<Option<usize>> {
    let mut frame = buffer.frame(src)?;
    if frame == 0 {
        return Ok(None);
    }

    loop {
        let at_eof = buffer.is_eof() && frame == buffer.len();

        match scanner::scan_fields(&buffer.bytes()[..frame], 0, line, cfg, true, at_eof)? {
            FieldsOutcome::Fields { tokens, .. } => return Ok(Some(tokens.len())),
            FieldsOutcome::NeedMore => {
                frame = buffer.extend_frame(src, frame)?;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_column(
    rows: &TokenRows,
    col: usize,
    ty: ColumnType,
    summary: ColumnSummary,
    cfg: &ScanConfig,
    bytes: &[u8],
    cache: &mut Option<StringCache>,
    scratch: &mut Vec<u8>,
) -> Result<Column> {
    let nrows = rows.nrows();

    match ty {
        ColumnType::Missing => Ok(Column::Missing { len: nrows }),
        ColumnType::Int64 => {
            let mut chunk = ColumnChunk::<i64>::with_capacity(nrows);

            for r in 0..nrows {
                let token = rows.get(r, col);

                if token.is_missing() {
                    chunk.push_missing();
                } else {
                    chunk.push(value::parse_i64(token.bytes(bytes), rows.line(r), col + 1)?);
                }
            }

            let (values, missing) = chunk.into_parts();
            Ok(Column::Int64 { values, missing })
        }
        ColumnType::Float64 => {
            let mut chunk = ColumnChunk::<f64>::with_capacity(nrows);

            for r in 0..nrows {
                let token = rows.get(r, col);

                if token.is_missing() {
                    chunk.push_missing();
                } else {
                    chunk.push(value::parse_f64(token.bytes(bytes), rows.line(r), col + 1)?);
                }
            }

            let (values, missing) = chunk.into_parts();
            Ok(Column::Float64 { values, missing })
        }
        ColumnType::Bool => {
            let mut chunk = ColumnChunk::<bool>::with_capacity(nrows);

            for r in 0..nrows {
                let token = rows.get(r, col);

                if token.is_missing() {
                    chunk.push_missing();
                } else {
                    chunk.push(value::parse_bool(token.bytes(bytes)));
                }
            }

            let (values, missing) = chunk.into_parts();
            Ok(Column::Bool { values, missing })
        }
        ColumnType::Str => {
            let cache = cache.get_or_insert_with(StringCache::new);
            let quote = cfg.quote.unwrap_or(b'"');
            let any_quoted = summary.needs_unescape();
            let mut chunk = ColumnChunk::<String>::with_capacity(nrows);

            for r in 0..nrows {
                let token = rows.get(r, col);

                if token.is_missing() {
                    chunk.push_missing();
                    continue;
                }

                let raw = token.bytes(bytes);

                if any_quoted && token.kind() & kind::QUOTED != 0 {
                    // escaped quotes change the bytes, so these skip the cache
                    chunk.push(value::materialize_quoted_str(raw, quote, scratch, rows.line(r), col + 1)?);
                } else if let Some(hit) = cache.lookup(raw) {
                    chunk.push(hit);
                } else {
                    let owned = value::materialize_str(raw, rows.line(r), col + 1)?;
                    cache.insert(raw, &owned);
                    chunk.push(owned);
                }
            }

            let (values, missing) = chunk.into_parts();
            Ok(Column::Str { values, missing })
        }
    }
}

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
}

fn datetime_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?$").unwrap())
}

/// End-of-parse upgrade of a string column to dates or datetimes.
///
/// The first up-to-3 non-missing values are probed against the pattern; on a
/// match every non-missing value must match and parse, otherwise the column
/// silently stays a string column. This is the only ignored failure in the
/// crate.
fn promote_string_column(column: Column) -> Column {
    let Column::Str { values, missing } = column else {
        return column;
    };

    let present = |i: usize| missing.as_ref().map_or(true, |mask| !mask.get(i));

    let mut probe = values
        .iter()
        .enumerate()
        .filter(|(i, _)| present(*i))
        .take(3)
        .map(|(_, v)| v.as_str())
        .peekable();

    let first = match probe.peek() {
        Some(&first) => first,
        None => return Column::Str { values, missing },
    };

    if date_pattern().is_match(first) {
        if probe.all(|v| date_pattern().is_match(v)) {
            if let Some(converted) = convert_dates(&values, missing.as_ref()) {
                return Column::Date {
                    values: converted,
                    missing,
                };
            }
        }
    } else if datetime_pattern().is_match(first) {
        let t_separator = first.as_bytes().get(10) == Some(&b'T');

        if probe.all(|v| datetime_pattern().is_match(v)) {
            if let Some(converted) = convert_datetimes(&values, missing.as_ref(), t_separator) {
                return Column::DateTime {
                    values: converted,
                    missing,
                };
            }
        }
    }

    Column::Str { values, missing }
}

fn convert_dates(values: &[String], missing: Option<&MissingMask>) -> Option<Vec<NaiveDate>> {
    let mut out = Vec::with_capacity(values.len());

    for (i, v) in values.iter().enumerate() {
        if missing.map_or(false, |mask| mask.get(i)) {
            out.push(NaiveDate::default());
            continue;
        }

        if !date_pattern().is_match(v) {
            return None;
        }

        out.push(value::parse_date(v)?);
    }

    Some(out)
}

fn convert_datetimes(
    values: &[String],
    missing: Option<&MissingMask>,
    t_separator: bool,
) -> Option<Vec<NaiveDateTime>> {
    let mut out = Vec::with_capacity(values.len());

    for (i, v) in values.iter().enumerate() {
        if missing.map_or(false, |mask| mask.get(i)) {
            out.push(NaiveDateTime::default());
            continue;
        }

        if !datetime_pattern().is_match(v) {
            return None;
        }

        out.push(value::parse_datetime(v, t_separator)?);
    }

    Some(out)
}
