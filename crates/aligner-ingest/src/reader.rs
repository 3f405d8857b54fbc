//! Record reader for the activity export
//!
//! Streams the delimited export one record at a time. The header row is skipped,
//! short rows are passed through (the loader decides what a usable row is) and
//! oversized fields are rejected here, before any decoding or storage work.
//!
//! Only one record is held at a time, but the csv parser buffers that record in
//! full before the size check runs; the limit rejects rows, it does not cap the
//! memory used to read them.

use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{IngestError, RowError, RowStage};

/// One raw source record, before any coercion
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based record number, not counting the header
    pub line: u64,
    record: StringRecord,
}

impl RawRow {
    pub fn new(line: u64, record: StringRecord) -> Self {
        Self { line, record }
    }

    /// Build a row from plain strings, mostly useful in tests
    pub fn from_fields<I, T>(line: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self::new(line, StringRecord::from_byte_record_lossy(fields.into_iter().collect()))
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Field at `index`, or `""` past the end of the record
    pub fn field(&self, index: usize) -> &str {
        self.record.get(index).unwrap_or("")
    }
}

/// Outcome of reading one record: a row, or a row-fatal decode problem.
///
/// I/O failures are not row-local; they end the stream as [`IngestError`].
pub type ReadResult = Result<RawRow, RowError>;

/// Lazy reader over an export
pub struct RecordReader<R: Read> {
    inner: csv::Reader<R>,
    field_size_limit: usize,
    line: u64,
    record: StringRecord,
}

impl RecordReader<BufReader<File>> {
    /// Open an export on disk. Failing to open is fatal.
    pub fn open(path: impl AsRef<Path>, field_size_limit: usize) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| IngestError::SourceOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file), field_size_limit))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn from_reader(reader: R, field_size_limit: usize) -> Self {
        let inner = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        Self {
            inner,
            field_size_limit,
            line: 0,
            record: StringRecord::new(),
        }
    }

    /// Read the next record.
    ///
    /// `Ok(None)` is end of stream, `Ok(Some(Err(_)))` a record that cannot be used
    /// and `Err(_)` an I/O failure that ends the import.
    pub fn next_row(&mut self) -> Result<Option<ReadResult>, IngestError> {
        match self.inner.read_record(&mut self.record) {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.line += 1;
                Ok(Some(self.check_row()))
            },
            Err(err) if err.is_io_error() => Err(IngestError::Csv(err)),
            Err(err) => {
                self.line += 1;
                Ok(Some(Err(RowError::Decode {
                    stage: RowStage::Reading,
                    message: err.to_string(),
                })))
            },
        }
    }

    /// Reject a record with any field over the limit. The record is already in
    /// memory at this point.
    fn check_row(&self) -> ReadResult {
        if let Some((index, field)) = self
            .record
            .iter()
            .enumerate()
            .find(|(_, field)| field.len() > self.field_size_limit)
        {
            return Err(RowError::FieldTooLarge {
                index,
                size: field.len(),
                limit: self.field_size_limit,
            });
        }

        Ok(RawRow::new(self.line, self.record.clone()))
    }

    /// Read up to `size` rows, stopping early at end of stream
    pub fn next_chunk(&mut self, size: usize) -> Result<Vec<(u64, ReadResult)>, IngestError> {
        let mut chunk = Vec::with_capacity(size);
        while chunk.len() < size {
            match self.next_row()? {
                Some(row) => chunk.push((self.line, row)),
                None => break,
            }
        }
        Ok(chunk)
    }

    /// Number of records handed out so far
    pub fn rows_read(&self) -> u64 {
        self.line
    }
}

/// Count data records in an export, for progress estimation.
///
/// Counts records rather than physical lines, since payload cells may span lines.
pub fn count_records(path: impl AsRef<Path>) -> Result<u64, IngestError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| IngestError::SourceOpen {
        path: path.display().to_string(),
        source,
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut record = csv::ByteRecord::new();
    let mut total = 0u64;
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => total += 1,
            Ok(false) => break,
            Err(err) if err.is_io_error() => return Err(IngestError::Csv(err)),
            Err(_) => total += 1,
        }
    }

    Ok(total)
}
