//! Chunk files.
//!
//! A chunk file holds one sorted chunk of records. It is written once by the sorter, read sequentially
//! by the merger and removed after a successful merge.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use tempfile;

use crate::record::{Record, RowFormat};

/// Chunk file name suffix.
pub const CHUNK_FILE_SUFFIX: &str = ".chunk";

/// Chunk file I/O error.
#[derive(Debug)]
pub enum ExternalChunkError {
    /// Common I/O error.
    IO(io::Error),
    /// Record serialization error.
    SerializationError(Box<dyn Error + Send + Sync>),
    /// Record deserialization error.
    DeserializationError(Box<dyn Error + Send + Sync>),
}

impl Error for ExternalChunkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        let source: &(dyn Error + 'static) = match &self {
            ExternalChunkError::IO(err) => err,
            ExternalChunkError::SerializationError(err) => &**err,
            ExternalChunkError::DeserializationError(err) => &**err,
        };
        Some(source)
    }
}

impl Display for ExternalChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ExternalChunkError::IO(err) => write!(f, "I/O operation failed: {}", err),
            ExternalChunkError::SerializationError(err) => write!(f, "record serialization error: {}", err),
            ExternalChunkError::DeserializationError(err) => write!(f, "record deserialization error: {}", err),
        }
    }
}

impl From<io::Error> for ExternalChunkError {
    fn from(err: io::Error) -> Self {
        ExternalChunkError::IO(err)
    }
}

/// External chunk interface. Provides methods for creating a chunk file and reading records from it.
pub trait ExternalChunk: Sized + Iterator<Item = Result<Record, ExternalChunkError>> {
    /// Writes records to a new chunk file in `dir` and returns the file path.
    ///
    /// The file name starts with `prefix`. It is made unique by a random part, so concurrent writers
    /// sharing a directory never write to the same file. A partially written file is removed on error.
    fn build(
        dir: &Path,
        prefix: &str,
        records: impl IntoIterator<Item = Record>,
        format: &RowFormat,
        buf_size: Option<usize>,
    ) -> Result<PathBuf, ExternalChunkError> {
        let tmp_file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(CHUNK_FILE_SUFFIX)
            .tempfile_in(dir)?;

        let mut chunk_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file.as_file().try_clone()?),
            None => io::BufWriter::new(tmp_file.as_file().try_clone()?),
        };

        Self::dump(&mut chunk_writer, records, format)?;

        chunk_writer.flush()?;
        drop(chunk_writer);

        let (_, path) = tmp_file.keep().map_err(|err| ExternalChunkError::IO(err.error))?;

        return Ok(path);
    }

    /// Opens an existing chunk file for reading.
    fn open(path: &Path, format: &RowFormat, buf_size: Option<usize>) -> Result<Self, ExternalChunkError> {
        let file = fs::File::open(path)?;
        let chunk_reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(Self::new(chunk_reader, format.clone()));
    }

    /// Creates an instance of an external chunk.
    fn new(reader: io::BufReader<fs::File>, format: RowFormat) -> Self;

    /// Dumps records to a chunk file.
    fn dump(
        chunk_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = Record>,
        format: &RowFormat,
    ) -> Result<(), ExternalChunkError>;
}

/// Text external chunk implementation.
/// Records are stored using the table row encoding, one row per line.
pub struct TextExternalChunk {
    reader: io::BufReader<fs::File>,
    format: RowFormat,
    line: String,
}

impl ExternalChunk for TextExternalChunk {
    fn new(reader: io::BufReader<fs::File>, format: RowFormat) -> Self {
        TextExternalChunk {
            reader,
            format,
            line: String::new(),
        }
    }

    fn dump(
        chunk_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = Record>,
        format: &RowFormat,
    ) -> Result<(), ExternalChunkError> {
        for record in records.into_iter() {
            format.write(&mut *chunk_writer, &record)?;
        }

        return Ok(());
    }
}

impl Iterator for TextExternalChunk {
    type Item = Result<Record, ExternalChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => None,
            Ok(_) => {
                let row = self.line.strip_suffix('\n').unwrap_or(self.line.as_str());
                Some(
                    self.format
                        .parse(row)
                        .map_err(|err| ExternalChunkError::DeserializationError(Box::new(err))),
                )
            }
            Err(err) => Some(Err(ExternalChunkError::IO(err))),
        }
    }
}

/// RMP (Rust MessagePack) external chunk implementation.
/// It uses MessagePack as a record serialization format.
/// For more information see https://msgpack.org/.
pub struct RmpExternalChunk {
    reader: io::BufReader<fs::File>,
    format: RowFormat,
}

impl ExternalChunk for RmpExternalChunk {
    fn new(reader: io::BufReader<fs::File>, format: RowFormat) -> Self {
        RmpExternalChunk { reader, format }
    }

    fn dump(
        mut chunk_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = Record>,
        _format: &RowFormat,
    ) -> Result<(), ExternalChunkError> {
        for record in records.into_iter() {
            rmp_serde::encode::write(&mut chunk_writer, &record)
                .map_err(|err| ExternalChunkError::SerializationError(Box::new(err)))?;
        }

        return Ok(());
    }
}

impl Iterator for RmpExternalChunk {
    type Item = Result<Record, ExternalChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.fill_buf() {
            Ok(buf) if buf.is_empty() => return None,
            Ok(_) => {}
            Err(err) => return Some(Err(ExternalChunkError::IO(err))),
        }

        let record: Record = match rmp_serde::decode::from_read(&mut self.reader) {
            Ok(record) => record,
            Err(err) => return Some(Err(ExternalChunkError::DeserializationError(Box::new(err)))),
        };

        if record.len() != self.format.column_count() {
            let err = format!(
                "expected {} fields, found {}",
                self.format.column_count(),
                record.len()
            );
            return Some(Err(ExternalChunkError::DeserializationError(err.into())));
        }

        return Some(Ok(record));
    }
}
