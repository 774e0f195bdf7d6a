//! External sorter.
//!
//! Rows are never split into per-column files: every chunk holds whole records, so the fields of a row
//! stay together through the sort and the merge whatever the key column is.

use log;
use std::cmp;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::buffer::{LimitedBuffer, LimitedBufferBuilder};
use crate::chunk::{ExternalChunk, ExternalChunkError, TextExternalChunk};
use crate::merger;
use crate::reader::RecordReader;
use crate::record::{Record, RowFormat};

/// Sorting pipeline phase an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading the source file.
    Read,
    /// Writing sorted chunks to chunk files.
    Spill,
    /// Merging chunk files into the output file.
    Merge,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Read => write!(f, "read"),
            Phase::Spill => write!(f, "spill"),
            Phase::Merge => write!(f, "merge"),
        }
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorting parameters. Reported before any file is touched.
    InvalidArgument(String),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// File I/O error.
    IO {
        phase: Phase,
        path: PathBuf,
        source: io::Error,
    },
    /// Record serialization error.
    SerializationError {
        phase: Phase,
        path: PathBuf,
        source: Box<dyn Error + Send + Sync>,
    },
    /// Record deserialization error.
    DeserializationError {
        phase: Phase,
        path: PathBuf,
        source: Box<dyn Error + Send + Sync>,
    },
}

impl SortError {
    pub(crate) fn io(phase: Phase, path: &Path, source: io::Error) -> Self {
        SortError::IO {
            phase,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn chunk(phase: Phase, path: &Path, err: ExternalChunkError) -> Self {
        match err {
            ExternalChunkError::IO(source) => SortError::io(phase, path, source),
            ExternalChunkError::SerializationError(source) => SortError::SerializationError {
                phase,
                path: path.into(),
                source,
            },
            ExternalChunkError::DeserializationError(source) => SortError::DeserializationError {
                phase,
                path: path.into(),
                source,
            },
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidArgument(_) => None,
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO { source, .. } => Some(source),
            SortError::SerializationError { source, .. } => Some(&**source),
            SortError::DeserializationError { source, .. } => Some(&**source),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO { phase, path, source } => {
                write!(f, "I/O operation failed ({}, {}): {}", phase, path.display(), source)
            }
            SortError::SerializationError { phase, path, source } => {
                write!(f, "record serialization error ({}, {}): {}", phase, path.display(), source)
            }
            SortError::DeserializationError { phase, path, source } => {
                write!(f, "record deserialization error ({}, {}): {}", phase, path.display(), source)
            }
        }
    }
}

/// Number of sort runs started by this process. Used to keep chunk file names of concurrent runs apart.
static RUN_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn run_prefix() -> String {
    format!("run-{}-{}-", process::id(), RUN_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<C = TextExternalChunk>
where
    C: ExternalChunk,
{
    /// Row encoding of the sorted table.
    format: RowFormat,
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store chunk files.
    tmp_dir: Option<PathBuf>,
    /// File read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Estimated size of one record in memory.
    record_size_estimate: Option<u64>,

    /// External chunk type.
    external_chunk_type: PhantomData<C>,
}

impl<C> ExternalSorterBuilder<C>
where
    C: ExternalChunk,
{
    /// Creates an instance of a builder for tables with the provided row encoding.
    pub fn new(format: RowFormat) -> Self {
        ExternalSorterBuilder {
            format,
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            record_size_estimate: None,
            external_chunk_type: PhantomData,
        }
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<C>, SortError> {
        ExternalSorter::new(
            self.format,
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
            self.record_size_estimate,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store chunk files.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets the estimated in-memory size of one record.
    /// Defaults to [`RowFormat::size_estimate`].
    pub fn with_record_size_estimate(mut self, record_size: u64) -> ExternalSorterBuilder<C> {
        self.record_size_estimate = Some(record_size);
        return self;
    }
}

/// External sorter.
pub struct ExternalSorter<C = TextExternalChunk>
where
    C: ExternalChunk,
{
    /// Row encoding of the sorted table.
    format: RowFormat,
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store chunk files.
    tmp_dir: PathBuf,
    /// File read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Estimated size of one record in memory.
    record_size_estimate: u64,

    /// External chunk type.
    external_chunk_type: PhantomData<C>,
}

impl<C> ExternalSorter<C>
where
    C: ExternalChunk,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `format` - Row encoding of the sorted table.
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store chunk files. If parameter is [`None`] default OS temporary
    ///   directory will be used. The directory is created when the first chunk is written.
    /// * `rw_buf_size` - File read/write buffer size.
    /// * `record_size_estimate` - Estimated in-memory size of a record. If parameter is [`None`]
    ///   [`RowFormat::size_estimate`] is used.
    pub fn new(
        format: RowFormat,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
        record_size_estimate: Option<u64>,
    ) -> Result<Self, SortError> {
        if format.column_count() == 0 {
            return Err(SortError::InvalidArgument("column count must be positive".to_string()));
        }
        let record_size_estimate = record_size_estimate.unwrap_or_else(|| format.size_estimate());
        if record_size_estimate == 0 {
            return Err(SortError::InvalidArgument(
                "record size estimate must be positive".to_string(),
            ));
        }

        let tmp_dir = tmp_path.map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
        log::info!("using {} as a chunk files directory", tmp_dir.display());

        return Ok(ExternalSorter {
            format,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir,
            rw_buf_size,
            record_size_estimate,
            external_chunk_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    pub fn format(&self) -> &RowFormat {
        &self.format
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn record_size_estimate(&self) -> u64 {
        self.record_size_estimate
    }

    /// Sorts the input in chunks of at most `buffer_budget / record_size_estimate` records (at least one)
    /// and writes each sorted chunk to its own chunk file. Returns chunk file paths in input order.
    ///
    /// Only one chunk is held in memory at a time. An empty input produces no chunk files. On error chunk
    /// files completed so far are left on disk; the sort has to be restarted from the beginning of the input.
    ///
    /// # Arguments
    /// * `input` - Input records
    /// * `key_column` - Index of the key field
    /// * `buffer_budget` - Chunk memory budget in bytes
    /// * `record_size_estimate` - Estimated in-memory size of one record in bytes
    pub fn sort_in_bounded<I>(
        &self,
        input: I,
        key_column: usize,
        buffer_budget: u64,
        record_size_estimate: u64,
    ) -> Result<Vec<PathBuf>, SortError>
    where
        I: IntoIterator<Item = Result<Record, SortError>>,
    {
        self.validate_key_column(key_column)?;
        if buffer_budget == 0 {
            return Err(SortError::InvalidArgument("buffer budget must be positive".to_string()));
        }
        if record_size_estimate == 0 {
            return Err(SortError::InvalidArgument(
                "record size estimate must be positive".to_string(),
            ));
        }

        let buffer_builder = LimitedBufferBuilder::from_budget(buffer_budget, record_size_estimate);
        return self.spill(input, key_column, &buffer_builder, 1);
    }

    /// Merges sorted chunk files into `output_path` and returns the number of rows written.
    ///
    /// Every chunk file must be sorted by the same key column, which is not verified. Chunk files are
    /// removed after a successful merge and kept if the merge fails.
    pub fn merge(&self, chunk_paths: &[PathBuf], key_column: usize, output_path: &Path) -> Result<u64, SortError> {
        merger::merge_chunks::<C>(chunk_paths, key_column, output_path, &self.format, self.rw_buf_size)
    }

    /// Sorts the `source` table file by the key column into `output_path`. Returns the number of rows written.
    ///
    /// Rows with a wrong field count or invalid UTF-8 are skipped. Up to `memory_budget / buffer_budget`
    /// chunks, but no more than the thread pool has workers, are held in memory and sorted in parallel,
    /// each bounded by `buffer_budget`.
    ///
    /// # Arguments
    /// * `source` - Table file to be sorted
    /// * `output_path` - Sorted table file
    /// * `key_column` - Index of the key field
    /// * `buffer_budget` - Chunk memory budget in bytes
    /// * `memory_budget` - Total memory budget in bytes, not less than `buffer_budget`
    pub fn external_sort(
        &self,
        source: &Path,
        output_path: &Path,
        key_column: usize,
        buffer_budget: u64,
        memory_budget: u64,
    ) -> Result<u64, SortError> {
        self.validate_key_column(key_column)?;
        if buffer_budget == 0 {
            return Err(SortError::InvalidArgument("buffer budget must be positive".to_string()));
        }
        if buffer_budget > memory_budget {
            return Err(SortError::InvalidArgument(format!(
                "buffer budget ({} bytes) exceeds memory budget ({} bytes)",
                buffer_budget, memory_budget
            )));
        }

        let started = Instant::now();
        let buffers_number = usize::try_from(memory_budget / buffer_budget)
            .unwrap_or(usize::MAX)
            .min(self.thread_pool.current_num_threads())
            .max(1);
        let buffer_builder = LimitedBufferBuilder::from_budget(buffer_budget, self.record_size_estimate);
        log::info!(
            "sorting {} by column {} (records per chunk: {}, chunks in memory: {})",
            source.display(),
            key_column,
            buffer_builder.buffer_limit(),
            buffers_number
        );

        let reader = RecordReader::open_with_buf_size(source, self.rw_buf_size)?;
        let mut records = reader.records(self.format.clone());
        let chunk_paths = self.spill(&mut records, key_column, &buffer_builder, buffers_number)?;
        log::info!(
            "read {} rows, skipped {} malformed rows, spilled {} chunk files",
            records.rows_read(),
            records.skipped(),
            chunk_paths.len()
        );

        let rows = self.merge(&chunk_paths, key_column, output_path)?;
        log::info!("sorted {} rows in {:.3}s", rows, started.elapsed().as_secs_f64());

        return Ok(rows);
    }

    fn validate_key_column(&self, key_column: usize) -> Result<(), SortError> {
        if key_column >= self.format.column_count() {
            return Err(SortError::InvalidArgument(format!(
                "key column {} is out of range, the table has {} columns",
                key_column,
                self.format.column_count()
            )));
        }

        return Ok(());
    }

    /// Fills buffers from the input and spills them. Full buffers are collected into batches of
    /// `buffers_number`; a batch is sorted and written in parallel, one worker per buffer, and the batch
    /// completes before the next buffer is filled.
    fn spill<I>(
        &self,
        input: I,
        key_column: usize,
        buffer_builder: &LimitedBufferBuilder,
        buffers_number: usize,
    ) -> Result<Vec<PathBuf>, SortError>
    where
        I: IntoIterator<Item = Result<Record, SortError>>,
    {
        let buffers_number = cmp::max(buffers_number, 1);
        let prefix = run_prefix();
        let mut chunk_paths = Vec::new();
        let mut batch = Vec::new();
        let mut chunk_buf = buffer_builder.build();

        for item in input.into_iter() {
            chunk_buf.push(item?);

            if chunk_buf.is_full() {
                batch.push(chunk_buf);
                chunk_buf = buffer_builder.build();

                if batch.len() == buffers_number {
                    chunk_paths.extend(self.create_chunks(mem::take(&mut batch), chunk_paths.len(), key_column, &prefix)?);
                }
            }
        }

        if !chunk_buf.is_empty() {
            batch.push(chunk_buf);
        }
        if !batch.is_empty() {
            chunk_paths.extend(self.create_chunks(mem::take(&mut batch), chunk_paths.len(), key_column, &prefix)?);
        }

        log::debug!("external sort preparation done ({} chunk files)", chunk_paths.len());

        return Ok(chunk_paths);
    }

    fn create_chunks(
        &self,
        batch: Vec<LimitedBuffer<Record>>,
        first_index: usize,
        key_column: usize,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, SortError> {
        let format = &self.format;
        let tmp_dir = self.tmp_dir.as_path();
        let rw_buf_size = self.rw_buf_size;

        fs::create_dir_all(tmp_dir).map_err(|err| SortError::io(Phase::Spill, tmp_dir, err))?;

        log::debug!("sorting {} chunks", batch.len());
        self.thread_pool.install(move || {
            batch
                .into_par_iter()
                .enumerate()
                .map(|(idx, buffer)| {
                    let chunk_prefix = format!("{}{:06}-", prefix, first_index + idx);
                    create_chunk::<C>(buffer, key_column, tmp_dir, &chunk_prefix, format, rw_buf_size)
                })
                .collect()
        })
    }
}

fn create_chunk<C: ExternalChunk>(
    mut buffer: LimitedBuffer<Record>,
    key_column: usize,
    tmp_dir: &Path,
    prefix: &str,
    format: &RowFormat,
    rw_buf_size: Option<usize>,
) -> Result<PathBuf, SortError> {
    log::debug!("sorting chunk data ({} records) ...", buffer.len());
    buffer.par_sort_by(|a, b| a.cmp_by_key(b, key_column));

    log::debug!("saving chunk data");
    let path = C::build(tmp_dir, prefix, buffer, format, rw_buf_size)
        .map_err(|err| SortError::chunk(Phase::Spill, tmp_dir, err))?;
    log::debug!("chunk saved to {}", path.display());

    return Ok(path);
}
