//! Binary heap merger.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::chunk::ExternalChunk;
use crate::record::{compare_keys, Record, RowFormat};
use crate::sort::{Phase, SortError};

/// Binary heap merger implementation.
/// Merges multiple inputs sorted by a key column into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of chunks (inputs).
///
/// The merger holds exactly one pending record per unexhausted input. Inputs are expected to be sorted
/// by the same key column using [`compare_keys`](crate::record::compare_keys) order. This is not checked:
/// an unsorted input results in an unsorted output.
pub struct BinaryHeapMerger<E, C>
where
    C: IntoIterator<Item = Result<Record, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    frontier: BinaryHeap<Reverse<Pending>>,
    chunks: Vec<C::IntoIter>,
    key_column: usize,
    initiated: bool,
}

impl<E, C> BinaryHeapMerger<E, C>
where
    C: IntoIterator<Item = Result<Record, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    /// * `key_column` - Index of the key field
    pub fn new<I>(chunks: I, key_column: usize) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let frontier = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            frontier,
            chunks,
            key_column,
            initiated: false,
        };
    }

    /// Pulls the next record of a chunk into the frontier.
    fn advance(&mut self, idx: usize) -> Result<(), E> {
        if let Some(item) = self.chunks[idx].next() {
            let record = item?;
            self.frontier.push(Reverse(Pending {
                record,
                key_column: self.key_column,
                chunk: idx,
            }));
        }

        return Ok(());
    }
}

impl<E, C> Iterator for BinaryHeapMerger<E, C>
where
    C: IntoIterator<Item = Result<Record, E>>,
{
    type Item = Result<Record, E>;

    /// Returns the next record from the inputs in ascending key order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.advance(idx) {
                    return Some(Err(err));
                }
            }
        }

        let Reverse(Pending { record, chunk, .. }) = self.frontier.pop()?;
        if let Err(err) = self.advance(chunk) {
            return Some(Err(err));
        }

        return Some(Ok(record));
    }
}

/// The pending record of one chunk. Ordered by key, ties are broken by the chunk index.
struct Pending {
    record: Record,
    key_column: usize,
    chunk: usize,
}

impl Pending {
    fn key(&self) -> &str {
        self.record.key(self.key_column)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(self.key(), other.key()).then(self.chunk.cmp(&other.chunk))
    }
}

/// Merges sorted chunk files into `output_path` and returns the number of records written.
///
/// The output is written to a temporary file next to `output_path` and moved in place once the merge
/// succeeds, then the chunk files are removed. If any chunk file can not be opened or read, the merge
/// is aborted, no output is produced and all chunk files are left in place.
pub fn merge_chunks<C: ExternalChunk>(
    chunk_paths: &[PathBuf],
    key_column: usize,
    output_path: &Path,
    format: &RowFormat,
    buf_size: Option<usize>,
) -> Result<u64, SortError> {
    if key_column >= format.column_count() {
        return Err(SortError::InvalidArgument(format!(
            "key column {} is out of range, the table has {} columns",
            key_column,
            format.column_count()
        )));
    }

    let result = write_merged::<C>(chunk_paths, key_column, output_path, format, buf_size);
    match &result {
        Ok(rows) => {
            log::info!(
                "merged {} chunk files into {} ({} rows)",
                chunk_paths.len(),
                output_path.display(),
                rows
            );
            remove_chunks(chunk_paths);
        }
        Err(err) => log::error!(
            "merge failed, {} chunk files left for inspection: {}",
            chunk_paths.len(),
            err
        ),
    }

    return result;
}

fn write_merged<C: ExternalChunk>(
    chunk_paths: &[PathBuf],
    key_column: usize,
    output_path: &Path,
    format: &RowFormat,
    buf_size: Option<usize>,
) -> Result<u64, SortError> {
    let mut chunks = Vec::with_capacity(chunk_paths.len());
    for path in chunk_paths {
        log::debug!("opening chunk file {}", path.display());
        let chunk = C::open(path, format, buf_size).map_err(|err| SortError::chunk(Phase::Merge, path, err))?;
        chunks.push(
            chunk.map(move |item| item.map_err(|err| SortError::chunk(Phase::Merge, path, err))),
        );
    }

    let output_dir = match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let output_file = tempfile::NamedTempFile::new_in(output_dir)
        .map_err(|err| SortError::io(Phase::Merge, output_dir, err))?;

    let mut rows = 0;
    {
        let mut output_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output_file.as_file()),
            None => io::BufWriter::new(output_file.as_file()),
        };

        for record in BinaryHeapMerger::new(chunks, key_column) {
            format
                .write(&mut output_writer, &record?)
                .map_err(|err| SortError::io(Phase::Merge, output_path, err))?;
            rows += 1;
        }

        output_writer
            .flush()
            .map_err(|err| SortError::io(Phase::Merge, output_path, err))?;
    }

    output_file
        .persist(output_path)
        .map_err(|err| SortError::io(Phase::Merge, output_path, err.error))?;

    return Ok(rows);
}

fn remove_chunks(chunk_paths: &[PathBuf]) {
    for path in chunk_paths {
        if let Err(err) = fs::remove_file(path) {
            log::warn!("chunk file {} not removed: {}", path.display(), err);
        }
    }
}
