//! `tbl-sort` sorts large delimited table files by a key column using external sorting.
//!
//! External sorting is required when the data being sorted do not fit into the main memory (RAM) of a
//! computer and instead must be resided in slower external memory, usually a hard disk drive. Sorting is
//! achieved in two passes. During the first pass it sorts chunks of rows that each fit in the memory budget
//! and spills them to chunk files, during the second pass it merges the sorted chunk files together.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Table rows:**
//!   rows are newline terminated, fields are separated by a fixed delimiter (`|` for native `.tbl` files,
//!   `,` for converted ones) and every row has the same number of fields. Rows with a wrong field count
//!   are skipped with a warning.
//! * **Key order:**
//!   rows are ordered by one key column compared as raw bytes. Numbers and dates are not converted,
//!   so `10` sorts before `9`.
//! * **Memory budget:**
//!   the number of rows per chunk is the buffer budget divided by an estimated record size. The estimate
//!   does not measure the field text, so the budget is approximate.
//! * **Multithreading support:**
//!   chunks are sorted in a thread pool, and when the memory budget allows more than one buffer, several
//!   chunks are sorted and spilled in parallel.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use tbl_sort::{ExternalSorter, ExternalSorterBuilder, RowFormat};
//!
//! fn main() {
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new(RowFormat::pipe(16).with_trailing_delimiter(true))
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     let rows = sorter
//!         .external_sort(
//!             Path::new("lineitem.tbl"),
//!             Path::new("lineitem_sorted.tbl"),
//!             10,
//!             64 * 1024 * 1024,
//!             512 * 1024 * 1024,
//!         )
//!         .unwrap();
//!     println!("{} rows sorted", rows);
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod merger;
pub mod reader;
pub mod record;
pub mod sort;

pub use buffer::{LimitedBuffer, LimitedBufferBuilder};
pub use chunk::{ExternalChunk, ExternalChunkError, RmpExternalChunk, TextExternalChunk};
pub use merger::{merge_chunks, BinaryHeapMerger};
pub use reader::{RecordReader, Records};
pub use record::{compare_keys, MalformedRecord, Record, RowFormat};
pub use sort::{ExternalSorter, ExternalSorterBuilder, Phase, SortError};
