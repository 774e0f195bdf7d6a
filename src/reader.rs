//! Table file reader.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::record::{Record, RowFormat};
use crate::sort::{Phase, SortError};

/// Streams raw rows of a file one line at a time.
///
/// Line terminators (`\n` or `\r\n`) are stripped. Rows that are not valid UTF-8 are skipped with a
/// warning and counted, see [`RecordReader::skipped`]. The reader can be restarted from the first row with
/// [`RecordReader::rewind`].
pub struct RecordReader {
    path: PathBuf,
    reader: io::BufReader<fs::File>,
    line_number: u64,
    skipped: u64,
}

impl RecordReader {
    /// Opens a file for reading.
    pub fn open(path: &Path) -> Result<Self, SortError> {
        Self::open_with_buf_size(path, None)
    }

    /// Opens a file for reading using a read buffer of the provided size.
    pub fn open_with_buf_size(path: &Path, buf_size: Option<usize>) -> Result<Self, SortError> {
        let file = fs::File::open(path).map_err(|err| SortError::io(Phase::Read, path, err))?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(RecordReader {
            path: path.into(),
            reader,
            line_number: 0,
            skipped: 0,
        });
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines read so far.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Number of rows skipped because they are not valid UTF-8.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Restarts reading from the first row.
    pub fn rewind(&mut self) -> Result<(), SortError> {
        self.reader
            .rewind()
            .map_err(|err| SortError::io(Phase::Read, &self.path, err))?;
        self.line_number = 0;
        self.skipped = 0;

        return Ok(());
    }

    /// Turns the raw row stream into a record stream.
    pub fn records(self, format: RowFormat) -> Records {
        Records {
            rows: self,
            format,
            skipped: 0,
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<String, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = Vec::new();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(SortError::io(Phase::Read, &self.path, err))),
            }

            self.line_number += 1;
            if line.ends_with(b"\n") {
                line.pop();
                if line.ends_with(b"\r") {
                    line.pop();
                }
            }

            match String::from_utf8(line) {
                Ok(row) => return Some(Ok(row)),
                Err(err) => {
                    self.skipped += 1;
                    log::warn!(
                        "{}:{}: skipping malformed row: {}",
                        self.path.display(),
                        self.line_number,
                        err.utf8_error()
                    );
                }
            }
        }
    }
}

/// Parses rows into records.
///
/// Rows with a wrong field count or invalid UTF-8 are skipped: each one is reported with a warning and
/// counted, the stream goes on with the next row. I/O errors are passed through.
pub struct Records {
    rows: RecordReader,
    format: RowFormat,
    skipped: u64,
}

impl Records {
    /// Number of malformed rows skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped + self.rows.skipped()
    }

    /// Number of rows read so far, including skipped ones.
    pub fn rows_read(&self) -> u64 {
        self.rows.line_number()
    }

    /// Restarts reading from the first row and resets the skipped rows counter.
    pub fn rewind(&mut self) -> Result<(), SortError> {
        self.rows.rewind()?;
        self.skipped = 0;

        return Ok(());
    }
}

impl Iterator for Records {
    type Item = Result<Record, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };

            match self.format.parse(&row) {
                Ok(record) => return Some(Ok(record)),
                Err(err) => {
                    self.skipped += 1;
                    log::warn!(
                        "{}:{}: skipping malformed row: {}",
                        self.rows.path().display(),
                        self.rows.line_number(),
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::{Path, PathBuf};

    use rstest::*;

    use super::RecordReader;
    use crate::record::{Record, RowFormat};
    use crate::sort::{Phase, SortError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn write_file(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("input.tbl");
        fs::write(&path, content).unwrap();
        path
    }

    fn write_bytes(dir: &Path, content: &[u8]) -> PathBuf {
        let path = dir.join("input.tbl");
        fs::write(&path, content).unwrap();
        path
    }

    #[rstest]
    fn test_rows(tmp_dir: tempfile::TempDir) {
        let path = write_file(tmp_dir.path(), "3|x|\n1|y|\r\n2|z");

        let rows: Result<Vec<String>, SortError> = RecordReader::open(&path).unwrap().collect();
        assert_eq!(rows.unwrap(), vec!["3|x|", "1|y|", "2|z"]);
    }

    #[rstest]
    fn test_empty_file(tmp_dir: tempfile::TempDir) {
        let path = write_file(tmp_dir.path(), "");

        let mut reader = RecordReader::open(&path).unwrap();
        assert!(reader.next().is_none());
        assert_eq!(reader.line_number(), 0);
    }

    #[rstest]
    fn test_rewind(tmp_dir: tempfile::TempDir) {
        let path = write_file(tmp_dir.path(), "a\nb\nc\n");

        let mut reader = RecordReader::open_with_buf_size(&path, Some(2)).unwrap();
        let first: Vec<String> = reader.by_ref().map(Result::unwrap).collect();
        reader.rewind().unwrap();
        assert_eq!(reader.line_number(), 0);
        let second: Vec<String> = reader.map(Result::unwrap).collect();

        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_open_missing_file(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("missing.tbl");

        match RecordReader::open(&path) {
            Err(SortError::IO { phase, path: err_path, .. }) => {
                assert_eq!(phase, Phase::Read);
                assert_eq!(err_path, path);
            }
            _ => panic!("expected I/O error"),
        }
    }

    #[rstest]
    fn test_records_skip_malformed(tmp_dir: tempfile::TempDir) {
        let path = write_file(tmp_dir.path(), "3|x|\n1|y|extra|\n\n2|z|\n");

        let mut records = RecordReader::open(&path).unwrap().records(RowFormat::pipe(2));
        let parsed: Vec<Record> = records.by_ref().map(Result::unwrap).collect();

        assert_eq!(
            parsed,
            vec![
                Record::new(vec!["3".into(), "x".into()]),
                Record::new(vec!["2".into(), "z".into()]),
            ]
        );
        assert_eq!(records.skipped(), 2);
        assert_eq!(records.rows_read(), 4);

        records.rewind().unwrap();
        assert_eq!(records.skipped(), 0);
        assert_eq!(records.count(), 2);
    }

    #[rstest]
    fn test_rows_skip_invalid_utf8(tmp_dir: tempfile::TempDir) {
        let path = write_bytes(tmp_dir.path(), b"a|1\n\xff\xfe|2\r\nb|3\n");

        let mut reader = RecordReader::open(&path).unwrap();
        let rows: Vec<String> = reader.by_ref().map(Result::unwrap).collect();

        assert_eq!(rows, vec!["a|1", "b|3"]);
        assert_eq!(reader.skipped(), 1);
        assert_eq!(reader.line_number(), 3);
    }

    #[rstest]
    fn test_records_count_invalid_utf8(tmp_dir: tempfile::TempDir) {
        let path = write_bytes(tmp_dir.path(), b"3|x\n\xc3\x28|y\n1|y|z\n2|z\n");

        let mut records = RecordReader::open(&path).unwrap().records(RowFormat::pipe(2));
        let parsed: Vec<Record> = records.by_ref().map(Result::unwrap).collect();

        assert_eq!(
            parsed,
            vec![
                Record::new(vec!["3".into(), "x".into()]),
                Record::new(vec!["2".into(), "z".into()]),
            ]
        );
        assert_eq!(records.skipped(), 2);
        assert_eq!(records.rows_read(), 4);

        records.rewind().unwrap();
        assert_eq!(records.skipped(), 0);
    }
}
