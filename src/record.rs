//! Row and key model.
//!
//! A [`Record`] is the list of field strings of one input row. Every record of a dataset has the
//! same number of fields, described by a [`RowFormat`]. Records are ordered by a single key column
//! using [`compare_keys`], a plain lexicographic byte comparison: numeric or date columns are compared
//! as text, so `"10" < "9"`. Sorted output is reproducible only under this ordering.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::mem;

use serde::{Deserialize, Serialize};

/// Field delimiter of the native table format.
pub const PIPE_DELIMITER: char = '|';
/// Field delimiter of the converted (CSV-like) table format.
pub const COMMA_DELIMITER: char = ',';

/// Compares two keys. Keys are opaque strings ordered by their UTF-8 bytes.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// One table row split into fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn new(fields: Vec<String>) -> Self {
        Record { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the key field.
    ///
    /// # Panics
    /// Panics if `column` is out of the record bounds. Records produced by a [`RowFormat`] always have
    /// [`RowFormat::column_count`] fields, so any validated key column is in bounds.
    pub fn key(&self, column: usize) -> &str {
        &self.fields[column]
    }

    /// Compares two records by the key column.
    pub fn cmp_by_key(&self, other: &Record, column: usize) -> Ordering {
        compare_keys(self.key(column), other.key(column))
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

/// A row whose field count does not match the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    /// Number of fields the schema expects.
    pub expected: usize,
    /// Number of fields found in the row.
    pub found: usize,
    /// The offending row.
    pub row: String,
}

impl Error for MalformedRecord {}

impl Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} fields, found {} (row: {:?})",
            self.expected, self.found, self.row
        )
    }
}

/// Row encoding of a table: field delimiter and the fixed column count.
///
/// The same encoding is used for the input, text chunk files and the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFormat {
    delimiter: char,
    column_count: usize,
    trailing_delimiter: bool,
}

impl RowFormat {
    pub fn new(delimiter: char, column_count: usize) -> Self {
        RowFormat {
            delimiter,
            column_count,
            trailing_delimiter: false,
        }
    }

    /// Pipe separated rows, the native table format.
    pub fn pipe(column_count: usize) -> Self {
        RowFormat::new(PIPE_DELIMITER, column_count)
    }

    /// Comma separated rows.
    pub fn comma(column_count: usize) -> Self {
        RowFormat::new(COMMA_DELIMITER, column_count)
    }

    /// Terminates every written row with the delimiter, as native `.tbl` files do.
    /// Parsing accepts rows with or without it regardless of this flag.
    pub fn with_trailing_delimiter(mut self, trailing_delimiter: bool) -> Self {
        self.trailing_delimiter = trailing_delimiter;
        return self;
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn trailing_delimiter(&self) -> bool {
        self.trailing_delimiter
    }

    /// Parses a row without its line terminator.
    ///
    /// A row with one field too many whose last field is empty ends with a trailing delimiter, that
    /// empty field is dropped. Otherwise every separator counts, so `2|b|` is a 3 column row with an
    /// empty last field.
    pub fn parse(&self, row: &str) -> Result<Record, MalformedRecord> {
        let mut fields = Vec::from_iter(row.split(self.delimiter).map(String::from));
        if fields.len() == self.column_count + 1 && fields.last().map_or(false, String::is_empty) {
            fields.pop();
        }

        if fields.len() != self.column_count {
            return Err(MalformedRecord {
                expected: self.column_count,
                found: fields.len(),
                row: row.to_string(),
            });
        }

        return Ok(Record::new(fields));
    }

    /// Writes a record followed by a newline.
    pub fn write<W: io::Write>(&self, writer: &mut W, record: &Record) -> io::Result<()> {
        let mut delimiter = [0u8; 4];
        let delimiter = self.delimiter.encode_utf8(&mut delimiter).as_bytes();

        for (idx, field) in record.fields().iter().enumerate() {
            if idx > 0 {
                writer.write_all(delimiter)?;
            }
            writer.write_all(field.as_bytes())?;
        }
        if self.trailing_delimiter {
            writer.write_all(delimiter)?;
        }
        writer.write_all(b"\n")
    }

    /// Approximate in-memory size of one record in bytes.
    ///
    /// Only the record header and one `String` header per column are counted, not the field text on the
    /// heap. The sorter divides its byte budget by this value to get the number of records per chunk, so
    /// real memory use per chunk is larger than the budget for wide text fields.
    pub fn size_estimate(&self) -> u64 {
        (mem::size_of::<Record>() + self.column_count * mem::size_of::<String>()) as u64
    }
}
