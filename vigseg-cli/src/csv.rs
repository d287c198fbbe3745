//! Lightweight CSV writing with basic quoting and numeric formatting.

use std::borrow::Cow;
use std::io::{self, Write};

/// Writes rows of pre-formatted cells with RFC-4180 style quoting.
#[derive(Debug)]
pub struct CsvWriter<W: Write> {
    inner: W,
}

impl<W: Write> CsvWriter<W> {
    /// Wraps a writer.
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes a header row from column names.
    ///
    /// # Errors
    /// Returns the underlying I/O error when the write fails.
    pub fn header(&mut self, columns: &[&str]) -> io::Result<()> {
        let cells: Vec<String> = columns.iter().map(|&column| column.to_owned()).collect();
        self.row(&cells)
    }

    /// Writes one row of cells.
    ///
    /// # Errors
    /// Returns the underlying I/O error when the write fails.
    pub fn row(&mut self, cells: &[String]) -> io::Result<()> {
        for (index, cell) in cells.iter().enumerate() {
            if index > 0 {
                self.inner.write_all(b",")?;
            }
            self.inner.write_all(escape_cell(cell).as_bytes())?;
        }
        self.inner.write_all(b"\n")
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    /// Returns the underlying I/O error when the flush fails.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Formats a float cell with enough digits to round-trip.
#[must_use]
pub fn float_cell(value: f64) -> String {
    format!("{value:.17}")
}

fn needs_quoting(cell: &str) -> bool {
    cell.contains([',', '"', '\n', '\r'])
}

fn escape_cell(cell: &str) -> Cow<'_, str> {
    if !needs_quoting(cell) {
        return Cow::Borrowed(cell);
    }
    let mut escaped = String::with_capacity(cell.len() + 2);
    escaped.push('"');
    for ch in cell.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    Cow::Owned(escaped)
}
