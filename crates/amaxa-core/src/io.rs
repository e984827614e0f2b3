//! Record sources and sinks
//!
//! The engines only see records through these traits. The CSV implementations
//! here are what the CLI wires up; tests substitute in-memory ones.

use crate::id::SalesforceId;
use amaxa_common::Result;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// A single record: field (or column) name -> value. Empty string means null.
pub type Record = BTreeMap<String, String>;

/// Column headers of the result ledger written during loads
pub const ORIGINAL_ID_COLUMN: &str = "Original Id";
pub const NEW_ID_COLUMN: &str = "New Id";

/// Destination for extracted records
pub trait RecordSink: Send {
    fn write_record(&mut self, record: &Record) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source of records to load, in file order
pub trait RecordSource: Send {
    fn read_records(&mut self) -> Result<Vec<Record>>;
}

/// Destination for old Id -> new Id pairs produced by inserts
pub trait ResultLedger: Send {
    fn write_result(&mut self, original_id: &SalesforceId, new_id: &SalesforceId) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes records as CSV rows in a fixed column order
pub struct CsvRecordSink<W: Write + Send> {
    writer: csv::Writer<W>,
    columns: Vec<String>,
}

impl CsvRecordSink<File> {
    pub fn create(path: impl AsRef<Path>, columns: Vec<String>) -> Result<Self> {
        Self::from_writer(File::create(path)?, columns)
    }
}

impl<W: Write + Send> CsvRecordSink<W> {
    /// Wrap a writer; the header row is written immediately.
    pub fn from_writer(writer: W, columns: Vec<String>) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&columns)?;

        Ok(Self { writer, columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }
}

impl<W: Write + Send> RecordSink for CsvRecordSink<W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        let row = self
            .columns
            .iter()
            .map(|c| record.get(c).map(String::as_str).unwrap_or(""));
        self.writer.write_record(row)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads header-driven CSV rows
pub struct CsvRecordSource<R: Read + Send> {
    reader: csv::Reader<R>,
}

impl CsvRecordSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_reader(File::open(path)?))
    }
}

impl<R: Read + Send> CsvRecordSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: csv::Reader::from_reader(reader),
        }
    }

    pub fn headers(&mut self) -> Result<Vec<String>> {
        Ok(self.reader.headers()?.iter().map(str::to_string).collect())
    }
}

impl<R: Read + Send> RecordSource for CsvRecordSource<R> {
    fn read_records(&mut self) -> Result<Vec<Record>> {
        let headers = self.reader.headers()?.clone();
        let mut records = Vec::new();

        for row in self.reader.records() {
            let row = row?;
            records.push(
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect(),
            );
        }

        Ok(records)
    }
}

/// CSV ledger with `Original Id` and `New Id` columns
pub struct CsvResultLedger<W: Write + Send> {
    writer: csv::Writer<W>,
}

impl CsvResultLedger<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_writer(File::create(path)?)
    }

    /// Open a ledger for a resumed load, keeping rows already written.
    /// The header is only written when the file is new or empty.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let has_rows = file.metadata()?.len() > 0;
        let mut writer = csv::Writer::from_writer(file);
        if !has_rows {
            writer.write_record([ORIGINAL_ID_COLUMN, NEW_ID_COLUMN])?;
        }

        Ok(Self { writer })
    }
}

impl<W: Write + Send> CsvResultLedger<W> {
    pub fn from_writer(writer: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record([ORIGINAL_ID_COLUMN, NEW_ID_COLUMN])?;

        Ok(Self { writer })
    }
}

impl<W: Write + Send> ResultLedger for CsvResultLedger<W> {
    fn write_result(&mut self, original_id: &SalesforceId, new_id: &SalesforceId) -> Result<()> {
        self.writer
            .write_record([original_id.as_str(), new_id.as_str()])?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
