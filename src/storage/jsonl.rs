//! JSONL (JSON Lines) reader and writer
//!
//! One record per line, UTF-8, `\n`-terminated. The writer appends each
//! record as soon as it is handed over so an export never holds a whole
//! result set in memory.

use crate::{DeskportError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Streaming reader over typed records
pub struct JsonlReader<T> {
    reader: BufReader<File>,
    path: PathBuf,
    line: usize,
    _record: PhantomData<T>,
}

impl<T: DeserializeOwned> JsonlReader<T> {
    /// Open a JSONL file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            reader: BufReader::new(file),
            path,
            line: 0,
            _record: PhantomData,
        })
    }

    /// Read every record; the first bad line fails the whole read
    pub fn read_all(self) -> Result<Vec<T>> {
        self.collect()
    }
}

impl<T: DeserializeOwned> Iterator for JsonlReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();

        loop {
            line.clear();
            self.line += 1;
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(&line).map_err(|e| {
                        DeskportError::Parse(format!(
                            "{}:{}: invalid JSONL: {}",
                            self.path.display(),
                            self.line,
                            e
                        ))
                    }));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Line-at-a-time writer
pub struct JsonlWriter {
    writer: BufWriter<File>,
    written: u64,
}

impl JsonlWriter {
    /// Create (or truncate) a JSONL file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Append one record
    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", json)?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read all records of a JSONL file
pub fn read_records<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    JsonlReader::open(path)?.read_all()
}

/// Write records to a fresh JSONL file
pub fn write_records<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<()> {
    let mut writer = JsonlWriter::create(path)?;
    for record in records {
        writer.write(record)?;
    }
    writer.flush()
}

/// Number of non-empty lines
pub fn count_lines(path: impl AsRef<Path>) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
