//! Daily rotating log file writer
//!
//! Writes to `{directory}/{prefix}{YYYYMMDD}.log` and reopens the file in
//! append mode when the local date changes. Writers are shared per
//! (directory, prefix) pair so every subscriber layer writing to the same
//! file goes through one handle.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{Local, NaiveDate};
use tracing_subscriber::fmt::MakeWriter;

static WRITERS: OnceLock<Mutex<HashMap<PathBuf, DailyFileWriter>>> = OnceLock::new();

fn writers() -> MutexGuard<'static, HashMap<PathBuf, DailyFileWriter>> {
    WRITERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ActiveFile {
    file: Option<File>,
    date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct DailyFileWriter {
    directory: PathBuf,
    prefix: String,
    active: Arc<Mutex<ActiveFile>>,
}

impl DailyFileWriter {
    /// Create a standalone writer. The directory is created if missing.
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> io::Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            prefix: prefix.into(),
            active: Arc::new(Mutex::new(ActiveFile::default())),
        })
    }

    /// Writer for (directory, prefix), reusing an existing one if registered.
    pub fn shared(directory: &Path, prefix: &str) -> io::Result<Self> {
        let key = Self::key_for(directory, prefix);
        let mut registry = writers();
        if let Some(writer) = registry.get(&key) {
            return Ok(writer.clone());
        }

        let writer = Self::new(directory, prefix)?;
        registry.insert(key, writer.clone());
        Ok(writer)
    }

    fn key_for(directory: &Path, prefix: &str) -> PathBuf {
        directory.join(prefix)
    }

    pub fn key(&self) -> PathBuf {
        Self::key_for(&self.directory, &self.prefix)
    }

    /// File that receives writes made on `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{}{}.log", self.prefix, date.format("%Y%m%d")))
    }

    /// Close the current file and drop the writer from the shared registry.
    pub fn close(&self) {
        let mut active = self.lock();
        active.file = None;
        active.date = None;
        drop(active);
        writers().remove(&self.key());
    }

    fn lock(&self) -> MutexGuard<'_, ActiveFile> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_on(&self, date: NaiveDate, buf: &[u8]) -> io::Result<usize> {
        let mut active = self.lock();

        if active.date != Some(date) || active.file.is_none() {
            let path = self.path_for(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            active.file = Some(file);
            active.date = Some(date);
        }

        match active.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "log file not open")),
        }
    }
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_on(Local::now().date_naive(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DailyFileWriter {
    type Writer = DailyFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_to_dated_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = DailyFileWriter::new(dir.path(), "app-").unwrap();

        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let today = Local::now().date_naive();
        let path = writer.path_for(today);
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("app-"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello\n");
    }

    #[test]
    fn test_rotates_when_date_changes() {
        let dir = TempDir::new().unwrap();
        let writer = DailyFileWriter::new(dir.path(), "svc-").unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        writer.write_on(monday, b"one\n").unwrap();
        writer.write_on(monday, b"two\n").unwrap();
        writer.write_on(tuesday, b"three\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("svc-20240304.log")).unwrap(),
            "one\ntwo\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("svc-20240305.log")).unwrap(),
            "three\n"
        );
    }

    #[test]
    fn test_shared_writers_are_reused() {
        let dir = TempDir::new().unwrap();
        let first = DailyFileWriter::shared(dir.path(), "hub-").unwrap();
        let second = DailyFileWriter::shared(dir.path(), "hub-").unwrap();
        assert!(Arc::ptr_eq(&first.active, &second.active));

        first.close();
        let third = DailyFileWriter::shared(dir.path(), "hub-").unwrap();
        assert!(!Arc::ptr_eq(&first.active, &third.active));
        third.close();
    }
}
