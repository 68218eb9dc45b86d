use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::csv::{encode_row, ROW_TERMINATOR};
use super::LOG_HEADER;

/// Append-only destination for encoded log rows.
///
/// An append either persists the whole row durably or leaves the store as it was.
pub trait RecordStore {
    fn append_row(&mut self, row: &str) -> Result<()>;

    fn describe(&self) -> String;
}

/// File handle a `CsvFileStore` appends through.
pub trait LogFile: Write {
    fn byte_len(&self) -> io::Result<u64>;

    fn sync_data(&mut self) -> io::Result<()>;

    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn byte_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// CSV file store.
///
/// The file is opened in append mode and never truncated. The header row is
/// written when the file is new or empty; an existing log must start with it.
/// An existing log whose last row lacks its line ending gets one before the
/// first append.
pub struct CsvFileStore<F = File> {
    path: PathBuf,
    file: F,
}

impl CsvFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(anyhow!(
                    "anomaly log directory {} does not exist",
                    parent.display()
                ));
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open anomaly log {}", path.display()))?;
        Self::attach(path, file)
    }
}

impl<F: LogFile> CsvFileStore<F> {
    /// Prepare an already opened append handle for `path`.
    pub fn attach(path: &Path, mut file: F) -> Result<Self> {
        let len = file
            .byte_len()
            .with_context(|| format!("failed to stat anomaly log {}", path.display()))?;

        if len == 0 {
            file.write_all(encode_row(&LOG_HEADER).as_bytes())
                .and_then(|_| file.sync_data())
                .with_context(|| format!("failed to write header to {}", path.display()))?;
            log::info!("anomaly log {} created", path.display());
        } else {
            check_header(path)?;
            if last_byte(path)? != Some(b'\n') {
                log::warn!(
                    "anomaly log {} does not end with a line break; terminating its last row",
                    path.display()
                );
                file.write_all(ROW_TERMINATOR.as_bytes())
                    .and_then(|_| file.sync_data())
                    .with_context(|| format!("failed to repair {}", path.display()))?;
            }
            log::info!(
                "anomaly log {} exists ({} bytes); appending",
                path.display(),
                len
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_header(path: &Path) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("failed to read anomaly log {}", path.display()))?;
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .with_context(|| format!("failed to read anomaly log {}", path.display()))?;
    if first.trim_end_matches(['\r', '\n']) != LOG_HEADER.join(",") {
        return Err(anyhow!(
            "{} exists but is not an anomaly log (unexpected header '{}')",
            path.display(),
            first.trim_end()
        ));
    }
    Ok(())
}

fn last_byte(path: &Path) -> Result<Option<u8>> {
    let read = || -> io::Result<Option<u8>> {
        let mut file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte)?;
        Ok(Some(byte[0]))
    };
    read().with_context(|| format!("failed to read anomaly log {}", path.display()))
}

impl<F: LogFile> RecordStore for CsvFileStore<F> {
    fn append_row(&mut self, row: &str) -> Result<()> {
        let before = self.file.byte_len()?;
        let written = self
            .file
            .write_all(row.as_bytes())
            .and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            // Drop whatever part of the row reached the file.
            if let Err(rollback) = self.file.set_len(before) {
                log::error!(
                    "anomaly log {}: rollback after failed append also failed: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(anyhow!(
                "append to {} failed: {}",
                self.path.display(),
                e
            ));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store holding encoded rows, header first.
pub struct InMemoryRecordStore {
    rows: Vec<String>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            rows: vec![encode_row(&LOG_HEADER)],
        }
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    /// Rows as one CSV document.
    pub fn contents(&self) -> String {
        self.rows.concat()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn append_row(&mut self, row: &str) -> Result<()> {
        self.rows.push(row.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_file_gets_exactly_one_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("anomaly_log.csv");
        {
            let mut store = CsvFileStore::open(&path)?;
            store.append_row("t,r,d\r\n")?;
        }
        {
            let mut store = CsvFileStore::open(&path)?;
            store.append_row("t2,r,d\r\n")?;
        }
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "timestamp,rule_id,details\r\nt,r,d\r\nt2,r,d\r\n");
        Ok(())
    }

    #[test]
    fn empty_existing_file_gets_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "")?;
        CsvFileStore::open(&path)?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "timestamp,rule_id,details\r\n"
        );
        Ok(())
    }

    #[test]
    fn refuses_foreign_files_and_missing_directories() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.csv");
        std::fs::write(&path, "name,age\nbob,4\n")?;
        assert!(CsvFileStore::open(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path)?, "name,age\nbob,4\n");

        let missing = dir.path().join("nope").join("log.csv");
        assert!(CsvFileStore::open(&missing).is_err());
        Ok(())
    }

    #[test]
    fn unterminated_last_row_is_closed_before_appending() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "timestamp,rule_id,details\r\nt,r,d")?;
        let mut store = CsvFileStore::open(&path)?;
        store.append_row("t2,r,d\r\n")?;
        drop(store);
        CsvFileStore::open(&path)?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "timestamp,rule_id,details\r\nt,r,d\r\nt2,r,d\r\n"
        );
        Ok(())
    }

    /// Writes at most `budget` bytes in total, then fails every write.
    struct ShortWrites {
        file: File,
        budget: usize,
    }

    impl Write for ShortWrites {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.file.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LogFile for ShortWrites {
        fn byte_len(&self) -> io::Result<u64> {
            self.file.byte_len()
        }

        fn sync_data(&mut self) -> io::Result<()> {
            LogFile::sync_data(&mut self.file)
        }

        fn set_len(&mut self, len: u64) -> io::Result<()> {
            LogFile::set_len(&mut self.file, len)
        }
    }

    #[test]
    fn failed_append_rolls_back_the_partial_row() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.csv");
        CsvFileStore::open(&path)?.append_row("t,r,d\r\n")?;
        let before = std::fs::read_to_string(&path)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        let mut store = CsvFileStore::attach(&path, ShortWrites { file, budget: 4 })?;
        let err = store.append_row("t2,r,long details\r\n").unwrap_err();
        assert!(err.to_string().contains("disk full"), "{}", err);
        assert_eq!(std::fs::read_to_string(&path)?, before);

        store.file.budget = usize::MAX;
        store.append_row("t3,r,d\r\n")?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            format!("{}t3,r,d\r\n", before)
        );
        Ok(())
    }

    #[test]
    fn memory_store_starts_with_header() -> Result<()> {
        let mut store = InMemoryRecordStore::new();
        store.append_row("a,b,c\r\n")?;
        assert_eq!(store.contents(), "timestamp,rule_id,details\r\na,b,c\r\n");
        Ok(())
    }
}
