//! Audit stores.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use super::AuditRecord;

/// Append-only destination for audit records.
///
/// Owned and driven by the single writer thread, so implementations need no
/// internal locking.
pub trait AuditSink: Send + 'static {
    fn append(&mut self, record: &AuditRecord) -> io::Result<()>;

    /// Called once when the writer drains; must make everything durable.
    fn flush(&mut self) -> io::Result<()>;
}

/// One JSON object per line, with size-based rotation.
///
/// When appending would push the file past `max_bytes`, the file becomes
/// `<path>.1`, older backups shift up by one and anything past
/// `backup_count` is removed.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: BufWriter<File>,
    size: u64,
    max_bytes: u64,
    backup_count: usize,
}

impl JsonlSink {
    /// Open (or create) the log at `path`. `max_bytes == 0` disables rotation.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            file: BufWriter::new(file),
            size,
            max_bytes,
            backup_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        if self.backup_count == 0 {
            fs::remove_file(&self.path)?;
        } else {
            let oldest = backup_path(&self.path, self.backup_count);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (1..self.backup_count).rev() {
                let from = backup_path(&self.path, n);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, n + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }

        self.file = BufWriter::new(open_append(&self.path)?);
        self.size = 0;
        info!("Rotated audit log {}", self.path.display());
        Ok(())
    }
}

impl AuditSink for JsonlSink {
    fn append(&mut self, record: &AuditRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
        line.push(b'\n');

        let len = line.len() as u64;
        if self.max_bytes > 0 && self.size > 0 && self.size + len > self.max_bytes {
            self.rotate()?;
        }

        self.file.write_all(&line)?;
        self.file.flush()?;
        self.size += len;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

/// Read back every record in a JSONL audit file, in file order.
pub fn replay(path: impl AsRef<Path>) -> io::Result<Vec<AuditRecord>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line {}: {}", idx + 1, e),
            )
        })?;
        records.push(record);
    }

    Ok(records)
}
