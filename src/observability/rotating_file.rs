//! Size-based rotating log file
//!
//! When the active file would reach `max_bytes`, backups shift up by one
//! (`file.N-1 -> file.N`, ..., `file -> file.1`), the oldest beyond
//! `backup_count` is discarded and a fresh file is started. A
//! `backup_count` of zero truncates in place; a `max_bytes` of zero
//! disables rotation.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    /// Open (or create) the log file in append mode, creating parent directories
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, backup_count: u32) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            written,
        })
    }

    /// Path of the `index`-th backup (`file.1`, `file.2`, ...)
    pub fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn should_rollover(&self, incoming: usize) -> bool {
        self.max_bytes > 0 && self.written > 0 && self.written + incoming as u64 >= self.max_bytes
    }

    fn rollover(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backup_count > 0 {
            for index in (1..self.backup_count).rev() {
                let source = self.backup_path(index);
                if source.exists() {
                    let target = self.backup_path(index + 1);
                    if target.exists() {
                        fs::remove_file(&target)?;
                    }
                    fs::rename(&source, &target)?;
                }
            }

            let first = self.backup_path(1);
            if first.exists() {
                fs::remove_file(&first)?;
            }
            if self.path.exists() {
                fs::rename(&self.path, &first)?;
            }
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rollover(buf.len()) {
            self.rollover()?;
        }
        // Whole records only, so a line never straddles two files
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
