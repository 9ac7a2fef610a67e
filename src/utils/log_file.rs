//! Size-rotated log file
//!
//! `dashcam.log` rolls over to `dashcam.log.1` once it would grow past the
//! size limit; older backups shift up and the oldest is dropped.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;

/// Size a log file may reach before it is rotated
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Rotated files kept next to the live one
pub const DEFAULT_BACKUPS: usize = 5;

struct Current {
    file: File,
    written: u64,
}

/// Log file that rotates by size
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    current: Mutex<Current>,
}

impl RotatingFile {
    /// Open (or continue) the log at `path`
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
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
            backups,
            current: Mutex::new(Current { file, written }),
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&self, current: &mut Current) -> io::Result<()> {
        current.file.flush()?;

        if self.backups == 0 {
            current.file.set_len(0)?;
        } else {
            for index in (1..self.backups).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            current.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        }

        current.written = 0;
        Ok(())
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut current = self.current.lock();
        if current.written > 0 && current.written + buf.len() as u64 > self.max_bytes {
            self.rotate(&mut current)?;
        }
        current.file.write_all(buf)?;
        current.written += buf.len() as u64;
        Ok(buf.len())
    }
}

/// Writer handed to the fmt layer for one event
pub struct RotatingWriter<'a> {
    log: &'a RotatingFile,
}

impl Write for RotatingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.current.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter { log: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn log_line(log: &RotatingFile, len: usize) {
        let mut line = vec![b'x'; len - 1];
        line.push(b'\n');
        log.make_writer().write_all(&line).unwrap();
    }

    #[test]
    fn test_rotates_and_keeps_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("dashcam.log");
        let log = RotatingFile::open(&path, 100, 2).unwrap();

        for _ in 0..10 {
            log_line(&log, 40);
        }

        assert!(path.exists());
        assert!(dir.path().join("logs/dashcam.log.1").exists());
        assert!(dir.path().join("logs/dashcam.log.2").exists());
        assert!(!dir.path().join("logs/dashcam.log.3").exists());
        for name in ["dashcam.log", "dashcam.log.1", "dashcam.log.2"] {
            let len = fs::metadata(dir.path().join("logs").join(name)).unwrap().len();
            assert!(len <= 100, "{} is {} bytes", name, len);
        }
    }

    #[test]
    fn test_reopen_continues_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dashcam.log");
        fs::write(&path, vec![b'x'; 90]).unwrap();

        let log = RotatingFile::open(&path, 100, 1).unwrap();
        log_line(&log, 20);

        assert_eq!(fs::metadata(&path).unwrap().len(), 20);
        assert_eq!(fs::metadata(dir.path().join("dashcam.log.1")).unwrap().len(), 90);
    }
}
