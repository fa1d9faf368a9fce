//! Process log sink at `<root>/log/<env>.log` and the tracing subscriber
//! that writes to it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{Environment, LogFormat};
use crate::error::BootError;

const DEFAULT_FILTER: &str = "info";

/// Append-only, line-oriented log file shared by every writer in the
/// process. Clones share the same file handle.
#[derive(Debug, Clone)]
pub struct Logger {
    path: PathBuf,
    format: LogFormat,
    file: Arc<Mutex<File>>,
}

impl Logger {
    /// Opens (creating if needed) `<root>/log/<env>.log` for appending.
    ///
    /// # Errors
    ///
    /// Returns `BootError::Logger` if the directory or file cannot be
    /// created.
    pub fn open(root: &Path, env: &Environment, format: LogFormat) -> Result<Self, BootError> {
        let path = root.join("log").join(format!("{env}.log"));
        Self::open_path(path, format)
    }

    /// Opens an explicit log file path for appending.
    ///
    /// # Errors
    ///
    /// Returns `BootError::Logger` if the parent directory or file cannot be
    /// created.
    pub fn open_path(path: PathBuf, format: LogFormat) -> Result<Self, BootError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| BootError::Logger {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| BootError::Logger {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            format,
            file: Arc::new(Mutex::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Appends one record, adding the trailing newline if missing.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()
    }

    /// Installs a global fmt subscriber writing to this sink. The filter
    /// comes from `RUST_LOG`, defaulting to `info`.
    ///
    /// Returns `false` when a global subscriber was already installed; the
    /// existing one stays in place.
    pub fn install_subscriber(&self) -> bool {
        let filter = EnvFilter::builder().parse_lossy(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_owned()),
        );
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(self.clone())
            .with_ansi(false);
        let installed = match self.format {
            LogFormat::Plain => builder
                .without_time()
                .with_level(false)
                .with_target(false)
                .try_init(),
            LogFormat::Full => builder.with_target(true).try_init(),
        };
        installed.is_ok()
    }
}

/// Per-event writer handed out by [`Logger`] as a [`MakeWriter`].
#[derive(Debug)]
pub struct LogWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for Logger {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: Arc::clone(&self.file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_under_log_dir_named_for_env() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::open(dir.path(), &Environment::new("test"), LogFormat::Plain).unwrap();
        assert_eq!(logger.path(), dir.path().join("log").join("test.log"));
        assert!(logger.path().exists());
    }

    #[test]
    fn lines_append_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new("test");
        Logger::open(dir.path(), &env, LogFormat::Plain)
            .unwrap()
            .write_line("first")
            .unwrap();
        Logger::open(dir.path(), &env, LogFormat::Plain)
            .unwrap()
            .write_line("second\n")
            .unwrap();
        let contents = fs::read_to_string(dir.path().join("log/test.log")).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn make_writer_shares_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::open(dir.path(), &Environment::new("test"), LogFormat::Full).unwrap();
        let mut writer = logger.make_writer();
        writer.write_all(b"via writer\n").unwrap();
        logger.write_line("via logger").unwrap();
        let contents = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(contents, "via writer\nvia logger\n");
    }

    #[test]
    fn unwritable_root_is_a_boot_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("log");
        fs::write(&blocker, "not a directory").unwrap();
        let err = Logger::open(dir.path(), &Environment::new("test"), LogFormat::Plain).unwrap_err();
        assert!(matches!(err, BootError::Logger { .. }));
    }
}
