//! Logging setup shared by docflow binaries.
//!
//! Two sinks: stderr for operators and a size-rotated file under
//! `$DOCFLOW_HOME/logs/<app>.log` for post-mortem inspection of pipeline runs.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "docflow=info,docflow_bus=info,docflow_registry=info,docflow_pipeline=info";
const VERBOSE_LOG_FILTER: &str =
    "docflow=debug,docflow_bus=debug,docflow_registry=debug,docflow_pipeline=debug";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for one process.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Overrides `$DOCFLOW_HOME/logs`. `None` with `file_logging` disabled
    /// means stderr only.
    pub log_dir: Option<PathBuf>,
    pub file_logging: bool,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            log_dir: None,
            file_logging: true,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let default_filter = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let file_layer = if config.file_logging {
        let dir = match config.log_dir {
            Some(dir) => dir,
            None => ensure_logs_dir().context("Failed to ensure log directory")?,
        };
        let writer = RotatingWriter::open(&dir, config.app_name)
            .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(())
}

/// `$DOCFLOW_HOME`, or `~/.docflow`.
pub fn docflow_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("DOCFLOW_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".docflow"))
        .context("Could not determine home directory; set DOCFLOW_HOME")
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(docflow_home()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-capped log file: `<name>.log` plus `<name>.log.1` .. `<name>.log.N-1`.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    limit: u64,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, name: &str, keep: usize, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let stem = file_stem(name);
        let (file, written) = open_append(&dir.join(format!("{stem}.log")))?;
        let mut rotating = Self {
            dir: dir.to_path_buf(),
            stem,
            keep: keep.max(1),
            limit,
            file,
            written,
        };
        if rotating.written > rotating.limit {
            rotating.roll()?;
        }
        Ok(rotating)
    }

    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.stem)),
            n => self.dir.join(format!("{}.log.{}", self.stem, n)),
        }
    }

    /// Shift every generation up by one, dropping the oldest.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.keep - 1;
        if oldest > 0 {
            let doomed = self.path(oldest);
            if doomed.exists() {
                fs::remove_file(doomed)?;
            }
            for generation in (0..oldest).rev() {
                let from = self.path(generation);
                if from.exists() {
                    fs::rename(&from, self.path(generation + 1))?;
                }
            }
        } else {
            // single-file mode: truncate in place
            File::create(self.path(0))?;
        }
        let (file, written) = open_append(&self.path(0))?;
        self.file = file;
        self.written = written;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, app_name: &str) -> io::Result<Self> {
        let file = RotatingFile::open(dir, app_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
