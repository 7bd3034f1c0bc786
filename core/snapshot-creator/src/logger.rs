//! Console logging plus an optional per-build log.
//!
//! The console honours `RUST_LOG`. The build log is independent of it: once
//! opened it receives every event of this crate at debug level, along with the
//! open and close of each stage span (`record`, `finalize`, `dispose`, ...)
//! and the isolate it ran against.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lazy_static::lazy_static;
use models::{Error, ErrorKind, ResultExt};
use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

lazy_static! {
    pub static ref LOGGER: SnapshotLogger = SnapshotLogger::init();
}

pub struct SnapshotLogger {
    build_log: BuildLog,
}

#[derive(Clone, Default)]
struct BuildLog(Arc<Mutex<Option<File>>>);
impl BuildLog {
    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn replace(&self, file: Option<File>) -> Option<File> {
        std::mem::replace(&mut *self.lock(), file)
    }
}

/// Writes into the open build log, or nowhere when none is open.
struct BuildLogWriter<'a>(MutexGuard<'a, Option<File>>);
impl<'a> Write for BuildLogWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.0 {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.0 {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}
impl<'a> MakeWriter<'a> for BuildLog {
    type Writer = BuildLogWriter<'a>;
    fn make_writer(&'a self) -> Self::Writer {
        BuildLogWriter(self.lock())
    }
}

/// Keeps the build log open. Dropping it closes the file.
#[must_use]
pub struct BuildLogGuard {
    log: BuildLog,
    path: PathBuf,
}
impl BuildLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
impl Drop for BuildLogGuard {
    fn drop(&mut self) {
        if let Some(mut f) = self.log.replace(None) {
            if let Err(e) = f.flush() {
                eprintln!("failed to flush {}: {e}", self.path.display());
            }
        }
    }
}

impl SnapshotLogger {
    /// Forces initialization of the global subscriber.
    pub fn enable(&self) {}

    /// Appends this run's stage trace to `path` until the guard is dropped.
    pub fn build_log(&self, path: impl AsRef<Path>) -> Result<BuildLogGuard, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_ctx(|_| (ErrorKind::Filesystem, path.display().to_string()))?;
        if self.build_log.replace(Some(file)).is_some() {
            tracing::warn!("build log replaced by {}", path.display());
        }
        tracing::info!("writing build log to {}", path.display());
        Ok(BuildLogGuard {
            log: self.build_log.clone(),
            path: path.to_owned(),
        })
    }

    fn subscriber(build_log: BuildLog) -> impl Subscriber + Send + Sync {
        use tracing_error::ErrorLayer;
        use tracing_subscriber::filter::{LevelFilter, Targets};
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let console_filter = EnvFilter::builder()
            .with_default_directive(
                format!("{}=info", env!("CARGO_CRATE_NAME"))
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            )
            .from_env_lossy();
        let console = fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(console_filter);

        let build = fmt::layer()
            .with_writer(build_log)
            .with_ansi(false)
            .with_line_number(true)
            .with_file(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_filter(Targets::new().with_target(env!("CARGO_CRATE_NAME"), LevelFilter::DEBUG));

        tracing_subscriber::registry()
            .with(console)
            .with(build)
            .with(ErrorLayer::default())
    }

    fn init() -> Self {
        let build_log = BuildLog::default();
        if Self::subscriber(build_log.clone()).try_init().is_err() {
            eprintln!("tracing subscriber already installed");
        }
        color_eyre::install().unwrap_or_else(|_| tracing::warn!("color_eyre installed twice"));

        SnapshotLogger { build_log }
    }
}
