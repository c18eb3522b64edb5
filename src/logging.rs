//! Tracing setup.
//!
//! The global subscriber writes to stderr. A download run additionally gets
//! its own subscriber that tees the same events into a per-run log file.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "seqacquire=info"
    } else {
        "seqacquire=warn"
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into())
}

/// Install the global stderr subscriber.
pub fn init(verbose: bool) {
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(fmt::layer())
        .init();
}

/// `<log_dir>/<sequence_id>_<YYYYMMDD_HHMMSS>.log`
pub fn run_log_path(log_dir: &Path, sequence_id: &str, started: NaiveDateTime) -> PathBuf {
    log_dir.join(format!(
        "{}_{}.log",
        sequence_id,
        started.format("%Y%m%d_%H%M%S")
    ))
}

/// Log file for a single download run.
pub struct RunLog {
    path: PathBuf,
    file: Arc<File>,
}

impl RunLog {
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscriber for the run: stderr as configured, plus every
    /// `seqacquire` event at info and above into the log file.
    pub fn subscriber(&self, verbose: bool) -> impl Subscriber + Send + Sync + 'static {
        tracing_subscriber::registry()
            .with(fmt::layer().with_filter(env_filter(verbose)))
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(self.file.clone())
                    .with_filter(EnvFilter::new("seqacquire=info")),
            )
    }

    /// Append free text (the final tally) after the traced output.
    pub fn append(&self, text: &str) -> io::Result<()> {
        let mut file = &*self.file;
        file.write_all(text.as_bytes())?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tracing::instrument::WithSubscriber;

    #[test]
    fn test_run_log_path() {
        let started = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 7, 6)
            .unwrap();
        assert_eq!(
            run_log_path(Path::new("logs"), "seqA", started),
            PathBuf::from("logs/seqA_20240309_080706.log")
        );
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(true), "seqacquire=info");
        assert_eq!(default_filter(false), "seqacquire=warn");
    }

    #[tokio::test]
    async fn test_run_log_captures_events_and_tally() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::create(dir.path().join("runs").join("seq.log")).unwrap();

        async {
            tracing::info!("processing image 42");
            tracing::debug!("not captured");
        }
        .with_subscriber(log.subscriber(false))
        .await;
        log.append("Sequence seq: 1 listed\n").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("processing image 42"));
        assert!(!content.contains("not captured"));
        assert!(content.ends_with("Sequence seq: 1 listed\n"));
    }
}
