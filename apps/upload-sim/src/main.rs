//! Upload simulator entry point.
//!
//! ```text
//! upload-sim <DIR> [--config <FILE>]
//! ```
//!
//! Scans `DIR`, splits every file into chunks and uploads them over a
//! simulated lossy link, logging progress. Ctrl-C pauses all transfers and
//! prints what was reached.

mod config;
mod driver;
mod error;
mod scanner;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::SimConfig;
use crate::error::SimError;

#[derive(Debug, PartialEq)]
struct Args {
    dir: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, SimError> {
    let mut dir = None;
    let mut config = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| SimError::Usage("--config needs a file".into()))?;
                config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') => {
                return Err(SimError::Usage(format!("unknown flag {flag}")));
            }
            _ if dir.is_none() => dir = Some(PathBuf::from(&arg)),
            _ => return Err(SimError::Usage(format!("unexpected argument {arg}"))),
        }
    }
    let dir = dir.ok_or_else(|| SimError::Usage("upload-sim <DIR> [--config <FILE>]".into()))?;
    Ok(Args { dir, config })
}

async fn run(args: Args) -> Result<driver::Summary, SimError> {
    let config = SimConfig::load(args.config.as_deref())?;
    tracing::info!(
        chunk_size = config.upload.chunk_size,
        failure_rate = config.failure_rate,
        "configuration loaded"
    );

    let (files, total_size) = scanner::scan_dir(&args.dir)?;
    tracing::debug!(
        dir = %args.dir.display(),
        files = files.len(),
        total_bytes = total_size,
        "scan complete"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    driver::run(&config, &files, cancel).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting upload simulator");

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            tracing::error!(error = %e, "bad arguments");
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(summary) => {
            tracing::info!(
                files = summary.files,
                completed = summary.completed,
                failed = summary.failed,
                uploaded = summary.bytes_uploaded,
                total = summary.bytes_total,
                interrupted = summary.interrupted,
                "upload finished"
            );
            if summary.failed == 0 && !summary.interrupted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "upload simulation failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, SimError> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_dir_and_config() {
        assert_eq!(
            args(&["data", "--config", "sim.json"]).unwrap(),
            Args {
                dir: "data".into(),
                config: Some("sim.json".into()),
            }
        );
        assert_eq!(args(&["data"]).unwrap().config, None);
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(matches!(args(&[]), Err(SimError::Usage(_))));
        assert!(matches!(args(&["a", "b"]), Err(SimError::Usage(_))));
        assert!(matches!(args(&["a", "--config"]), Err(SimError::Usage(_))));
        assert!(matches!(args(&["--verbose"]), Err(SimError::Usage(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_over_a_scanned_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join("a.txt"), vec![1u8; 3000]).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        let config_path = dir.path().join("sim.json");
        std::fs::write(
            &config_path,
            r#"{"upload": {"chunkSize": 1024}, "failureRate": 0.0}"#,
        )
        .unwrap();

        let summary = run(Args {
            dir: dir.path().join("docs"),
            config: Some(config_path),
        })
        .await
        .unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.bytes_uploaded, 3000);
    }
}
