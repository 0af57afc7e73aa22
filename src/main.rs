//! Cipherflow: run a computation and print its plaintext results.
//!
//! Usage: `cipherflow <job-definition.json>`
//!
//! The job is submitted to the service configured through `CIPHERFLOW_*`
//! environment variables, polled to completion, and each result printed to
//! stdout as one JSON document per line. Encrypted results need a native
//! cryptographic engine and are only reported.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cipherflow::adapters::sanitize::SanitizingMakeWriter;
use cipherflow::adapters::{HttpComputationService, SystemClock};
use cipherflow::application::{decode_plaintext, ResultCollector, StatusPoller};
use cipherflow::ports::ComputationService;
use cipherflow::{CipherflowError, ClientConfig, JobDefinition};

/// Logs go to a file or to stderr, keeping stdout for results.
///
/// `CIPHERFLOW_LOG_MODE`: `file`, `stdout`, or `auto` (file when
/// `CIPHERFLOW_LOG_FILE` is set, stderr otherwise).
fn init_logging() -> Result<WorkerGuard> {
    let log_mode = std::env::var("CIPHERFLOW_LOG_MODE").unwrap_or_else(|_| "auto".to_string());
    let log_file = std::env::var("CIPHERFLOW_LOG_FILE").ok();

    let use_file = match log_mode.as_str() {
        "file" => true,
        "stdout" => false,
        _ => log_file.is_some(),
    };

    let (writer, guard) = if use_file {
        let log_file = log_file.unwrap_or_else(|| "cipherflow.log".to_string());
        if let Some(parent) = std::path::Path::new(&log_file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("cannot open log file {log_file}"))?;
        tracing_appender::non_blocking(file)
    } else if log_mode == "stdout" {
        tracing_appender::non_blocking(std::io::stdout())
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!use_file && std::io::stderr().is_terminal())
                .with_writer(SanitizingMakeWriter::new(writer)),
        )
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let _guard = init_logging()?;

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: cipherflow <job-definition.json>");
    };
    let definition: JobDefinition = serde_json::from_str(
        &std::fs::read_to_string(&path).with_context(|| format!("cannot read {path}"))?,
    )
    .with_context(|| format!("{path} is not a valid job definition"))?;

    let config = ClientConfig::from_env_or_default();
    tracing::info!("Starting Cipherflow against {}", config.base_url);
    tracing::debug!("Configuration: {:?}", config);

    let service = Arc::new(HttpComputationService::new(&config)?);
    let poller = StatusPoller::new(
        Arc::clone(&service),
        Arc::new(SystemClock::new()),
        config.poll.clone(),
    )?;
    let collector = ResultCollector::new(Arc::clone(&service));

    let handle = service
        .submit(&definition)
        .map_err(CipherflowError::Submission)?;
    tracing::info!("Submitted {} job {}", definition.computation.kind, handle);

    let job = poller.poll(&handle)?;
    let descriptors = collector.collect(&job)?;

    let mut failed = 0usize;
    for descriptor in &descriptors {
        let reference = &descriptor.reference;
        if descriptor.is_encrypted() || descriptor.required_post_processing.is_some() {
            tracing::warn!(
                "Result {} ({}) requires a cryptographic engine, skipping",
                reference,
                descriptor.content_type
            );
            continue;
        }

        let decoded = service
            .fetch_raw_bytes(reference)
            .map_err(|e| CipherflowError::ResultFetch {
                job: job.handle.id.clone(),
                result: reference.to_string(),
                source: e,
            })
            .and_then(|payload| decode_plaintext(&job.handle, descriptor, &payload));

        match decoded {
            Ok(artifact) => {
                let line = serde_json::json!({ "result": reference, "artifact": artifact });
                println!("{line}");
            }
            Err(e) => {
                tracing::error!("{}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} result(s) could not be decoded", descriptors.len());
    }

    tracing::info!("Cipherflow run of job {} complete", job.handle);
    Ok(())
}
