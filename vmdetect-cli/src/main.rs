//! `vmdetect` command-line host.
//!
//! Every result goes to stdout as one JSON object per line; logs go to
//! stderr (filter with `RUST_LOG`, default `vmdetect=info`).

mod settings;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use vmdetect_core::{JobOutcome, JobStatus, LabeledSample, VoicemailDetector};

#[derive(Debug, Parser)]
#[command(name = "vmdetect", version, about = "Voicemail / answering-machine detection")]
struct Cli {
    /// Settings JSON. Falls back to $VMDETECT_CONFIG, then the per-user file.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one or more recordings.
    Analyze {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// BCP-47 tag, e.g. pt-BR. Empty uses the configured default.
        #[arg(long, default_value = "")]
        language: String,
        /// Run through the background queue instead of one by one.
        #[arg(long)]
        queue: bool,
    },
    /// Train the classifier from a labeled manifest.
    Train {
        /// JSON array of `{ "path": ..., "isVoicemail": bool }`.
        manifest: PathBuf,
        /// Artifact path. Defaults to `aiModelPath` from the settings.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration (after defaults and env overrides).
    ShowConfig {
        /// Also write it to this path.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    path: PathBuf,
    is_voicemail: bool,
}

const QUEUE_WAIT: Duration = Duration::from_secs(600);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vmdetect=info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings_path = settings::resolve_settings_path(cli.settings.as_deref());
    let config = settings::load_settings(&settings_path)?;

    match cli.command {
        Command::ShowConfig { write } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = write {
                settings::save_settings(&path, &config)?;
                info!(path = %path.display(), "settings written");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Analyze {
            paths,
            language,
            queue,
        } => {
            let detector = VoicemailDetector::new(config);
            let failures = if queue {
                analyze_queued(&detector, &paths, &language)?
            } else {
                analyze_inline(&detector, &paths, &language)
            };
            info!(stats = ?detector.stats(), "done");
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Train { manifest, output } => {
            let Some(output) = output.or_else(|| config.ai_model_path.clone()) else {
                bail!("no --output given and aiModelPath is not configured");
            };
            let samples = load_manifest(&manifest)?;
            info!(samples = samples.len(), "training");

            let detector = VoicemailDetector::new(config);
            let report = detector.train_with_report(&samples, Some(&output))?;
            println!("{}", serde_json::to_string(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Returns how many inputs failed.
fn analyze_inline(detector: &VoicemailDetector, paths: &[PathBuf], language: &str) -> usize {
    let mut failures = 0;
    for path in paths {
        let line = match detector.analyze(path.as_path(), language) {
            Ok(result) => json!({ "path": path, "result": result }),
            Err(e) => {
                failures += 1;
                warn!(path = %path.display(), error = %e, "analysis failed");
                json!({ "path": path, "error": e.to_string() })
            }
        };
        println!("{line}");
    }
    failures
}

fn analyze_queued(
    detector: &VoicemailDetector,
    paths: &[PathBuf],
    language: &str,
) -> anyhow::Result<usize> {
    let (tx, rx) = crossbeam_channel::unbounded::<(PathBuf, JobOutcome)>();

    for path in paths {
        let tx = tx.clone();
        let reported = path.clone();
        let ticket = detector.submit(
            path.as_path(),
            language,
            Some(Box::new(move |outcome: &JobOutcome| {
                let _ = tx.send((reported, outcome.clone()));
            })),
        )?;
        info!(
            job_id = %ticket.job_id,
            position = ticket.queue_position,
            path = %path.display(),
            "queued"
        );
    }
    drop(tx);

    let mut failures = 0;
    for _ in paths {
        let (path, outcome) = rx
            .recv_timeout(QUEUE_WAIT)
            .context("timed out waiting for queued analyses")?;
        if outcome.status != JobStatus::Completed {
            failures += 1;
        }
        println!("{}", json!({ "path": path, "outcome": outcome }));
    }
    Ok(failures)
}

/// Relative manifest paths resolve against the manifest's directory.
fn load_manifest(path: &Path) -> anyhow::Result<Vec<LabeledSample>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read manifest {}", path.display()))?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    if entries.is_empty() {
        bail!("manifest {} lists no samples", path.display());
    }

    let base = path.parent().unwrap_or(Path::new("."));
    Ok(entries
        .into_iter()
        .map(|e| {
            let audio = if e.path.is_absolute() {
                e.path
            } else {
                base.join(e.path)
            };
            LabeledSample::new(audio, e.is_voicemail)
        })
        .collect())
}
