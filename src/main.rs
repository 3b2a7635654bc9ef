use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::config::{self, Config};
use facegate::enroll::{self, EnrollSettings, EnrollmentPipeline, EnrollmentRequest};
use facegate::scheduler::{CaptureScheduler, SchedulerSettings, VerifyOutcome};
use facegate::vision::{DetectorQualityGate, OnnxEmbeddingProvider, V4lCamera};
use facegate::{Embedding, EmbeddingProvider, MatchEngine, OneShotNotifier, SqliteCredentialStore};
use facegate_vision::ModelPaths;
use log::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Camera face verification and secure enrollment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new user from one camera capture
    Enroll {
        /// Username to register (letters, digits, underscore)
        #[arg(long)]
        username: String,
        /// Password for the new user, at least 8 characters
        #[arg(long)]
        password: String,
    },
    /// Watch the camera until the same face is seen twice
    Verify,
    /// Open config file in editor
    Config,
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = match config::load_config(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Enroll { username, password } => {
            let request = EnrollmentRequest::new(username, password);
            enroll(&cfg, &request)
        }
        Commands::Verify => verify(&cfg),
        Commands::Config => open_config(),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn enroll(cfg: &Config, request: &EnrollmentRequest) -> Result<bool> {
    let settings = EnrollSettings::from(&cfg.enroll);
    if let Err(e) = enroll::validate_request(request, settings.min_password_len) {
        eprintln!("{}", e.human_message());
        return Ok(false);
    }

    info!("Enrolling user: {}", request.username);
    let mut pipeline = match enrollment_pipeline(cfg, settings) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            debug!("enrollment setup failed: {:#}", e);
            eprintln!(
                "Enrollment is not available. Check the facegate installation and try again."
            );
            return Ok(false);
        }
    };

    match pipeline.enroll(request) {
        Ok(receipt) => {
            println!("✓ User {} enrolled successfully.", receipt.username);
            Ok(true)
        }
        Err(e) => {
            debug!("enrollment rejected: {}", e);
            eprintln!("{}", e.human_message());
            Ok(false)
        }
    }
}

type CliEnrollment = EnrollmentPipeline<
    SqliteCredentialStore,
    V4lCamera,
    DetectorQualityGate,
    OnnxEmbeddingProvider,
>;

/// Builds the enrollment collaborators. Runs only after input validation.
fn enrollment_pipeline(cfg: &Config, settings: EnrollSettings) -> Result<CliEnrollment> {
    let paths = ModelPaths::in_dir(&cfg.model_dir);
    let store = SqliteCredentialStore::open(&cfg.database)
        .with_context(|| format!("opening credential store {}", cfg.database.display()))?;
    let provider = OnnxEmbeddingProvider::load(&paths)?;
    let gate = provider.quality_gate(cfg.enroll.min_detection_score, cfg.verify.min_face_ratio);

    Ok(EnrollmentPipeline::new(
        store,
        V4lCamera::new(&cfg.camera),
        gate,
        provider,
        settings,
    ))
}

fn verify(cfg: &Config) -> Result<bool> {
    let paths = ModelPaths::in_dir(&cfg.model_dir);
    let mut provider = OnnxEmbeddingProvider::load(&paths)?;
    let fallback = fallback_embedding(cfg, &mut provider);

    let notifier = OneShotNotifier::new(cfg.notify.address, cfg.notify.timeout());
    let engine = MatchEngine::new(cfg.verify.match_threshold, cfg.verify.min_face_ratio);
    let mut scheduler = CaptureScheduler::new(
        provider,
        notifier,
        engine,
        SchedulerSettings::from(&cfg.verify),
        fallback,
        cfg.notify.message.clone(),
    );

    let report = scheduler.run(&V4lCamera::new(&cfg.camera));
    info!(
        "session: {} frame(s), {} capture(s)",
        report.state.iteration_count, report.state.capture_count
    );

    match report.outcome {
        VerifyOutcome::Matched(result) => {
            println!("✓ Face verified (distance {:.3})", result.score);
            Ok(true)
        }
        VerifyOutcome::Exhausted => {
            eprintln!("No matching face seen before the capture limit.");
            Ok(false)
        }
        VerifyOutcome::CameraFailed(e) => {
            warn!("{}", e);
            eprintln!("Camera unavailable. Check that it is connected and not in use.");
            Ok(false)
        }
    }
}

/// Embedding substituted for captures without a face.
fn fallback_embedding(cfg: &Config, provider: &mut OnnxEmbeddingProvider) -> Embedding {
    if let Some(path) = &cfg.verify.fallback_image {
        match provider.embed_file(path) {
            Ok(Some(embedding)) => return embedding,
            Ok(None) => warn!("no face in fallback image {}", path.display()),
            Err(e) => warn!("fallback image unusable: {:#}", e),
        }
    }
    Embedding::zeros(provider.dimension())
}

fn open_config() -> Result<bool> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(true)
}
