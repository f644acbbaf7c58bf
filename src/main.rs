use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::warn;

use taskforge::checkpoint::TaskOutcome;
use taskforge::config::{CliOverrides, Config};
use taskforge::errors::TaskforgeError;
use taskforge::logging::init_logging;
use taskforge::state::{
    ArtifactKind, CalibrationOutcome, FailureCategory, Recommendation, TaskValidationVerdict,
    VerificationVerdict,
};

mod cmd;

#[derive(Parser)]
#[command(name = "taskforge")]
#[command(version, about = "Task-orchestration core for a phase-gated build pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Planning directory (default: ./project-planning)
    #[arg(long, global = true)]
    pub planning_dir: Option<PathBuf>,

    /// Directory the tasks build into
    #[arg(long, global = true)]
    pub target_dir: Option<PathBuf>,

    /// Directory holding the JSON schemas
    #[arg(long, global = true)]
    pub schema_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            planning_dir: self.planning_dir.clone(),
            target_dir: self.target_dir.clone(),
            schema_dir: self.schema_dir.clone(),
            verbose: self.verbose,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the state document for a target directory
    Init {
        /// Overrides --target-dir and configuration
        target_dir: Option<PathBuf>,
    },
    /// Show phase and task counts
    Status,
    /// List tasks whose dependencies are satisfied
    Ready,
    /// Merge task definitions from tasks/*.json into the state
    LoadTasks,
    /// Parse, validate and record an upstream artifact
    RegisterArtifact {
        /// capability_map or physical_map
        kind: ArtifactKind,
        /// Defaults to the artifact's standard location
        path: Option<PathBuf>,
    },
    /// Record the task-definition review verdict
    ValidateTasks {
        /// READY, READY_WITH_NOTES or BLOCKED
        verdict: TaskValidationVerdict,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long = "issue")]
        issues: Vec<String>,
    },
    /// Move to the next phase if its exit gate is open
    Advance {
        /// Only report what blocks the advance
        #[arg(long)]
        check: bool,
    },
    /// Return to the definition phase for re-planning
    Replan { reason: String },
    /// Task lifecycle transitions
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Add token usage to the execution totals
    LogTokens {
        task_id: String,
        input_tokens: u64,
        output_tokens: u64,
        #[arg(long, default_value = "0")]
        cost: f64,
        #[arg(long)]
        model: Option<String>,
    },
    /// Record a verifier verdict for a task
    RecordVerification {
        task_id: String,
        /// PASS, FAIL or CONDITIONAL
        verdict: VerificationVerdict,
        /// PROCEED or BLOCK
        recommendation: Recommendation,
        /// JSON file with a list of {name, passed, evidence}
        #[arg(long)]
        criteria_file: Option<PathBuf>,
    },
    /// Record whether a verifier verdict matched reality
    RecordCalibration {
        task_id: String,
        /// correct, false_positive or false_negative
        outcome: CalibrationOutcome,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show verifier calibration history and score
    Calibration,
    /// Request a cooperative halt
    Halt {
        reason: String,
        #[arg(long, default_value = "user")]
        requested_by: String,
    },
    /// Clear a halt request
    Resume,
    /// Exit 1 when a halt has been requested
    CheckHalt,
    /// Acknowledge a halt request and record running tasks
    ConfirmHalt,
    /// Show halt details
    HaltStatus,
    /// Performance metrics over task history
    Metrics,
    /// Progress per implementation phase
    PlanningMetrics,
    /// Failure breakdown by category
    FailureMetrics,
    /// Salvage a corrupt state document
    RecoverState,
    /// Execution batch checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Execution bundles
    Bundle {
        #[command(subcommand)]
        command: BundleCommands,
    },
    /// Graph and quality checks
    Validate {
        #[command(subcommand)]
        command: ValidateCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TaskCommands {
    /// pending -> running
    Start { task_id: String },
    /// running -> complete
    Complete {
        task_id: String,
        #[arg(long = "created")]
        created: Vec<String>,
        #[arg(long = "modified")]
        modified: Vec<String>,
        /// Take the file lists from bundles/<ID>-result.json
        #[arg(long)]
        from_result: bool,
    },
    /// running -> failed
    Fail {
        task_id: String,
        #[arg(long, default_value = "unknown")]
        category: FailureCategory,
        #[arg(long, default_value = "")]
        message: String,
        /// Defaults from the category
        #[arg(long)]
        retryable: Option<bool>,
    },
    /// failed -> pending
    Retry { task_id: String },
    /// pending or blocked -> skipped
    Skip {
        task_id: String,
        #[arg(long, default_value = "skipped by operator")]
        reason: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// Start tracking a batch of tasks about to be spawned
    Create {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
    /// Record one task's outcome
    Update {
        task_id: String,
        /// success or failed
        outcome: TaskOutcome,
    },
    /// Mark the checkpoint complete
    Complete,
    Status,
    /// Reconcile pending tasks against result documents
    Recover,
    Clear,
}

#[derive(Subcommand, Clone)]
pub enum BundleCommands {
    Generate {
        task_id: String,
    },
    /// Generate bundles for every ready task
    GenerateReady {
        /// Overrides bundle.max_workers
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Validate a bundle against its schema
    Validate {
        task_id: String,
    },
    /// Report files changed since the bundle was generated
    ValidateIntegrity {
        task_id: String,
    },
    List,
    Clean,
    /// Files a worker reported in its result document
    ResultFiles {
        task_id: String,
    },
    /// Attach commit metadata to a result document
    UpdateGit {
        task_id: String,
        sha: String,
        #[arg(long, default_value = "")]
        message: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ValidateCommands {
    /// Check the task graph for missing references and cycles
    Dag {
        /// Read tasks/*.json instead of the state document
        #[arg(long)]
        definitions: bool,
    },
    /// Run spec coverage, acceptance criteria and phase leakage gates
    Gates {
        /// Implementation phase checked for leakage
        #[arg(long)]
        phase: Option<u32>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Order the steel-thread subset of the graph
    SteelThread,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default taskforge.toml file
    Init,
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<TaskforgeError>() {
        Some(e) => {
            eprintln!("ERROR [{}:{}] {}", e.category(), e.code(), e);
            if let TaskforgeError::ValidationFailed { violations, .. } = e {
                for violation in violations {
                    eprintln!("  - {}", violation);
                }
            }
        }
        None => eprintln!("ERROR [internal:INTERNAL] {:#}", err),
    }
}

async fn dispatch(cli: &Cli, ctx: &cmd::Ctx) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Init { target_dir } => cmd::cmd_init(ctx, target_dir.as_deref())?,
        Commands::Status => cmd::cmd_status(ctx)?,
        Commands::Ready => cmd::cmd_ready(ctx)?,
        Commands::LoadTasks => cmd::cmd_load_tasks(ctx)?,
        Commands::RegisterArtifact { kind, path } => {
            return cmd::cmd_register_artifact(ctx, *kind, path.as_deref());
        }
        Commands::ValidateTasks {
            verdict,
            summary,
            issues,
        } => cmd::cmd_validate_tasks(ctx, *verdict, summary.clone(), issues.clone())?,
        Commands::Advance { check } => return cmd::cmd_advance(ctx, *check),
        Commands::Replan { reason } => cmd::cmd_replan(ctx, reason)?,
        Commands::Task { command } => cmd::cmd_task(ctx, command.clone())?,
        Commands::LogTokens {
            task_id,
            input_tokens,
            output_tokens,
            cost,
            model,
        } => cmd::cmd_log_tokens(
            ctx,
            task_id,
            *input_tokens,
            *output_tokens,
            *cost,
            model.as_deref(),
        )?,
        Commands::RecordVerification {
            task_id,
            verdict,
            recommendation,
            criteria_file,
        } => cmd::cmd_record_verification(
            ctx,
            task_id,
            *verdict,
            *recommendation,
            criteria_file.as_deref(),
        )?,
        Commands::RecordCalibration {
            task_id,
            outcome,
            notes,
        } => cmd::cmd_record_calibration(ctx, task_id, *outcome, notes.clone())?,
        Commands::Calibration => cmd::cmd_calibration(ctx)?,
        Commands::Halt {
            reason,
            requested_by,
        } => cmd::cmd_halt(ctx, reason, requested_by)?,
        Commands::Resume => cmd::cmd_resume(ctx)?,
        Commands::CheckHalt => return cmd::cmd_check_halt(ctx),
        Commands::ConfirmHalt => cmd::cmd_confirm_halt(ctx)?,
        Commands::HaltStatus => cmd::cmd_halt_status(ctx)?,
        Commands::Metrics => cmd::cmd_metrics(ctx)?,
        Commands::PlanningMetrics => cmd::cmd_planning_metrics(ctx)?,
        Commands::FailureMetrics => cmd::cmd_failure_metrics(ctx)?,
        Commands::RecoverState => cmd::cmd_recover_state(ctx)?,
        Commands::Checkpoint { command } => return cmd::cmd_checkpoint(ctx, command.clone()),
        Commands::Bundle { command } => return cmd::cmd_bundle(ctx, command.clone()).await,
        Commands::Validate { command } => return cmd::cmd_validate(ctx, command.clone()),
        Commands::Config { command } => cmd::cmd_config(ctx, command.clone())?,
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env(cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e.into());
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_level, config.log_format);
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let ctx = cmd::Ctx {
        config,
        json: cli.json,
    };
    match dispatch(&cli, &ctx).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}
