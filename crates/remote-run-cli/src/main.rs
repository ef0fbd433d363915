//! Remote Run CLI
//!
//! The `remote-run` command sends uncommitted changes to the build server as
//! a personal build.
//!
//! ## Commands
//!
//! - `changes`: List the changes a remote run would send
//! - `prepare`: Write the patch file and print its path
//! - `run`: Build, upload and follow the patch until every build finishes
//! - `inspect`: Decode an existing patch file
//!
//! Exit status is 0 on success, 2 when a queued build failed and 1 on any
//! error.

mod telemetry;

use std::future::{self, Future};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use build_server_client::config::DEFAULT_SERVER_URL;
use build_server_client::{RestBuildServer, ServerConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use remote_run_core::{
    BuildConfig, BuildParameter, BuildServer, ChangeKind, ChangeListStatus, CheckInInfo,
    ContentMode, CvsProvider, CvsResource, GitConfig, GitProvider, ParameterKind, PatchBuilder,
    PatchReader, PatchRecord, PatchSender, PollConfig, RemoteRunReport, SentPatch, TfvcConfig,
    TfvcProvider,
};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "remote-run")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run personal builds against uncommitted changes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the changes a remote run would send
    Changes {
        #[command(flatten)]
        vcs: VcsArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Write the patch file and print its path
    Prepare {
        #[command(flatten)]
        vcs: VcsArgs,

        /// Directory under which the patch directory is created
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },

    /// Send changes as a personal build and wait for every build to finish
    Run {
        #[command(flatten)]
        vcs: VcsArgs,

        #[command(flatten)]
        server: ServerArgs,

        /// Build configuration to queue (repeatable)
        #[arg(short = 'b', long = "build", required = true)]
        builds: Vec<String>,

        /// Build parameter as NAME=VALUE; `system.` and `env.` prefixes select the kind
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<BuildParameter>,

        /// Description attached to the uploaded changes
        #[arg(short, long, default_value = "Remote run")]
        message: String,

        /// Seconds between build status checks
        #[arg(long, default_value_t = 10)]
        poll_interval: u64,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Decode a patch file and list its records
    Inspect {
        /// Patch file to decode
        patch: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VcsKind {
    Git,
    Tfvc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
struct VcsArgs {
    /// Version control system of the working copy
    #[arg(long, value_enum, default_value_t = VcsKind::Git)]
    vcs: VcsKind,

    /// Directory inside the working copy
    #[arg(short = 'C', long, default_value = ".")]
    work_dir: PathBuf,

    /// Send staged content instead of the working tree (git)
    #[arg(long)]
    staged: bool,

    /// Remote whose URL identifies the repository (git)
    #[arg(long, default_value = "origin")]
    remote: String,

    /// Server folder mapped to the work dir, e.g. `$/Project` (tfvc)
    #[arg(long, env = "REMOTE_RUN_TFVC_SERVER_ROOT")]
    server_root: Option<String>,

    /// Path to the git or tf binary
    #[arg(long)]
    vcs_binary: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ServerArgs {
    /// Build server URL
    #[arg(long, env = "REMOTE_RUN_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    #[arg(long, env = "REMOTE_RUN_USER")]
    user: Option<String>,

    /// Password or access token
    #[arg(long, env = "REMOTE_RUN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Server-side user id owning the uploaded changes
    #[arg(long, env = "REMOTE_RUN_USER_ID")]
    user_id: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

impl ServerArgs {
    fn config(&self) -> ServerConfig {
        let mut config =
            ServerConfig::new(&self.server).with_timeout(Duration::from_secs(self.timeout));
        config.username = self.user.clone();
        config.password = self.password.clone();
        config.user_id = self.user_id.clone();
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json, telemetry::level_for(cli.verbose, cli.quiet));

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            debug!(error = ?e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Changes { vcs, output } => {
            cmd_changes(&vcs, output).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Prepare { vcs, temp_dir } => {
            cmd_prepare(&vcs, temp_dir.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            vcs,
            server,
            builds,
            params,
            message,
            poll_interval,
            output,
        } => {
            let configs = build_configs(&builds, &params);
            let poll = PollConfig::with_interval(Duration::from_secs(poll_interval));
            let status = cmd_run(&vcs, &server, &configs, &message, poll, output).await?;
            Ok(match status {
                ChangeListStatus::Checked => ExitCode::SUCCESS,
                ChangeListStatus::Failed => ExitCode::from(2),
            })
        }
        Commands::Inspect { patch, output } => {
            cmd_inspect(&patch, output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn open_provider(args: &VcsArgs) -> Result<Arc<dyn CvsProvider>> {
    let provider: Arc<dyn CvsProvider> = match args.vcs {
        VcsKind::Git => {
            let mut config = GitConfig::new(&args.work_dir);
            if args.staged {
                config = config.with_content_mode(ContentMode::Staged);
            }
            config.remote = args.remote.clone();
            if let Some(binary) = &args.vcs_binary {
                config.binary = binary.clone();
            }
            let provider = GitProvider::discover(config)
                .await
                .with_context(|| format!("no git working copy at {}", args.work_dir.display()))?;
            Arc::new(provider)
        }
        VcsKind::Tfvc => {
            let server_root = args
                .server_root
                .as_deref()
                .context("--server-root is required for tfvc workspaces")?;
            if args.staged {
                warn!("--staged only applies to git, ignoring");
            }
            let workspace_root = std::path::absolute(&args.work_dir)
                .with_context(|| format!("invalid work dir {}", args.work_dir.display()))?;
            let mut config = TfvcConfig::new(workspace_root, server_root);
            if let Some(binary) = &args.vcs_binary {
                config.binary = binary.clone();
            }
            Arc::new(TfvcProvider::new(config))
        }
    };
    Ok(provider)
}

async fn collect(provider: &Arc<dyn CvsProvider>, message: &str) -> Result<CheckInInfo> {
    CheckInInfo::collect(provider, message)
        .await
        .with_context(|| format!("failed to collect {} changes", provider.name()))
}

async fn cmd_changes(vcs: &VcsArgs, output: OutputFormat) -> Result<()> {
    let provider = open_provider(vcs).await?;
    let check_in = collect(&provider, "").await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&check_in.resources)?),
        OutputFormat::Text => print!("{}", render_changes(&check_in.resources)),
    }
    Ok(())
}

async fn cmd_prepare(vcs: &VcsArgs, temp_dir: Option<&Path>) -> Result<()> {
    let provider = open_provider(vcs).await?;
    let check_in = collect(&provider, "").await?;
    if check_in.is_empty() {
        warn!("no changes found, the patch will be empty");
    }

    let mut builder = new_builder(temp_dir);
    let path = builder
        .prepare_patch(&[check_in])
        .await
        .context("failed to build patch")?;
    info!(
        records = builder.records_written(),
        content_bytes = builder.content_bytes_written(),
        "patch ready"
    );
    println!("{}", path.display());
    Ok(())
}

async fn cmd_run(
    vcs: &VcsArgs,
    server_args: &ServerArgs,
    configs: &[BuildConfig],
    message: &str,
    poll: PollConfig,
    output: OutputFormat,
) -> Result<ChangeListStatus> {
    let provider = open_provider(vcs).await?;
    let config = server_args.config();
    let server: Arc<dyn BuildServer> =
        Arc::new(RestBuildServer::new(&config).context("failed to create HTTP client")?);
    let sender = PatchSender::new(server, Arc::new(config)).with_poll_config(poll);

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            future::pending::<()>().await;
        }
    };
    let report = remote_run(&sender, &provider, configs, message, None, interrupt).await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", render_report(&report)),
    }
    Ok(report.status)
}

/// Collect, build, send and wait.
///
/// `interrupt` aborts the run while the patch is built or sent. Once the
/// builds are queued it only stops polling at the next status check.
async fn remote_run(
    sender: &PatchSender,
    provider: &Arc<dyn CvsProvider>,
    configs: &[BuildConfig],
    message: &str,
    temp_dir: Option<&Path>,
    interrupt: impl Future<Output = ()>,
) -> Result<RemoteRunReport> {
    tokio::pin!(interrupt);

    let SentPatch {
        change_list,
        mut builds,
    } = tokio::select! {
        biased;
        () = &mut interrupt => bail!("interrupted before the builds were queued"),
        sent = send_changes(sender, provider, configs, message, temp_dir) => sent?,
    };

    let status = {
        let wait = sender.wait_for_change_finish(&mut builds);
        tokio::pin!(wait);
        tokio::select! {
            status = &mut wait => status,
            () = &mut interrupt => {
                warn!("interrupted, stopping after the current status check");
                sender.cancellation().cancel();
                wait.await
            }
        }
    }
    .context("remote run failed")?;

    Ok(RemoteRunReport {
        change_list,
        builds,
        status,
    })
}

async fn send_changes(
    sender: &PatchSender,
    provider: &Arc<dyn CvsProvider>,
    configs: &[BuildConfig],
    message: &str,
    temp_dir: Option<&Path>,
) -> Result<SentPatch> {
    sender.require_credentials()?;
    let check_in = collect(provider, message).await?;
    if check_in.is_empty() {
        bail!("no changes to send");
    }
    info!(
        changes = check_in.resources.len(),
        builds = configs.len(),
        "starting remote run"
    );

    let mut builder = new_builder(temp_dir);
    let patch = builder
        .prepare_patch(&[check_in])
        .await
        .context("failed to build patch")?;
    sender
        .send_patch(configs, &patch, message)
        .await
        .context("failed to send patch")
}

fn cmd_inspect(path: &Path, output: OutputFormat) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let records = PatchReader::new(std::io::BufReader::new(file))
        .read_all()
        .with_context(|| format!("{} is not a valid patch", path.display()))?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => print!("{}", render_records(&records)),
    }
    Ok(())
}

fn new_builder(temp_dir: Option<&Path>) -> PatchBuilder {
    temp_dir.map(PatchBuilder::with_temp_root).unwrap_or_default()
}

fn build_configs(ids: &[String], params: &[BuildParameter]) -> Vec<BuildConfig> {
    ids.iter()
        .map(|id| {
            params
                .iter()
                .cloned()
                .fold(BuildConfig::new(id), BuildConfig::with_parameter)
        })
        .collect()
}

fn parse_param(raw: &str) -> std::result::Result<BuildParameter, String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let name = name.trim();

    let (kind, name) = if let Some(rest) = name.strip_prefix("system.") {
        (ParameterKind::System, rest)
    } else if let Some(rest) = name.strip_prefix("env.") {
        (ParameterKind::Env, rest)
    } else {
        (ParameterKind::Config, name)
    };
    if name.is_empty() {
        return Err(format!("missing parameter name in {raw:?}"));
    }
    Ok(BuildParameter::new(kind, name, value))
}

// ── Rendering ─────────────────────────────────────────────────────────────

fn render_changes(resources: &[CvsResource]) -> String {
    if resources.is_empty() {
        return "No changes.\n".to_string();
    }
    let mut out = String::new();
    for resource in resources {
        let line = match &resource.kind {
            ChangeKind::Renamed {
                previous_server_path,
                ..
            } => format!(
                "{:<9} {} (from {})\n",
                resource.kind.label(),
                resource.server_path,
                previous_server_path
            ),
            kind => format!("{:<9} {}\n", kind.label(), resource.server_path),
        };
        out.push_str(&line);
    }
    out
}

fn render_report(report: &RemoteRunReport) -> String {
    let mut out = format!("Change list {}: {}\n", report.change_list, report.status);
    for build in &report.builds {
        out.push_str(&format!(
            "  {:<24} #{:<8} {}\n",
            build.build_config_id,
            build.build_id,
            build.status.as_deref().unwrap_or("UNKNOWN")
        ));
    }
    out
}

fn render_records(records: &[PatchRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let length = record
            .content_length
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<9} {:>10} {}\n",
            record.kind_label(),
            length,
            record.server_path
        ));
    }
    out.push_str(&format!("{} record(s)\n", records.len()));
    out
}
