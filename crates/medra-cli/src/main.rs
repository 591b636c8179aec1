// Medra CLI
// Command-line surface for running the code-healing orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use medra_core::logging::{init_tracing, LogFormat, LoggingConfig};
use medra_core::{CancelToken, Settings};
use medra_engine::{Orchestrator, OpenAiChat, ResultStore, RunRequest};
use medra_vcs::{GitCli, GitHubForge};

mod output;

/// Medra - autonomous code healing for broken repositories.
#[derive(Parser)]
#[command(name = "medra")]
#[command(about = "Medra - detects defects in a repository, fixes them with an LLM, and verifies against the test suite.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a healing pass against a repository
    Run {
        /// Repository URL (https://github.com/owner/repo)
        #[arg(long)]
        repo: String,

        /// Team name, used in the remediation branch name
        #[arg(long)]
        team: String,

        /// Team leader name, used in the remediation branch name
        #[arg(long)]
        leader: String,

        /// Push token; enables commit and push of applied fixes
        #[arg(long, env = "FORGE_TOKEN", hide_env_values = true)]
        push_token: Option<String>,

        /// Open a pull request after a successful push
        #[arg(long)]
        create_pr: bool,

        /// Watch forge CI and merge the PR on success
        #[arg(long)]
        auto_merge: bool,

        /// Generate tests for fixed files when the repo has none
        #[arg(long)]
        generate_tests: bool,

        /// Directory for result documents (defaults to RESULTS_DIR)
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Print the full result document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the result document of a previous run
    Show {
        /// Run id
        run_id: String,

        /// Directory holding result documents
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: if cli.verbose { "debug".to_string() } else { "info".to_string() },
        format: if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty },
        with_file: false,
    };
    let _ = init_tracing(&logging);

    match cli.command {
        Commands::Run {
            repo,
            team,
            leader,
            push_token,
            create_pr,
            auto_merge,
            generate_tests,
            results_dir,
            json,
        } => {
            let mut settings = Settings::load().context("failed to load settings")?;
            if let Some(dir) = results_dir {
                settings.results_dir = Some(dir);
            }

            let cancel = CancelToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            let llm = OpenAiChat::new(
                &settings.llm,
                std::time::Duration::from_secs(settings.timeouts.llm_secs),
            )
            .context("LLM configuration invalid")?;

            let forge: Option<Arc<dyn medra_vcs::Forge>> = settings
                .forge_token
                .clone()
                .or_else(|| push_token.clone())
                .map(GitHubForge::new)
                .transpose()
                .context("forge client construction failed")?
                .map(|f| Arc::new(f) as Arc<dyn medra_vcs::Forge>);

            let store = ResultStore::new(settings.results_dir());
            let orchestrator = Orchestrator::new(
                settings.clone(),
                Arc::new(GitCli::new(cancel.clone())),
                forge,
                Arc::new(llm),
                store,
                cancel,
            )
            .with_progress(Arc::new(|phase: &str, percent: u8, message: &str| {
                info!("[{percent:>3}%] {phase}: {message}");
            }));

            let request = RunRequest {
                repo_url: repo,
                team_name: team,
                leader_name: leader,
                push_token,
                create_pr,
                auto_merge_on_ci: auto_merge,
                generate_tests,
            };

            let result = orchestrator.run(request).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                output::render_result(&result);
            }
            Ok(())
        }
        Commands::Show { run_id, results_dir } => {
            let mut settings = Settings::load().context("failed to load settings")?;
            if let Some(dir) = results_dir {
                settings.results_dir = Some(dir);
            }
            let store = ResultStore::new(settings.results_dir());
            let result = store
                .load(&run_id)
                .with_context(|| format!("no result for run {run_id}"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

fn spawn_ctrl_c_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancellation requested, winding down");
            cancel.cancel();
        }
    });
}
