use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use orchestrator_agent::{AgentConfig, AgentModelClassifier, Driver, OpenCodeAgentClient};
use orchestrator_channels::config::{default_config_path, init_config, load_config, AppConfig};
use orchestrator_channels::{FeishuAppCredentials, FeishuMessenger, Messenger, NullMessenger};
use orchestrator_core::intent::HybridIntentClassifier;
use orchestrator_core::model::{RepoContext, TaskSource};
use orchestrator_core::store::TaskStore;
use orchestrator_engine::{generate_task_id, DispatchPolicy, Orchestrator, RepoConfig};
use orchestrator_server::{serve, AppState, SeenMessageStore};

#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "AI-agent task orchestrator: webhook intake, clarify/approve/run/test lifecycle")]
struct Cli {
    /// Path to the JSON config file; defaults to ~/.orchestrator/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook HTTP server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, default_value = "main")]
        base_branch: String,
        #[arg(long, default_value = "default")]
        repo_name: String,
        #[arg(long, default_value_t = false)]
        auto_provision_worktree: bool,
        #[arg(long, default_value_t = false)]
        auto_run: bool,
    },
    /// Create and (by default) clarify a task from a one-shot text request.
    Run {
        text: String,
        #[arg(long, default_value = "main")]
        base_branch: String,
        #[arg(long, default_value = "default")]
        repo_name: String,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default config file.
    Init {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the resolved config as JSON.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").with_target(false).init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Command::Config {
            action: ConfigAction::Init { force },
        } => {
            let path = init_config(&config_path, force).context("failed to write config")?;
            println!("wrote {}", path.display());
        }
        Command::Config {
            action: ConfigAction::Show,
        } => {
            let config = load_config(&config_path, true).context("failed to load config")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Serve {
            hostname,
            port,
            base_branch,
            repo_name,
            auto_provision_worktree,
            auto_run,
        } => {
            let config = load_config(&config_path, true).context("failed to load config")?;
            let orchestrator = build_orchestrator(&config)?;
            let messenger = build_messenger(&config);
            let repo = build_repo_config(&config, &repo_name, &base_branch);
            let policy = DispatchPolicy {
                auto_clarify: true,
                auto_provision_worktree,
                auto_run,
            };
            let seen_messages_path = config.resolved_path(&config.state_root).join("seen_messages.json");
            let seen_messages = SeenMessageStore::load(seen_messages_path).context("failed to load seen_messages.json")?;

            let state = AppState {
                orchestrator: Arc::new(orchestrator),
                messenger,
                repo,
                policy,
                feishu: config.channels.feishu.clone(),
                seen_messages: Arc::new(seen_messages),
            };

            let addr: SocketAddr = format!("{hostname}:{port}").parse().context("invalid hostname or port")?;
            serve(addr, state).await?;
        }
        Command::Run {
            text,
            base_branch,
            repo_name,
        } => {
            let config = load_config(&config_path, true).context("failed to load config")?;
            let orchestrator = build_orchestrator(&config)?;
            let repo = build_repo_config(&config, &repo_name, &base_branch);
            let source = TaskSource {
                source_type: "cli".to_string(),
                user_id: "cli".to_string(),
                chat_id: "cli".to_string(),
                message_id: generate_task_id(),
            };
            let repo_context = RepoContext {
                name: repo.name.clone(),
                base_branch: repo.base_branch.clone(),
                worktree_path: None,
                branch: None,
            };
            let title = text.chars().take(80).collect::<String>();
            let task = orchestrator.create_task(title, text, source, repo_context).await?;
            let task = orchestrator.clarify_task(&task.task_id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
    }

    Ok(())
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator<AgentModelClassifier>> {
    let tasks_root = config.resolved_path(&config.tasks_root);
    let artifacts_root = config.resolved_path(&config.artifacts_root);
    let reports_root = config.resolved_path(&config.reports_root);

    let store = TaskStore::new(tasks_root).context("failed to open task store")?;
    let agent_config = AgentConfig {
        artifact_root: artifacts_root,
        driver: Driver::Cli,
        timeout: Duration::from_secs(config.agent_timeout_secs),
        ..AgentConfig::default()
    };
    let agent = Arc::new(OpenCodeAgentClient::new(agent_config));
    let model_classifier = AgentModelClassifier::new("opencode", "classify");
    let intent = HybridIntentClassifier::new(Some(model_classifier));

    Ok(Orchestrator::new(store, agent, intent, reports_root))
}

fn build_messenger(config: &AppConfig) -> Arc<dyn Messenger> {
    if config.channels.feishu.enabled {
        Arc::new(FeishuMessenger::new(FeishuAppCredentials {
            app_id: config.channels.feishu.app_id.clone(),
            app_secret: config.channels.feishu.app_secret.clone(),
            enabled: true,
        }))
    } else {
        Arc::new(NullMessenger)
    }
}

fn build_repo_config(config: &AppConfig, repo_name: &str, base_branch: &str) -> RepoConfig {
    let repo_path = config.resolved_path(&config.repo_path);
    let worktrees_root = if config.worktrees_root.is_empty() {
        repo_path.join("worktrees")
    } else {
        config.resolved_path(&config.worktrees_root)
    };
    RepoConfig {
        name: repo_name.to_string(),
        base_branch: base_branch.to_string(),
        repo_path,
        worktrees_root,
        branch_prefix: config.branch_prefix.clone(),
    }
}
