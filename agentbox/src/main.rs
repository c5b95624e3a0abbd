use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agentbox::cli;
use agentbox::config::{self, Config, Transport, Workspace};
use agentbox::server::{self, DaemonState};
use agentbox::token;
use agentbox_protocol::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "agentbox", version, about = "Sandboxed local agent daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon.
    Serve {
        /// Path to config file (YAML).
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Workspace to expose (defaults to defaultWorkspace, or the sole entry).
        #[arg(long)]
        workspace: Option<String>,
        /// Listen host override.
        #[arg(long)]
        host: Option<String>,
        /// Listen port override.
        #[arg(long)]
        port: Option<u16>,
        /// Rotate the auth token before starting.
        #[arg(long)]
        new_token: bool,
        /// Print the auth token and exit.
        #[arg(long)]
        show_token: bool,
    },
    /// Talk to a running daemon over the wire.
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },
    /// Run a tool locally, short-circuiting the wire.
    Tool {
        #[command(subcommand)]
        command: ToolCommands,
    },
    /// Verify configuration, workspaces, git, and token storage.
    Check {
        /// Path to config file (YAML).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Authenticated liveness probe.
    Ping {
        /// WebSocket URL (default ws://127.0.0.1:3847/ws).
        #[arg(long)]
        url: Option<String>,
        /// Auth token (default: the stored token file).
        #[arg(long)]
        token: Option<String>,
    },
    /// Invoke a single tool.
    Call {
        /// Tool name, e.g. fs.read.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Id of an approved pending approval, when retrying a gated call.
        #[arg(long)]
        approval_id: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum ToolCommands {
    /// Invoke a tool against a local workspace without the daemon.
    Call {
        /// Tool name, e.g. fs.list.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(default_value = "{}")]
        args: String,
        /// Path to config file (YAML).
        #[arg(long, short)]
        config: Option<PathBuf>,
        #[arg(long)]
        workspace: Option<String>,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_filter()));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    match (config.logging.json_logs, config.logging.timestamps) {
        (true, true) => builder.json().init(),
        (true, false) => builder.json().without_time().init(),
        (false, true) => builder.init(),
        (false, false) => builder.without_time().init(),
    }
}

fn client_opts(url: Option<String>, token_flag: Option<String>) -> Result<cli::ClientOpts> {
    let url = url.unwrap_or_else(|| format!("ws://{DEFAULT_HOST}:{DEFAULT_PORT}/ws"));
    let token = match token_flag {
        Some(token) => token,
        None => token::load(&config::token_path()?)
            .context("no --token given and no stored token; run `agentbox serve` once")?,
    };
    Ok(cli::ClientOpts { url, token })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = Cli::parse();

    match cli_args.command {
        Commands::Serve {
            config: config_path,
            workspace,
            host,
            port,
            new_token,
            show_token,
        } => {
            let mut config = Config::load_or_default(config_path.as_deref())?;
            init_tracing(&config);

            let token_path = config::token_path()?;
            if show_token {
                println!("{}", token::load_or_generate(&token_path)?);
                return Ok(());
            }
            if new_token {
                let fresh = token::generate();
                token::store(&token_path, &fresh)?;
                tracing::info!(path = %token_path.display(), "auth token rotated");
            }
            let token = token::load_or_generate(&token_path)?;

            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let ws_cfg = config.select_workspace(workspace.as_deref())?;
            let workspace = Arc::new(Workspace::from_config(ws_cfg)?);
            tracing::info!(
                workspace = %workspace.name,
                root = %workspace.root.display(),
                tier = %workspace.tier,
                allow_vcs = workspace.allow_vcs,
                "workspace bound"
            );

            let audit_dir = config::audit_dir()?;
            let logs_dir = config::logs_dir(&config)?;
            let transport = config.server.transport;
            let state = Arc::new(DaemonState::new(
                Arc::new(config.clone()),
                workspace,
                token,
                audit_dir,
                logs_dir,
            ));

            match transport {
                Transport::Http => {
                    let addr = format!("{}:{}", config.server.host, config.server.port);
                    let listener = tokio::net::TcpListener::bind(&addr)
                        .await
                        .with_context(|| format!("binding {addr}"))?;
                    server::serve_http(state, listener).await
                }
                Transport::Stdio => server::serve_stdio(state).await,
            }
        }

        Commands::Client { command } => match command {
            ClientCommands::Ping { url, token } => cli::ping(&client_opts(url, token)?).await,
            ClientCommands::Call {
                tool,
                args,
                approval_id,
                url,
                token,
            } => {
                let opts = client_opts(url, token)?;
                cli::call(&opts, &tool, &args, approval_id.as_deref()).await
            }
        },

        Commands::Tool { command } => match command {
            ToolCommands::Call {
                tool,
                args,
                config: config_path,
                workspace,
            } => {
                let config = Config::load_or_default(config_path.as_deref())?;
                cli::local_call(&config, workspace.as_deref(), &tool, &args).await
            }
        },

        Commands::Check {
            config: config_path,
        } => {
            let config = Config::load_or_default(config_path.as_deref())?;
            cli::run_check(&config, &config::token_path()?)
        }
    }
}
