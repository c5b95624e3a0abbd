use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use agentbox_protocol::{Tier, DEFAULT_HOST, DEFAULT_PORT};

/// Top-level daemon configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Schema version; must be the literal 1.
    pub version: u32,
    pub workspaces: Vec<WorkspaceConfig>,
    pub default_workspace: Option<String>,
    pub server: ServerConfig,
    pub commands: CommandsConfig,
    pub approvals: ApprovalsConfig,
    pub logging: LoggingConfig,
    /// Deny globs applied to every workspace, after the built-in set.
    pub global_deny_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            workspaces: Vec::new(),
            default_workspace: None,
            server: ServerConfig::default(),
            commands: CommandsConfig::default(),
            approvals: ApprovalsConfig::default(),
            logging: LoggingConfig::default(),
            global_deny_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path, or fall back to `<configDir>/config.yaml`
    /// when it exists, or plain defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = config_dir()?.join("config.yaml");
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.version == 1,
            "config version must be 1 (got {})",
            self.version
        );
        let mut seen = std::collections::HashSet::new();
        for ws in &self.workspaces {
            anyhow::ensure!(!ws.name.is_empty(), "workspace name must not be empty");
            anyhow::ensure!(
                seen.insert(ws.name.as_str()),
                "duplicate workspace name: {}",
                ws.name
            );
            anyhow::ensure!(
                ws.path.is_absolute(),
                "workspace '{}' path must be absolute: {}",
                ws.name,
                ws.path.display()
            );
        }
        if let Some(name) = &self.default_workspace {
            anyhow::ensure!(
                self.workspaces.iter().any(|w| &w.name == name),
                "defaultWorkspace '{}' does not name a configured workspace",
                name
            );
        }
        anyhow::ensure!(self.server.port != 0, "server.port must not be 0");
        anyhow::ensure!(
            self.approvals.approval_timeout_ms >= 1_000,
            "approvals.approvalTimeoutMs must be at least 1000"
        );
        if self.server.host != DEFAULT_HOST && self.server.host != "localhost" {
            tracing::warn!(
                host = %self.server.host,
                "server.host is not loopback; every holder of the token can drive this daemon"
            );
        }
        Ok(())
    }

    /// Pick the workspace a session should bind to: an explicit name, else
    /// `defaultWorkspace`, else the sole configured entry.
    pub fn select_workspace(&self, name: Option<&str>) -> Result<&WorkspaceConfig> {
        if let Some(name) = name {
            return self
                .workspaces
                .iter()
                .find(|w| w.name == name)
                .with_context(|| format!("no workspace named '{name}' in config"));
        }
        if let Some(name) = &self.default_workspace {
            return self
                .workspaces
                .iter()
                .find(|w| &w.name == name)
                .with_context(|| format!("defaultWorkspace '{name}' missing"));
        }
        match self.workspaces.as_slice() {
            [only] => Ok(only),
            [] => anyhow::bail!("no workspaces configured"),
            _ => anyhow::bail!(
                "multiple workspaces configured; pass --workspace or set defaultWorkspace"
            ),
        }
    }
}

/// One workspace entry in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    #[serde(default)]
    pub allow_vcs: bool,
}

fn default_tier() -> Tier {
    Tier::Read
}

/// Runtime workspace descriptor. Root is canonicalised once at startup and
/// the whole struct is immutable for the daemon's lifetime.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub name: String,
    pub root: PathBuf,
    pub tier: Tier,
    pub deny_patterns: Vec<String>,
    pub allow_vcs: bool,
}

impl Workspace {
    pub fn from_config(cfg: &WorkspaceConfig) -> Result<Self> {
        let root = std::fs::canonicalize(&cfg.path).with_context(|| {
            format!(
                "workspace '{}' root does not resolve: {}",
                cfg.name,
                cfg.path.display()
            )
        })?;
        anyhow::ensure!(
            root.is_dir(),
            "workspace '{}' root is not a directory: {}",
            cfg.name,
            root.display()
        );
        Ok(Self {
            name: cfg.name.clone(),
            root,
            tier: cfg.tier,
            deny_patterns: cfg.deny_patterns.clone(),
            allow_vcs: cfg.allow_vcs,
        })
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            transport: Transport::Http,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Line-delimited frames on stdin/stdout.
    Stdio,
    /// WebSocket on a loopback HTTP listener.
    Http,
}

/// User command allow/deny regex lists (layered under the built-ins).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Approval gating for write- and exec-tier side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovalsConfig {
    pub require_write_approval: bool,
    pub require_exec_approval: bool,
    /// Regexes matched against an approval description; a match auto-approves.
    pub auto_approve_patterns: Vec<String>,
    pub approval_timeout_ms: u64,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            require_write_approval: true,
            require_exec_approval: true,
            auto_approve_patterns: Vec::new(),
            approval_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub json_logs: bool,
    pub timestamps: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_logs: false,
            timestamps: true,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Well-known paths
// ---------------------------------------------------------------------------

/// `~/.config/agentbox` (or the platform equivalent).
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("no user configuration directory")?;
    Ok(base.join("agentbox"))
}

pub fn token_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("token"))
}

pub fn audit_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("audit"))
}

pub fn logs_dir(config: &Config) -> Result<PathBuf> {
    match &config.logging.log_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(config_dir()?.join("logs")),
    }
}
