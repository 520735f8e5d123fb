//! Configuration management for the MCP Gemini client
//!
//! Handles the API key, MCP server definitions and workflow definitions.
//! Server and workflow files are JSON documents with a single top-level key
//! (`mcpServers` / `workflows`) mapping names to entries.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, Result};

/// File names searched for MCP server definitions, in order
pub const SERVER_CONFIG_FILES: &[&str] = &["mcp_servers.json", "mcp.json", ".mcp.json"];

/// File name searched for workflow definitions
pub const WORKFLOW_CONFIG_FILE: &str = "workflows.json";

const SERVERS_KEY: &str = "mcpServers";
const WORKFLOWS_KEY: &str = "workflows";
const STDIO_TRANSPORT: &str = "stdio";

/// Environment variables holding the Gemini API key, in priority order;
/// blank values are skipped
const API_KEY_VARS: &[&str] = &["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// Explicit configuration file locations (from the command line)
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Path to the MCP server definitions
    pub mcp_config_path: Option<PathBuf>,

    /// Path to the workflow definitions
    pub workflows_config_path: Option<PathBuf>,
}

/// A single MCP server entry from `mcpServers`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Executable to launch
    pub command: String,

    /// Command arguments
    pub args: Vec<String>,

    /// Extra environment variables for the server process
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Transport kind; only "stdio" is supported
    #[serde(default = "default_transport")]
    pub transport_type: String,
}

fn default_transport() -> String {
    STDIO_TRANSPORT.to_string()
}

impl ServerConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: format!("Server '{}' has an empty 'command'", name),
            }
            .into());
        }
        if self.transport_type != STDIO_TRANSPORT {
            return Err(ConfigError::UnsupportedTransport {
                server: name.to_string(),
                transport: self.transport_type.clone(),
            }
            .into());
        }
        Ok(())
    }
}

/// A workflow entry from `workflows`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Gemini model used by this workflow
    pub llm_model: String,

    /// MCP server backing this workflow (at most one)
    pub mcp_servers_used: Vec<String>,

    /// Prompt template; `{query}` is replaced by the user query
    pub initial_prompt_template: String,

    /// Upper bound on LLM round trips per query
    #[serde(default = "default_max_turns")]
    pub max_conversation_turns: u32,
}

fn default_max_turns() -> u32 {
    gemini::DEFAULT_MAX_TURNS
}

impl WorkflowConfig {
    /// Name of the MCP server this workflow talks to, if any
    pub fn server(&self) -> Option<&str> {
        self.mcp_servers_used.first().map(String::as_str)
    }

    fn validate(&self, name: &str, servers: &BTreeMap<String, ServerConfig>) -> Result<()> {
        if self.initial_prompt_template.trim().is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: format!("Workflow '{}' has an empty 'initial_prompt_template'", name),
            }
            .into());
        }
        if self.max_conversation_turns == 0 {
            return Err(ConfigError::InvalidConfig {
                message: format!("Workflow '{}' must allow at least one conversation turn", name),
            }
            .into());
        }
        if self.mcp_servers_used.len() > 1 {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "Workflow '{}' names {} MCP servers; only one server per session is supported",
                    name,
                    self.mcp_servers_used.len()
                ),
            }
            .into());
        }
        for server in &self.mcp_servers_used {
            if !servers.contains_key(server) {
                return Err(ConfigError::UndefinedServer {
                    workflow: name.to_string(),
                    server: server.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Configuration for the MCP Gemini client
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key
    pub api_key: String,

    /// Model used when no workflow picks one
    pub default_model: String,

    /// Configured MCP servers by name
    pub mcp_servers: BTreeMap<String, ServerConfig>,

    /// Configured workflows by name
    pub workflows: BTreeMap<String, WorkflowConfig>,

    /// Where the server definitions were loaded from
    pub mcp_config_path: Option<PathBuf>,

    /// Where the workflow definitions were loaded from
    pub workflows_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the environment and the config files
    pub fn load(options: &ConfigOptions) -> Result<Self> {
        // A missing .env is fine
        let _ = dotenvy::dotenv();

        let api_key = api_key_from(|var| std::env::var(var).ok())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                var: "GOOGLE_API_KEY or GEMINI_API_KEY".to_string(),
            })?;

        let default_model = std::env::var("GEMINI_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string());

        let config = Self::from_files(api_key, default_model, options, &search_dirs())?;
        tracing::info!("Application configuration loaded successfully");
        Ok(config)
    }

    /// Build a configuration from explicit values, searching `dirs` for
    /// files that were not given explicitly
    pub fn from_files(
        api_key: String,
        default_model: String,
        options: &ConfigOptions,
        dirs: &[PathBuf],
    ) -> Result<Self> {
        let mcp_config_path = resolve_path(options.mcp_config_path.as_deref(), SERVER_CONFIG_FILES, dirs)?;
        let workflows_config_path =
            resolve_path(options.workflows_config_path.as_deref(), &[WORKFLOW_CONFIG_FILE], dirs)?;

        let mcp_servers: BTreeMap<String, ServerConfig> = match &mcp_config_path {
            Some(path) => read_section(path, SERVERS_KEY)?,
            None => {
                tracing::debug!("No MCP server configuration file found");
                BTreeMap::new()
            }
        };
        for (name, server) in &mcp_servers {
            server.validate(name)?;
        }
        tracing::debug!("MCP server configurations validated");

        let workflows: BTreeMap<String, WorkflowConfig> = match &workflows_config_path {
            Some(path) => read_section(path, WORKFLOWS_KEY)?,
            None => {
                tracing::debug!("No workflow configuration file found");
                BTreeMap::new()
            }
        };
        for (name, workflow) in &workflows {
            workflow.validate(name, &mcp_servers)?;
        }
        tracing::debug!("Workflow configurations validated");

        Ok(Self {
            api_key,
            default_model,
            mcp_servers,
            workflows,
            mcp_config_path,
            workflows_config_path,
        })
    }

    /// Look up a configured MCP server
    pub fn server(&self, name: &str) -> Result<&ServerConfig> {
        self.mcp_servers.get(name).ok_or_else(|| {
            tracing::warn!("Attempt to get undefined MCP server: '{}'", name);
            ConfigError::UnknownServer {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Look up a configured workflow
    pub fn workflow(&self, name: &str) -> Result<&WorkflowConfig> {
        self.workflows.get(name).ok_or_else(|| {
            tracing::warn!("Attempt to get undefined workflow: '{}'", name);
            ConfigError::UnknownWorkflow {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Names of all configured MCP servers, sorted
    pub fn list_servers(&self) -> Vec<&str> {
        self.mcp_servers.keys().map(String::as_str).collect()
    }

    /// Names of all configured workflows, sorted
    pub fn list_workflows(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }
}

/// First non-blank API key among [`API_KEY_VARS`]
fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS
        .iter()
        .find_map(|var| lookup(var).filter(|k| !k.trim().is_empty()))
}

/// Directories searched for configuration files, in priority order
pub fn search_dirs() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        locations.push(cwd);
    }
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".config").join("mcp_client"));
        locations.push(home.join(".mcp_client"));
    }
    locations
}

/// Human readable list of the search locations, for error hints
pub fn search_locations_hint() -> String {
    "the current directory, ~/.config/mcp_client/ or ~/.mcp_client/".to_string()
}

fn resolve_path(explicit: Option<&Path>, names: &[&str], dirs: &[PathBuf]) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            tracing::error!("Configuration file not found: {}", path.display());
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let found = dirs
        .iter()
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file());
    if let Some(path) = &found {
        tracing::debug!("Found configuration file at {}", path.display());
    }
    Ok(found)
}

fn read_section<T: DeserializeOwned>(path: &Path, key: &str) -> Result<BTreeMap<String, T>> {
    let source = path.display().to_string();
    let raw = std::fs::read_to_string(path)?;

    let mut document: Value = serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidJson {
        path: source.clone(),
        message: e.to_string(),
    })?;

    let section = document
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
            path: source.clone(),
        })?;

    let entries = serde_json::from_value(section).map_err(|e| ConfigError::InvalidConfig {
        message: format!("{} in {}: {}", key, source, e),
    })?;

    tracing::info!("Loaded {} from {}", key, source);
    Ok(entries)
}

/// Launch parameters for a stdio MCP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParams {
    /// Name used in logs and messages
    pub name: String,

    /// Executable to launch
    pub command: String,

    /// Command arguments
    pub args: Vec<String>,

    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl ServerParams {
    /// Parameters for a server defined in the configuration
    pub fn from_config(name: &str, config: &ServerConfig) -> Self {
        Self {
            name: name.to_string(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone().unwrap_or_default(),
        }
    }

    /// Parameters for a server script, launched with python or node
    pub fn from_script(path: &str) -> Result<Self> {
        let command = match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("py") => "python",
            Some("js") => "node",
            _ => {
                tracing::error!("Invalid server script extension: {}", path);
                return Err(ConfigError::InvalidScript {
                    path: path.to_string(),
                }
                .into());
            }
        };

        let name = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();

        Ok(Self {
            name,
            command: command.to_string(),
            args: vec![path.to_string()],
            env: HashMap::new(),
        })
    }
}

/// Gemini API constants
pub mod gemini {
    /// Base URL for the Gemini REST API
    pub const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

    /// Model used when nothing else is configured
    pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

    /// Turn budget for sessions without a workflow
    pub const DEFAULT_MAX_TURNS: u32 = 5;
}
