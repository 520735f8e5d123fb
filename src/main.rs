//! MCP Gemini Client
//!
//! Connects to one MCP server over stdio and lets a Gemini model use its
//! tools, either for a single query or in an interactive chat.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use mcp_gemini_client::config::{search_locations_hint, Config, ConfigOptions, ServerParams};
use mcp_gemini_client::engine::{Engine, SessionSettings};
use mcp_gemini_client::error::{ClientError, ConfigError, Result};
use mcp_gemini_client::llm::GeminiClient;
use mcp_gemini_client::logging::{self, LogLevel, LOG_FILE};
use mcp_gemini_client::mcp::McpClient;
use mcp_gemini_client::repl;

/// MCP Gemini Client
#[derive(Parser, Debug)]
#[command(name = "mcp-client")]
#[command(author, version, about = "MCP client that lets a Gemini model use the tools of an MCP server")]
struct Cli {
    /// Workflow to run (defined in workflows.json)
    workflow: Option<String>,

    /// Connect to a configured MCP server without a workflow
    #[arg(long, value_name = "NAME")]
    server: Option<String>,

    /// Launch a server script (.py or .js) without a workflow
    #[arg(long, value_name = "PATH")]
    script: Option<String>,

    /// Run a single query and exit
    #[arg(short, long)]
    query: Option<String>,

    /// Gemini model, overriding the workflow and environment
    #[arg(long)]
    model: Option<String>,

    /// Path to the MCP server definitions
    #[arg(long, value_name = "PATH")]
    mcp_config: Option<PathBuf>,

    /// Path to the workflow definitions
    #[arg(long, value_name = "PATH")]
    workflows_config: Option<PathBuf>,

    /// List available workflows and exit
    #[arg(short = 'l', long)]
    list_workflows: bool,

    /// Console logging verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::User)]
    log_level: LogLevel,

    /// Disable logging to app_client.log
    #[arg(long)]
    no_log_file: bool,
}

/// What the session connects to
enum Target {
    Workflow(String),
    Server(String),
    Script(String),
}

impl Cli {
    /// Exactly one of workflow, server or script
    fn target(&self) -> Option<Target> {
        match (&self.workflow, &self.server, &self.script) {
            (Some(name), None, None) => Some(Target::Workflow(name.clone())),
            (None, Some(name), None) => Some(Target::Server(name.clone())),
            (None, None, Some(path)) => Some(Target::Script(path.clone())),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file).then(|| PathBuf::from(LOG_FILE));
    logging::init(cli.log_level, log_file.as_deref());
    tracing::info!("CLI started with arguments: {:?}", cli);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    };
    tracing::info!("CLI finished");
    code
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // Load configuration
    let config = Config::load(&ConfigOptions {
        mcp_config_path: cli.mcp_config.clone(),
        workflows_config_path: cli.workflows_config.clone(),
    })?;

    if cli.list_workflows {
        print_workflows(&config);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(target) = cli.target() else {
        tracing::error!("Expected exactly one of WORKFLOW, --server or --script");
        // Help output is best effort
        let _ = Cli::command().print_help();
        eprintln!("\nError: exactly one of WORKFLOW, --server or --script is required unless --list-workflows is used.");
        let workflows = config.list_workflows();
        if !workflows.is_empty() {
            eprintln!("Available workflows: {}", workflows.join(", "));
        }
        return Ok(ExitCode::FAILURE);
    };

    let (settings, params, model) = resolve_session(&config, target, cli.model.as_deref())?;
    tracing::info!("Selected session: '{}'", settings.name);

    let llm = GeminiClient::new(config.api_key.clone(), model)?;
    let mcp = McpClient::connect(&params).await?;
    let mut engine = Engine::new(settings, llm, mcp);

    let outcome = match &cli.query {
        Some(query) => {
            tracing::info!(
                "Processing single query for '{}': '{}'",
                engine.settings().name,
                mcp_gemini_client::engine::snippet(query, 70)
            );
            let answer = engine.process_query(query).await;
            println!("{}", answer);
            Ok(())
        }
        None => repl::run_stdio(&mut engine).await,
    };

    engine.close().await;
    outcome.map(|_| ExitCode::SUCCESS)
}

/// Session settings, server launch parameters and model for a target
fn resolve_session(
    config: &Config,
    target: Target,
    model_override: Option<&str>,
) -> Result<(SessionSettings, ServerParams, String)> {
    let pick_model = |configured: &str| model_override.unwrap_or(configured).to_string();

    match target {
        Target::Workflow(name) => {
            let workflow = config.workflow(&name)?;
            let server_name = workflow.server().ok_or_else(|| ConfigError::InvalidConfig {
                message: format!("Workflow '{}' does not name an MCP server", name),
            })?;
            let params = ServerParams::from_config(server_name, config.server(server_name)?);
            let model = pick_model(&workflow.llm_model);
            Ok((SessionSettings::from_workflow(name, workflow), params, model))
        }
        Target::Server(name) => {
            let params = ServerParams::from_config(&name, config.server(&name)?);
            Ok((SessionSettings::direct(name), params, pick_model(&config.default_model)))
        }
        Target::Script(path) => {
            let params = ServerParams::from_script(&path)?;
            Ok((
                SessionSettings::direct(params.name.clone()),
                params,
                pick_model(&config.default_model),
            ))
        }
    }
}

fn print_workflows(config: &Config) {
    println!("\nAvailable workflows:");
    if config.workflows.is_empty() {
        println!("  No workflows defined.");
    }
    for (name, workflow) in &config.workflows {
        println!(
            "  - {}: {}",
            name,
            workflow.description.as_deref().unwrap_or("No description")
        );
    }

    let servers = config.list_servers();
    if !servers.is_empty() {
        println!("\nConfigured MCP servers: {}", servers.join(", "));
    }
}

fn report(error: &ClientError) {
    tracing::error!("{}", error);
    eprintln!("ERROR: {}", error);
    if let ClientError::Config(e) = error {
        if e.is_not_found() {
            eprintln!(
                "Please ensure mcp_servers.json and workflows.json exist in {}",
                search_locations_hint()
            );
        }
    }
}
