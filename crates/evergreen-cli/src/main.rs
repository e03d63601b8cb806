//! Evergreen MCP CLI - serves Evergreen CI data to AI assistants over MCP.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use evergreen_auth::{check_expiry, extract_identity, AuthManager, SharedAuthManager, TokenStore};
use evergreen_core::workspace::detect_project;
use evergreen_core::{Config, OAuthSettings};
use evergreen_graphql::{Credentials, EvergreenGraphQlClient};
use evergreen_mcp::{EvergreenContext, McpServer};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const USER_ENV: &str = "EVERGREEN_USER";
const API_KEY_ENV: &str = "EVERGREEN_API_KEY";
const PROJECT_ENV: &str = "EVERGREEN_PROJECT";
const WORKSPACE_ENV: &str = "WORKSPACE_PATH";

#[derive(Parser, Debug)]
#[command(name = "evergreen-mcp")]
#[command(author, version, about = "MCP server for the Evergreen CI platform", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Start the MCP server on stdin/stdout (default)
    Serve {
        /// Default Evergreen project identifier
        #[arg(long)]
        project_id: Option<String>,

        /// Workspace directory used for project auto-detection
        #[arg(long)]
        workspace_dir: Option<PathBuf>,
    },

    /// Authenticate with the identity provider and store the tokens
    Login,

    /// Show the stored session
    Status,

    /// Remove the stored tokens
    Logout,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print a value (e.g. oauth.issuer)
    Get { key: String },

    /// Set a value (e.g. oauth.client_id my-client)
    Set { key: String, value: String },

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });

    let command = cli.command.unwrap_or(Commands::Serve {
        project_id: None,
        workspace_dir: None,
    });

    match command {
        Commands::Serve {
            project_id,
            workspace_dir,
        } => {
            let config = Config::load_from(&config_path)?;
            serve(config, project_id, workspace_dir, cancel).await
        }
        Commands::Login => {
            let config = Config::load_from(&config_path)?;
            let auth = authenticate(&config, cancel).await?;
            let manager = auth.lock().await;
            println!("Logged in as {}", manager.user_id().unwrap_or("unknown"));
            Ok(())
        }
        Commands::Status => {
            let config = Config::load_from(&config_path)?;
            status(&token_store(config.oauth_settings()?)?)
        }
        Commands::Logout => {
            let config = Config::load_from(&config_path)?;
            logout(&token_store(config.oauth_settings()?)?)
        }
        Commands::Config { command } => run_config(command, &config_path),
    }
}

/// Logs go to stderr; stdout carries MCP frames.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `EVERGREEN_USER` and `EVERGREEN_API_KEY` together select API-key auth.
fn api_key_credentials(user: Option<String>, api_key: Option<String>) -> Option<Credentials> {
    match (user, api_key) {
        (Some(user), Some(api_key)) if !user.is_empty() && !api_key.is_empty() => {
            Some(Credentials::ApiKey { user, api_key })
        }
        _ => None,
    }
}

/// A project mapped to the workspace wins over the explicit fallback.
fn resolve_default_project(
    projects_for_directory: &BTreeMap<String, String>,
    workspace_dir: Option<&Path>,
    fallback: Option<String>,
) -> Option<String> {
    let detected = workspace_dir.and_then(|dir| detect_project(projects_for_directory, dir));
    if let Some(project) = detected {
        tracing::info!(project = %project, "Auto-detected project from workspace");
        return Some(project);
    }
    let fallback = fallback.filter(|p| !p.is_empty());
    if let Some(project) = &fallback {
        tracing::info!(project = %project, "Using configured project");
    }
    fallback
}

async fn authenticate(config: &Config, cancel: CancellationToken) -> anyhow::Result<SharedAuthManager> {
    let settings = config.oauth_settings()?;
    tracing::info!(issuer = %settings.issuer, "Using OIDC authentication");

    let mut manager = AuthManager::new(settings).with_cancellation(cancel);
    manager
        .ensure_authenticated()
        .await
        .context("OIDC authentication failed")?;
    tracing::info!(user = manager.user_id().unwrap_or("unknown"), "Authenticated");

    Ok(SharedAuthManager::new(manager))
}

async fn serve(
    config: Config,
    project_id: Option<String>,
    workspace_dir: Option<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let workspace_dir = workspace_dir
        .or_else(|| std::env::var_os(WORKSPACE_ENV).map(PathBuf::from))
        .or_else(|| std::env::current_dir().ok());

    let api_key = api_key_credentials(
        std::env::var(USER_ENV).ok(),
        std::env::var(API_KEY_ENV).ok(),
    );

    let (client, user_id) = match api_key {
        Some(credentials) => {
            tracing::info!("Using API key authentication");
            let user = match &credentials {
                Credentials::ApiKey { user, .. } => user.clone(),
                Credentials::Bearer(_) => String::new(),
            };
            let client =
                EvergreenGraphQlClient::connected(config.graphql_endpoint(false), credentials)
                    .await?;
            (client, user)
        }
        None => {
            let auth = authenticate(&config, cancel.clone()).await?;
            let (token, user) = {
                let manager = auth.lock().await;
                let token = manager
                    .access_token()
                    .ok_or_else(|| anyhow!("No access token after authentication"))?
                    .to_string();
                (token, manager.user_id().unwrap_or_default().to_string())
            };
            let client = EvergreenGraphQlClient::new(
                config.graphql_endpoint(true),
                Credentials::Bearer(token),
            )
            .with_refresher(Arc::new(auth));
            client.connect().await?;
            (client, user)
        }
    };
    let client = Arc::new(client);
    tracing::info!(endpoint = %client.endpoint(), "Evergreen GraphQL client initialized");

    let fallback = project_id.or_else(|| std::env::var(PROJECT_ENV).ok());
    let default_project = resolve_default_project(
        &config.projects_for_directory,
        workspace_dir.as_deref(),
        fallback,
    );
    if default_project.is_none() {
        tracing::info!("No default project configured");
    }

    let context = EvergreenContext::new(client.clone(), user_id)
        .with_default_project(default_project)
        .with_workspace(workspace_dir, config.projects_for_directory.clone());
    let mut server = McpServer::new(context);

    let result = tokio::select! {
        result = server.run() => result.map_err(anyhow::Error::from),
        _ = cancel.cancelled() => Ok(()),
    };

    client.close().await;
    tracing::info!("Evergreen GraphQL client closed");
    result
}

fn token_store(settings: OAuthSettings) -> anyhow::Result<TokenStore> {
    if settings.token_file.is_none() {
        return Err(anyhow!(
            "No token file configured. Set oauth.token_file_path or {}",
            evergreen_core::config::TOKEN_FILE_ENV
        ));
    }
    Ok(TokenStore::new(settings.token_file))
}

fn status(store: &TokenStore) -> anyhow::Result<()> {
    let path = store.path().map(|p| p.display().to_string()).unwrap_or_default();

    let Some(record) = store.load() else {
        println!("Not logged in (no token file at {})", path);
        return Ok(());
    };

    let expiry = check_expiry(&record.access_token);
    let user = extract_identity(&record.access_token).unwrap_or_else(|_| "unknown".to_string());
    println!("Token file:     {}", path);
    println!("User:           {}", user);
    if expiry.is_valid {
        println!("Access token:   valid ({}s remaining)", expiry.seconds_remaining);
    } else {
        println!("Access token:   expired");
    }
    println!(
        "Refresh token:  {}",
        if record.refresh_token.is_some() { "present" } else { "absent" }
    );
    Ok(())
}

fn logout(store: &TokenStore) -> anyhow::Result<()> {
    store.clear().context("Failed to remove token file")?;
    println!("Logged out");
    Ok(())
}

fn run_config(command: ConfigCommands, path: &Path) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = Config::load_from(path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Get { key } => {
            let config = Config::load_from(path)?;
            match config.get(&key)? {
                Some(value) => println!("{}", value),
                None => println!("{} is not set", key),
            }
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load_from(path)?;
            config.set(&key, &value)?;
            config.save_to(path)?;
            println!("Set {}", key);
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}
