//! Pluto CLI - command-line client for the Pluto AI gateway
//!
//! Signs in against the gateway's identity service and keeps the session on
//! disk between invocations, the way the dashboard keeps it in the browser.

use anyhow::{bail, Context};
use chrono::{Duration, Local};
use clap::{Parser, Subcommand};
use pluto_core::{
    config_error, init_logging, log_operation_error, log_operation_start, log_operation_success,
    LoggingConfig, PlutoConfig, PlutoResult,
};
use pluto_session::{SessionManager, SessionState, UserRecord};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pluto")]
#[command(about = "Sign in to the Pluto AI gateway and manage your session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account and sign in
    Register {
        email: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        /// Organization to create alongside the account
        #[arg(long)]
        organization: Option<String>,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Verify the session with the server and show the current user
    Whoami,

    /// Show quota usage for the current user
    Quota,

    /// Exchange the current token for a fresh one
    Refresh {
        /// Only refresh when the token expires within this many seconds
        #[arg(long)]
        if_expiring_within: Option<i64>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the locally stored session without contacting the server
    Status,

    /// Request a password reset email, or confirm one with --token
    ResetPassword {
        /// Account email (for requesting a reset)
        email: Option<String>,

        /// Reset token from the email
        #[arg(long)]
        token: Option<String>,

        /// New password (prompted when omitted)
        #[arg(long, requires = "token")]
        new_password: Option<String>,
    },

    /// Configuration management
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&LoggingConfig::cli(cli.verbose))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Pluto CLI v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config.as_ref())?;
    config.apply_env_overrides();

    if let Commands::Config {
        show,
        init,
        validate,
    } = cli.command
    {
        return handle_config(&config, show, init, validate);
    }

    config.validate()?;
    let session = SessionManager::from_config(&config).inspect_err(|e| e.log())?;

    match cli.command {
        Commands::Login { email, password } => {
            let password = read_password(password, "Password", false)?;
            handle_login(&session, &email, &password, cli.json).await
        }
        Commands::Register {
            email,
            first_name,
            last_name,
            organization,
            password,
        } => {
            let password = read_password(password, "Password", true)?;
            log_operation_start!("register", email = %email);
            let user = session
                .register(
                    &email,
                    &password,
                    &first_name,
                    &last_name,
                    organization.as_deref(),
                )
                .await?;
            log_operation_success!("register", user_id = %user.id);
            print_user(&user, cli.json)
        }
        Commands::Whoami => handle_whoami(&session, cli.json).await,
        Commands::Quota => handle_quota(&session, cli.json).await,
        Commands::Refresh { if_expiring_within } => {
            handle_refresh(&session, if_expiring_within).await
        }
        Commands::Logout => {
            session.logout();
            println!("Signed out");
            Ok(())
        }
        Commands::Status => handle_status(&session, cli.json),
        Commands::ResetPassword {
            email,
            token,
            new_password,
        } => handle_reset_password(&session, email, token, new_password).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn load_config(config_path: Option<&PathBuf>) -> anyhow::Result<PlutoConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
        return Ok(PlutoConfig::from_file(path)?);
    }

    // Try to load from default locations
    let default_paths = [
        dirs::config_dir().map(|d| d.join("pluto").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".pluto").join("config.toml")),
        Some(PathBuf::from("pluto.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            info!("Loading configuration from {:?}", path);
            return Ok(PlutoConfig::from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(PlutoConfig::default())
}

fn default_config_path() -> PlutoResult<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("pluto").join("config.toml"))
        .ok_or_else(|| config_error!("Could not determine a configuration directory", "cli"))
}

fn read_password(given: Option<String>, prompt: &str, confirm: bool) -> anyhow::Result<String> {
    if let Some(password) = given {
        return Ok(password);
    }

    let mut input = dialoguer::Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Repeat password", "Passwords do not match");
    }
    Ok(input.interact()?)
}

async fn handle_login(
    session: &SessionManager,
    email: &str,
    password: &str,
    json: bool,
) -> anyhow::Result<()> {
    log_operation_start!("login", email = %email);

    match session.login(email, password).await {
        Ok(user) => {
            log_operation_success!("login", user_id = %user.id);
            if !json {
                println!("Signed in as {}", user.display_name());
            }
            print_user(&user, json)
        }
        Err(e) => {
            log_operation_error!("login", e);
            Err(e.into())
        }
    }
}

async fn handle_whoami(session: &SessionManager, json: bool) -> anyhow::Result<()> {
    if session.state() == SessionState::Unauthenticated {
        bail!("Not signed in. Run `pluto login <email>` first");
    }

    match session.fetch_current_user().await {
        Some(user) => print_user(&user, json),
        None if session.is_authenticated() => {
            bail!("Could not reach the identity service; session kept")
        }
        None => bail!("Session is no longer valid. Please sign in again"),
    }
}

async fn handle_quota(session: &SessionManager, json: bool) -> anyhow::Result<()> {
    if session.state() == SessionState::Unauthenticated {
        bail!("Not signed in. Run `pluto login <email>` first");
    }

    let quota = session
        .get_quota_info()
        .await
        .context("Quota information is unavailable")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&quota)?);
    } else {
        println!(
            "Used {} of {} requests ({:.1}%), {} remaining",
            quota.quota_used, quota.quota_limit, quota.usage_percentage, quota.quota_remaining
        );
    }
    Ok(())
}

async fn handle_refresh(
    session: &SessionManager,
    if_expiring_within: Option<i64>,
) -> anyhow::Result<()> {
    let refreshed = match if_expiring_within {
        Some(seconds) => {
            let window = Duration::try_seconds(seconds)
                .filter(|window| *window >= Duration::zero())
                .with_context(|| format!("--if-expiring-within {} is out of range", seconds))?;
            session.refresh_if_expiring(window).await
        }
        None => session.refresh().await,
    };

    if !refreshed {
        bail!("Session could not be refreshed. Please sign in again");
    }

    match session.token_expires_at() {
        Some(expires_at) => println!(
            "Session valid until {}",
            expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Session valid"),
    }
    Ok(())
}

fn handle_status(session: &SessionManager, json: bool) -> anyhow::Result<()> {
    let state = session.state();
    let user = session.current_user();

    if json {
        let status = serde_json::json!({
            "state": state.to_string(),
            "authenticated": session.is_authenticated(),
            "user": user,
            "token_expires_at": session.token_expires_at(),
            "invalidation_policy": session.policy_name(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("State: {}", state);
    if let Some(user) = user {
        println!("User:  {} <{}> ({})", user.display_name(), user.email, user.role);
    }
    Ok(())
}

async fn handle_reset_password(
    session: &SessionManager,
    email: Option<String>,
    token: Option<String>,
    new_password: Option<String>,
) -> anyhow::Result<()> {
    let message = match (token, email) {
        (Some(token), _) => {
            let new_password = read_password(new_password, "New password", true)?;
            session.confirm_password_reset(&token, &new_password).await?
        }
        (None, Some(email)) => session.request_password_reset(&email).await?,
        (None, None) => bail!("Provide an email to request a reset, or --token to confirm one"),
    };

    println!("{}", message);
    Ok(())
}

fn handle_config(
    config: &PlutoConfig,
    show: bool,
    init: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        let config_path = default_config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        PlutoConfig::default().save_to_file(&config_path)?;
        println!("Configuration initialized at: {:?}", config_path);
    }

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                e.log();
                println!("Configuration validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn print_user(user: &UserRecord, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
        return Ok(());
    }

    println!("{} <{}>", user.display_name(), user.email);
    println!("  id:    {}", user.id);
    println!("  role:  {}", user.role);
    if let Some(organization_id) = &user.organization_id {
        println!("  org:   {}", organization_id);
    }
    println!("  quota: {}/{}", user.quota_used, user.quota_limit);
    Ok(())
}
