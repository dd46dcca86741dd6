//! edu-portal - command-line client for the education portal API
//!
//! Signs in against the portal backend, keeps the session refreshed, and
//! drives the account flows (signup confirmation, password reset).

mod api;
mod auth;
mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{ApiError, AuthApi, ErrorClass, HttpClient, ReqwestTransport, SignupForm};
use auth::{flows, Persistence, SessionContext, SessionEvent, TokenStore};
use config::Config;

#[derive(Parser)]
#[command(name = "edu-portal")]
#[command(about = "Command-line client for the education portal API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        email: String,

        /// Password (prompted on stdin when omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Keep the session for this run only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Log out and clear cached credentials
    Logout {
        /// Keep the cached user profile
        #[arg(long)]
        keep_profile: bool,
    },

    /// Refresh the access token now
    Refresh,

    /// Show current session status
    Status,

    /// Show the signed-in user's cached profile
    Whoami,

    /// Create an account
    Signup {
        email: String,

        #[arg(short, long)]
        password: Option<String>,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(long)]
        phone: Option<String>,
    },

    /// Confirm an account with the emailed verification code
    Confirm { email: String, code: String },

    /// Send a new verification code
    ResendCode { email: String },

    /// Request a password reset code
    ForgotPassword { email: String },

    /// Set a new password with a reset code
    ResetPassword {
        email: String,
        code: String,

        #[arg(short, long)]
        new_password: Option<String>,
    },

    /// Change the password of the signed-in account
    ChangePassword {
        #[arg(long)]
        old_password: Option<String>,

        #[arg(long)]
        new_password: Option<String>,
    },

    /// Show or update the stored configuration
    Config {
        /// Backend base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Seconds a request waits for another request's token refresh
        #[arg(long)]
        refresh_wait_secs: Option<u64>,
    },

    /// Send an authenticated request and print the JSON reply
    Request {
        /// HTTP method (GET, POST, ...)
        method: String,

        /// Path relative to the API base URL, e.g. /api/leads?page=2
        path: String,

        /// Extra header, e.g. "Accept-Language: fr" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },
}

/// Everything a command needs, built once per run.
struct Portal {
    config: Config,
    session: Arc<SessionContext>,
    client: Arc<HttpClient>,
    api: AuthApi,
}

impl Portal {
    fn open() -> Result<Self> {
        let config = Config::load()?;
        let store = TokenStore::open(Config::session_path()?)?;
        let session = Arc::new(SessionContext::new(store));

        let base_url = config.base_url();
        tracing::debug!("API base URL: {}", base_url);
        let transport = Arc::new(ReqwestTransport::new(&base_url, config.request_timeout())?);
        let client = Arc::new(HttpClient::new(
            transport,
            session.clone(),
            config.refresh_wait(),
        ));
        let api = AuthApi::new(client.clone());

        Ok(Self {
            config,
            session,
            client,
            api,
        })
    }
}

fn configure(base_url: Option<String>, refresh_wait_secs: Option<u64>) -> Result<()> {
    let mut config = Config::load()?;
    if base_url.is_some() || refresh_wait_secs.is_some() {
        if base_url.is_some() {
            config.base_url = base_url;
        }
        if refresh_wait_secs.is_some() {
            config.refresh_wait_secs = refresh_wait_secs;
        }
        config.save()?;
        println!("Configuration saved.");
    }
    println!("Base URL:     {}", config.base_url());
    println!("Refresh wait: {}s", config.refresh_wait().as_secs());
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    if let Commands::Config {
        base_url,
        refresh_wait_secs,
    } = command
    {
        return configure(base_url, refresh_wait_secs);
    }

    let portal = Portal::open()?;
    let mut events = portal.session.subscribe();

    let outcome = dispatch(&portal, command).await;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::Refreshed {
            tracing::info!("Access token was refreshed during this command");
        }
    }
    outcome
}

async fn dispatch(portal: &Portal, command: Commands) -> Result<()> {
    match command {
        Commands::Login {
            email,
            password,
            ephemeral,
        } => {
            tracing::info!("Logging in...");
            let persistence =
                Persistence::from_durable(!ephemeral && portal.config.remember_by_default());
            flows::login(&portal.api, &email, password, persistence).await?;
        }
        Commands::Logout { keep_profile } => {
            tracing::info!("Logging out...");
            flows::logout(&portal.api, keep_profile)?;
        }
        Commands::Refresh => {
            flows::refresh(&portal.api, &portal.session).await?;
        }
        Commands::Status => {
            flows::status(&portal.session)?;
        }
        Commands::Whoami => {
            flows::whoami(&portal.session)?;
        }
        Commands::Signup {
            email,
            password,
            first_name,
            last_name,
            phone,
        } => {
            let form = SignupForm {
                email,
                password: String::new(),
                first_name,
                last_name,
                phone,
            };
            flows::signup(&portal.api, form, password).await?;
        }
        Commands::Confirm { email, code } => {
            flows::confirm(&portal.api, &email, &code).await?;
        }
        Commands::ResendCode { email } => {
            flows::resend_code(&portal.api, &email).await?;
        }
        Commands::ForgotPassword { email } => {
            flows::forgot_password(&portal.api, &email).await?;
        }
        Commands::ResetPassword {
            email,
            code,
            new_password,
        } => {
            flows::reset_password(&portal.api, &email, &code, new_password).await?;
        }
        Commands::ChangePassword {
            old_password,
            new_password,
        } => {
            flows::change_password(&portal.api, old_password, new_password).await?;
        }
        Commands::Request {
            method,
            path,
            headers,
            body,
        } => {
            flows::request(&portal.client, &method, &path, &headers, body.as_deref()).await?;
        }
        Commands::Config { .. } => unreachable!("handled before opening the session"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let result = run(cli.command).await;
    if let Err(ref e) = result {
        let terminal = e
            .downcast_ref::<ApiError>()
            .map(|api_err| api_err.class() == ErrorClass::SessionTerminal)
            .unwrap_or(false);
        if terminal {
            eprintln!("Your session has ended. Run 'edu-portal login' to sign in again.");
        }
    }
    result
}
