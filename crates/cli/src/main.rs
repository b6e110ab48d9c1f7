//! Tuni CLI - explore Tunis from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Create an account and sign in
//! tuni signup -e a@b.com -p pw123456 -u alice
//! tuni login -e a@b.com -p pw123456
//!
//! # Where am I, and what is close by?
//! tuni location allow
//! tuni nearby --limit 5
//!
//! # Rate and comment
//! tuni rate sidi-bou-said 5
//! tuni comment sidi-bou-said "Best sunset in Tunis"
//! ```
//!
//! # Environment Variables
//!
//! - `TUNI_BACKEND_URL` - Hosted backend project URL
//! - `TUNI_BACKEND_ANON_KEY` - Backend anon API key
//! - `TUNI_DATA_DIR` - Local storage directory (default `.tuni`)
//! - `SENTRY_DSN` - Optional error tracking
//! - `TUNI_LOG_FORMAT` - `json` for structured logs
//! - `RUST_LOG` - Log filter (default `tuni_guide=info,tuni_cli=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tuni_guide::{GuideConfig, GuideState};

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "tuni")]
#[command(author, version, about = "Tuni travel guide")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long)]
        username: String,
    },
    /// Sign in
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Sign out
    Logout,
    /// Email a password reset link
    ResetPassword {
        #[arg(short, long)]
        email: String,
    },
    /// Change the signed-in user's password
    UpdatePassword {
        #[arg(short, long)]
        password: String,
    },
    /// Show the signed-in user
    Whoami,
    /// Show or change the current location
    Location {
        #[command(subcommand)]
        action: Option<LocationAction>,
    },
    /// Places closest to the current location
    Nearby {
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Search places by name, description or category
    Search {
        #[arg(default_value = "")]
        query: String,
        /// Only this category (destination, hotel, food, shopping, transport)
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Open a page, e.g. `/hotels` or `/destination/carthage`
    Open { path: String },
    /// Toggle a favorite
    Favorite { id: String },
    /// List favorites
    Favorites,
    /// Rate a place from 1 to 5
    Rate { id: String, rating: i64 },
    /// Comment on a place
    Comment { id: String, text: String },
    /// Delete one of your comments
    Uncomment { comment_id: String },
    /// Show comments on a place
    Comments { id: String },
    /// Show or edit the profile
    Profile {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },
}

#[derive(Subcommand)]
pub enum LocationAction {
    /// Refresh using the cache and recorded permission
    Refresh,
    /// Allow location access and take a fresh reading
    Allow,
    /// Skip location access and use the default location
    Skip,
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Show the profile
    Show,
    /// Update profile fields
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<i32>,
        #[arg(long)]
        occupation: Option<String>,
        #[arg(long)]
        nationality: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
    /// Print profile changes as they happen
    Watch,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &GuideConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tuni_guide=info,tuni_cli=info".into());

    // Logs go to stderr so command output stays clean; JSON for log shippers
    let json = std::env::var("TUNI_LOG_FORMAT").is_ok_and(|format| format == "json");
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

/// Exit code for a configuration error.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match GuideConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "Configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Flushes queued events when dropped at the end of main
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let mut out = std::io::stdout().lock();
    let result = run(cli, &config, &mut out).await;
    ExitCode::from(finish(result, &mut out))
}

/// Report a failed command and pick the exit code.
fn finish(result: Result<(), CommandError>, out: &mut impl Write) -> u8 {
    match result {
        Ok(()) => 0,
        Err(CommandError::Guide(err)) => {
            err.report();
            let _ = writeln!(out, "{}", err.user_message());
            1
        }
        Err(CommandError::Output(err)) => {
            tracing::error!(error = %err, "Output failed");
            1
        }
    }
}

async fn run(cli: Cli, config: &GuideConfig, out: &mut impl Write) -> Result<(), CommandError> {
    let state = GuideState::from_config(config).await?;

    match cli.command {
        Commands::Signup {
            email,
            password,
            username,
        } => commands::account::signup(&state, out, &email, &password, &username).await,
        Commands::Login { email, password } => {
            commands::account::login(&state, out, &email, &password).await
        }
        Commands::Logout => commands::account::logout(&state, out).await,
        Commands::ResetPassword { email } => {
            commands::account::reset_password(&state, out, &email).await
        }
        Commands::UpdatePassword { password } => {
            commands::account::update_password(&state, out, &password).await
        }
        Commands::Whoami => commands::account::whoami(&state, out),
        Commands::Location { action } => {
            commands::explore::location(&state, out, action.unwrap_or(LocationAction::Refresh))
                .await
        }
        Commands::Nearby { limit } => commands::explore::nearby(&state, out, limit).await,
        Commands::Search { query, category } => {
            commands::explore::search(out, &query, category.as_deref())
        }
        Commands::Open { path } => commands::explore::open(&state, out, &path).await,
        Commands::Favorite { id } => commands::social::favorite(&state, out, &id).await,
        Commands::Favorites => commands::social::favorites(&state, out).await,
        Commands::Rate { id, rating } => commands::social::rate(&state, out, &id, rating).await,
        Commands::Comment { id, text } => {
            commands::social::comment(&state, out, &id, &text).await
        }
        Commands::Uncomment { comment_id } => {
            commands::social::uncomment(&state, out, &comment_id).await
        }
        Commands::Comments { id } => commands::social::comments(&state, out, &id).await,
        Commands::Profile { action } => match action.unwrap_or(ProfileAction::Show) {
            ProfileAction::Show => commands::profile::show(&state, out).await,
            ProfileAction::Update {
                name,
                age,
                occupation,
                nationality,
                bio,
            } => {
                let update = tuni_guide::backend::ProfileUpdate {
                    name,
                    age,
                    occupation,
                    nationality,
                    bio,
                    ..Default::default()
                };
                commands::profile::update(&state, out, update).await
            }
            ProfileAction::Watch => commands::profile::watch(&state, out).await,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tuni_guide::GuideError;
    use tuni_guide::error::PersistenceError;

    #[test]
    fn test_finish_success() {
        let mut out = Vec::new();
        assert_eq!(finish(Ok(()), &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_finish_prints_user_message() {
        let mut out = Vec::new();
        let err = CommandError::Guide(GuideError::Persistence(PersistenceError::NotSignedIn));

        assert_eq!(finish(Err(err), &mut out), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "Please sign in to continue\n");
    }

    #[test]
    fn test_finish_output_failure() {
        let mut out = Vec::new();
        let err = CommandError::Output(std::io::Error::other("closed pipe"));

        assert_eq!(finish(Err(err), &mut out), 1);
        assert!(out.is_empty());
    }
}
