use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use oidc_session::config::{self, ClientConfig, RecoveryMode};
use oidc_session::{CallbackContext, CallbackOutcome, OidcClient, TabStorage};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Drives the sign-in flow from a terminal, acting as the browser tab.
#[derive(Parser, Debug)]
#[command(name = "oidc-session")]
#[command(about = "OpenID Connect authorization code client with a backend-mediated exchange")]
struct Args {
    /// How the callback is turned into a session
    #[arg(long, value_enum, env = "OIDC_RECOVERY_MODE", default_value = "code-exchange")]
    mode: RecoveryMode,

    /// Provider authorization endpoint
    #[arg(long, env = "OIDC_AUTHORIZATION_ENDPOINT", default_value = config::DEFAULT_AUTHORIZATION_ENDPOINT)]
    authorization_endpoint: String,

    /// OAuth client ID registered with the provider
    #[arg(long, env = "OIDC_CLIENT_ID", default_value = config::DEFAULT_CLIENT_ID)]
    client_id: String,

    /// Redirect URI registered with the provider
    #[arg(long, env = "OIDC_REDIRECT_URI", default_value = config::DEFAULT_REDIRECT_URI)]
    redirect_uri: String,

    /// Requested scopes, space or comma separated
    #[arg(long, env = "OIDC_SCOPE", default_value = config::DEFAULT_SCOPE)]
    scope: String,

    /// Backend API root
    #[arg(long, env = "BACKEND_URL", default_value = config::DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// App entry point (where logout and failed sign-ins land)
    #[arg(long, env = "APP_URL", default_value = config::DEFAULT_APP_URL)]
    app_url: String,

    /// Page to show after a successful sign-in, relative to the app URL
    #[arg(long, env = "APP_DASHBOARD_PATH", default_value = config::DEFAULT_DASHBOARD_PATH)]
    dashboard_path: String,

    /// Where the tab's session storage, local storage and cookies are kept
    #[arg(long, env = "OIDC_STATE_DIR", default_value = ".oidc-session")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the URL to open in a browser to sign in
    Authorize,
    /// Finish sign-in from the URL the browser was redirected to
    Callback {
        /// Full callback URL, including query string or fragment
        url: String,
    },
    /// Show whether there is a signed-in session
    Status,
    /// Fetch the current user from the backend
    User,
    /// GET a protected backend resource, e.g. /resources/data
    Get { path: String },
    /// End the session
    Logout,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            authorization_endpoint: self.authorization_endpoint.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: config::parse_scopes(&self.scope),
            backend_url: self.backend_url.clone(),
            app_url: self.app_url.clone(),
            dashboard_path: self.dashboard_path.clone(),
            mode: self.mode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so stdout stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oidc_session=info,security=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let storage = TabStorage::on_disk(&args.state_dir).with_context(|| {
        format!("failed to open state directory {}", args.state_dir.display())
    })?;
    let client = OidcClient::new(&args.client_config(), storage)?;

    tracing::debug!("Using {:?} mode, state in {}", client.mode(), args.state_dir.display());

    match &args.command {
        Command::Authorize => {
            let url = client.authorization_url()?;
            println!("{}", url);
        }
        Command::Callback { url } => {
            let mut ctx = CallbackContext::parse(url).context("callback URL is not a valid URL")?;
            match client.handle_callback(&mut ctx).await {
                CallbackOutcome::SignedIn {
                    redirect_to,
                    display_name,
                } => {
                    match display_name {
                        Some(name) => println!("Signed in as {}", name),
                        None => println!("Signed in"),
                    }
                    println!("Continue at {}", redirect_to);
                }
                CallbackOutcome::Failed {
                    message, retry_url, ..
                } => {
                    eprintln!("{}", message);
                    eprintln!("Start over at {}", retry_url);
                    return Err(anyhow!("sign-in failed"));
                }
            }
        }
        Command::Status => {
            if client.is_authenticated() {
                match client.display_name() {
                    Some(name) => println!("authenticated as {}", name),
                    None => println!("authenticated"),
                }
            } else {
                println!("not authenticated");
            }
        }
        Command::User => match client.user_info().await {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => return Err(anyhow!("no user info available")),
        },
        Command::Get { path } => {
            let path = if path.starts_with('/') {
                path.clone()
            } else {
                format!("/{}", path)
            };
            match client.fetch_protected::<serde_json::Value>(&path).await {
                Ok(Some(body)) => println!("{}", serde_json::to_string_pretty(&body)?),
                Ok(None) => {
                    eprintln!("Session is no longer valid, sign in again:");
                    eprintln!("{}", client.session().entry_url());
                    return Err(anyhow!("unauthorized"));
                }
                Err(e) => return Err(anyhow!("{}", e.user_message())),
            }
        }
        Command::Logout => {
            let next = client.logout().await;
            println!("Logged out, continue at {}", next);
        }
    }

    Ok(())
}
