use clap::{Parser, Subcommand};
use vitrine_reqwest::{Session, SessionConfig};
use vitrine_tokens::{Email, Password};

#[derive(Debug, Parser)]
struct Opts {
    /// Root of the CMS API
    #[arg(short = 'u', long, env = "VITRINE_API_URL")]
    api_base_url: reqwest::Url,

    /// The local file used to keep the session between runs
    #[arg(
        short = 'f',
        long,
        env = "VITRINE_SESSION_FILE",
        value_name = "FILE",
        default_value = ".vitrine-session.json"
    )]
    session_file: std::path::PathBuf,

    /// Per-request timeout, in seconds
    #[arg(long, env = "VITRINE_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and keep the session
    Login {
        /// The account's email address
        #[arg(short, long, env = "VITRINE_EMAIL")]
        email: Email,

        /// The account's password
        #[arg(short, long, env = "VITRINE_PASSWORD", hide_env_values = true)]
        password: Password,
    },
    /// Show the signed-in user
    Whoami,
    /// Fetch a path below the API root using the session
    Get {
        /// Path relative to the API root, such as `playlists`
        path: String,
    },
    /// Sign out and forget the session
    Logout,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = SessionConfig::new(opts.api_base_url)
        .with_request_timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .with_session_file(opts.session_file);

    let session = Session::builder(config)
        .with_entry_point(|| tracing::warn!("session ended, run `login` again"))
        .build()?;

    match opts.command {
        Command::Login { email, password } => {
            session.login(&email, &password).await?;
            if let Some(user) = session.current_user() {
                tracing::info!(user.username = %user.username, user.role = %user.role, "signed in");
            }
        }
        Command::Whoami => match session.current_user() {
            Some(user) => {
                tracing::info!(
                    user.id = %user.id,
                    user.username = %user.username,
                    user.email = %user.email,
                    user.role = %user.role,
                    authenticated = session.is_authenticated(),
                    "current user"
                )
            }
            None => tracing::warn!("not signed in"),
        },
        Command::Get { path } => {
            let url = session.endpoints().base.join(&path)?;
            let resp = session.client().get(url).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            tracing::info!(response.status = status.as_u16(), "received response");
            println!("{body}");
        }
        Command::Logout => session.logout().await?,
    }

    Ok(())
}
