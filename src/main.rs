use clap::{Parser, Subcommand};
use esh::cipher::{EnvelopeCipher, ENCRYPTION_KEY_ENV};
use esh::{jobs, settings, storage, web};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "esh-server",
    version,
    about = "Device login server for the esh CLI"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create a user who can approve device logins
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long, env = "ESH_NEW_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Run a background job once and exit
    RunJob {
        /// `sweep_device_sessions`, `cleanup_expired_sessions` or `prune_security_events`
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Refuse to start without a usable key
            let cipher = EnvelopeCipher::from_env(ENCRYPTION_KEY_ENV)?;

            let db = storage::init(&settings.database).await?;
            let _scheduler = jobs::init_scheduler(db.clone()).await?;

            web::serve(web::AppState::new(settings, db, cipher)).await?;
        }
        Command::CreateUser { username, password } => {
            let db = storage::init(&settings.database).await?;
            if storage::get_user_by_username(&db, &username).await?.is_some() {
                miette::bail!("user `{}` already exists", username);
            }
            let user = storage::create_user(&db, &username, &password).await?;
            tracing::info!(subject = %user.subject, %username, "Created user");
        }
        Command::RunJob { name } => {
            let db = storage::init(&settings.database).await?;
            let count = jobs::trigger_job_manually(&db, &name).await?;
            tracing::info!(job = %name, records = count, "Job finished");
        }
    }

    Ok(())
}
