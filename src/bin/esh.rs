use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use esh::client::{self, CredentialStore, DeviceLoginClient, LoginOptions};
use miette::Result;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "esh", version, about = "esh command-line client")]
struct Cli {
    /// Credential profile to use
    #[arg(long, global = true, default_value = "default")]
    profile: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in through the browser and store an API token
    Login {
        /// Server base URL
        #[arg(long, env = "ESH_SERVER", default_value = "http://localhost:8080")]
        server: String,
        /// Label for the new token
        #[arg(long)]
        name: Option<String>,
        /// Print the approval link without opening a browser
        #[arg(long)]
        no_browser: bool,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 900)]
        timeout_secs: u64,
    },
    /// Forget the stored token for this profile
    Logout,
    /// Show the stored token for this profile
    Status,
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = CredentialStore::default_location()?;

    match cli.command {
        Command::Login {
            server,
            name,
            no_browser,
            timeout_secs,
        } => {
            let http = DeviceLoginClient::new(&server)?;
            let options = LoginOptions {
                profile: cli.profile.clone(),
                token_name: name,
                open_browser: !no_browser,
                max_wait: Duration::from_secs(timeout_secs),
                ..Default::default()
            };

            let credential = client::login(&http, &store, &options).await?;
            println!(
                "Logged in. Token \"{}\" saved to profile `{}` (expires {}).",
                credential.token_name,
                cli.profile,
                format_timestamp(credential.expires_at)
            );
        }
        Command::Logout => {
            if store.remove(&cli.profile).await? {
                println!("Removed credentials for profile `{}`.", cli.profile);
            } else {
                println!("No credentials stored for profile `{}`.", cli.profile);
            }
        }
        Command::Status => match store.get(&cli.profile).await? {
            Some(credential) => {
                println!("Profile:  {}", cli.profile);
                println!("Server:   {}", credential.server);
                println!("Token:    {} ({})", credential.token_name, credential.token_id);
                println!("Expires:  {}", format_timestamp(credential.expires_at));
            }
            None => {
                println!(
                    "Not logged in (profile `{}`). Run `esh login`.",
                    cli.profile
                );
            }
        },
    }

    Ok(())
}
