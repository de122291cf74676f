use super::credentials::{CredentialStore, StoredCredential};
use super::{ClientError, DeviceLoginClient, PollStatus};
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub profile: String,
    pub token_name: Option<String>,
    pub open_browser: bool,
    /// Wall-clock budget for the whole approval wait.
    pub max_wait: Duration,
    /// Floor applied to the server's suggested poll interval.
    pub min_poll_interval: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            token_name: None,
            open_browser: true,
            max_wait: Duration::from_secs(15 * 60),
            min_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Start a device login, wait for the browser approval and store the token.
pub async fn login(
    client: &DeviceLoginClient,
    store: &CredentialStore,
    options: &LoginOptions,
) -> Result<StoredCredential, ClientError> {
    let started = client.start(options.token_name.as_deref()).await?;
    let deadline = Instant::now() + options.max_wait;

    eprintln!("To approve this login, open:\n\n    {}\n", started.verification_url);
    if options.open_browser {
        if let Err(e) = webbrowser::open(&started.verification_url) {
            tracing::warn!(error = %e, "Could not open a browser, open the link manually");
        }
    }
    eprintln!("Waiting for approval...");

    let interval = Duration::from_secs(started.poll_interval_seconds.max(0) as u64)
        .max(options.min_poll_interval);
    let mut next_wait = interval;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(ClientError::TimedOut);
        }
        sleep(next_wait.min(deadline - now)).await;
        next_wait = interval;

        let polled = timeout_at(deadline, client.poll(&started.device_code))
            .await
            .map_err(|_| ClientError::TimedOut)?;

        match polled {
            Ok(PollStatus::Pending) => {
                tracing::debug!("Still waiting for approval");
            }
            Ok(PollStatus::Approved(token)) => {
                let credential = StoredCredential {
                    server: client.base_url().to_string(),
                    token: token.token,
                    token_id: token.token_id,
                    token_name: token.token_name,
                    expires_at: token.expires_at,
                };
                store.save(&options.profile, credential.clone()).await?;
                tracing::info!(
                    profile = %options.profile,
                    token_id = %credential.token_id,
                    "Login approved"
                );
                return Ok(credential);
            }
            Ok(PollStatus::Expired) => return Err(ClientError::Expired),
            Err(ClientError::RateLimited { retry_after_secs }) => {
                if let Some(secs) = retry_after_secs {
                    next_wait = interval.max(Duration::from_secs(secs));
                }
                tracing::warn!(retry_after_secs, "Poll rate limited, backing off");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Poll failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}
