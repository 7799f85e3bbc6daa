//! Credential maintenance.
//!
//! Requests authenticate with a bearer JWT issued by the auth service. The
//! [`CredentialSource`] seam hands out the current token and knows how to
//! obtain a fresh one; [`spawn_refresh_loop`] keeps the token alive in the
//! background with a half-life schedule: refresh immediately once less than
//! one second of lifetime remains, otherwise sleep half the remaining
//! lifetime and re-check.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::CredentialError;

/// Refresh as soon as less than this much lifetime remains.
const REFRESH_THRESHOLD: Duration = Duration::from_secs(1);

/// Backoff after a failed refresh or an uninspectable token.
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Supplier of the bearer credential used by the transport.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The current token.
    async fn current(&self) -> Result<String, CredentialError>;

    /// Obtain a fresh token from the auth service, make it current, and
    /// return it.
    async fn refresh(&self) -> Result<String, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct ExpClaims {
    exp: u64,
}

/// Expiry metadata read from a JWT.
///
/// The token is decoded without signature verification; this is inspection
/// of our own credential for scheduling, not validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JwtExpiry {
    expires_at_epoch_secs: u64,
}

impl JwtExpiry {
    pub fn of(token: &str) -> Result<Self, CredentialError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<ExpClaims>(
            token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        Ok(Self {
            expires_at_epoch_secs: data.claims.exp,
        })
    }

    pub fn expires_at_epoch_secs(&self) -> u64 {
        self.expires_at_epoch_secs
    }

    /// Remaining lifetime at `now`, zero once expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Duration::from_secs(self.expires_at_epoch_secs.saturating_sub(now_secs))
    }

    /// Half-life schedule: `None` means refresh now, `Some(d)` means sleep
    /// `d` and re-check.
    pub fn refresh_delay(&self, now: SystemTime) -> Option<Duration> {
        let remaining = self.remaining(now);
        if remaining < REFRESH_THRESHOLD {
            None
        } else {
            Some(remaining / 2)
        }
    }
}

/// Spawn the background credential refresher.
///
/// The task re-reads the current token, sleeps half its remaining lifetime,
/// and refreshes once the token is within one second of expiry, looping
/// until the shutdown signal fires. Failures back off and retry; they are
/// logged, never fatal.
pub fn spawn_refresh_loop(
    credentials: Arc<dyn CredentialSource>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = match next_delay(credentials.as_ref()).await {
                Delay::Refresh => {
                    match credentials.refresh().await {
                        Ok(_) => {
                            tracing::debug!("credential refreshed");
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "credential refresh failed");
                            RETRY_INTERVAL
                        }
                    }
                }
                Delay::Sleep(d) => d,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    tracing::info!("credential refresh task shutting down");
                    return;
                }
            }
        }
    })
}

enum Delay {
    /// The token is (nearly) expired; refresh immediately.
    Refresh,
    /// Re-check after this long.
    Sleep(Duration),
}

async fn next_delay(credentials: &dyn CredentialSource) -> Delay {
    let token = match credentials.current().await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, "no current credential; retrying later");
            return Delay::Refresh;
        }
    };
    match JwtExpiry::of(&token) {
        Ok(expiry) => match expiry.refresh_delay(SystemTime::now()) {
            None => Delay::Refresh,
            Some(d) => Delay::Sleep(d),
        },
        Err(e) => {
            tracing::warn!(error = %e, "credential not inspectable; retrying later");
            Delay::Sleep(RETRY_INTERVAL)
        }
    }
}
