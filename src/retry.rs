use std::time::Duration;

use rand::Rng;
use reqwest::Response;

use crate::error::{CouchDbErrorBody, Error};

/// Exponential backoff with jitter, per spec.md §7: base 200ms, factor 2,
/// capped at 3 attempts, ±25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            factor: 2,
            max_attempts: 3,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 0-indexed retry attempt (0 = first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * (self.factor as f64).powi(attempt as i32);
        let jitter_span = exp * self.jitter;
        let jittered = rand::thread_rng().gen_range((exp - jitter_span)..=(exp + jitter_span));
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Runs `op` with exponential backoff for transport/server errors, and
/// exactly one re-auth-and-retry for a first `Unauthorized`. A second
/// `Unauthorized` is surfaced, never retried again.
pub async fn with_retry<T, F, Fut, R, RFut>(
    policy: BackoffPolicy,
    mut reauth: R,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
    R: FnMut() -> RFut,
    RFut: std::future::Future<Output = Result<(), Error>>,
{
    let mut reauthenticated_once = false;
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Error::Unauthorized(body)) => {
                if reauthenticated_once {
                    return Err(Error::Unauthorized(body));
                }
                reauthenticated_once = true;
                reauth().await?;
            }
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, ?delay, "retrying after {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Builds an `Error` from a non-2xx response, per the status-to-variant
/// mapping in `Error::from_status_and_body`. A body that doesn't match
/// CouchDB's `{error, reason}` shape surfaces as a `Decode` error.
pub async fn response_to_error(response: Response) -> Error {
    let status = response.status().as_u16();
    match response.json::<CouchDbErrorBody>().await {
        Ok(body) => Error::from_status_and_body(status, body),
        Err(decode_err) => Error::Decode(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            decode_err.to_string(),
        ))),
    }
}
