use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;

use crate::config::AuthConfig;
use crate::error::{CouchDbErrorBody, Error};

/// Session-cookie state machine. A 401 triggers exactly one re-auth attempt,
/// synchronized via the `generation` counter so concurrent callers who all
/// observe the same stale cookie don't each fire their own `/_session` POST.
///
/// NOTE (source anomaly, §9): the source uses `issued_at + duration >= now`
/// to mean "expired", which is inverted. The correct check, used below, is
/// `now >= issued_at + duration`.
pub struct SessionAuth {
    config: AuthConfig,
    state: Mutex<Option<SessionState>>,
    generation: AtomicU64,
}

struct SessionState {
    cookie: String,
    issued_at: Instant,
}

impl SessionAuth {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns a valid session cookie, logging in or refreshing as needed.
    pub async fn token(&self, client: &Client, endpoint: &str) -> Result<String, Error> {
        if let Some(cookie) = self.fresh_cookie() {
            return Ok(cookie);
        }
        self.login(client, endpoint).await
    }

    fn fresh_cookie(&self) -> Option<String> {
        let guard = self.state.lock();
        match guard.as_ref() {
            Some(state) if !Self::is_stale(state, self.config.token_duration) => {
                Some(state.cookie.clone())
            }
            _ => None,
        }
    }

    fn is_stale(state: &SessionState, duration: Duration) -> bool {
        Instant::now() >= state.issued_at + duration
    }

    /// Called once after a first 401. If another caller already refreshed
    /// the cookie (generation advanced), this reuses that result instead of
    /// logging in again.
    pub async fn reauthenticate(&self, client: &Client, endpoint: &str) -> Result<String, Error> {
        let observed_generation = self.generation.load(Ordering::SeqCst);
        self.login_if_generation_unchanged(client, endpoint, observed_generation)
            .await
    }

    async fn login_if_generation_unchanged(
        &self,
        client: &Client,
        endpoint: &str,
        observed_generation: u64,
    ) -> Result<String, Error> {
        // Another task may have already refreshed between the 401 being
        // observed and this call; only the first to arrive actually logs in.
        if self.generation.load(Ordering::SeqCst) != observed_generation {
            if let Some(cookie) = self.fresh_cookie() {
                return Ok(cookie);
            }
        }
        self.login(client, endpoint).await
    }

    async fn login(&self, client: &Client, endpoint: &str) -> Result<String, Error> {
        let url = format!("{}/_session", endpoint.trim_end_matches('/'));
        let response = client
            .post(&url)
            .json(&json!({ "name": self.config.name, "password": self.config.password }))
            .send()
            .await?;

        let status = response.status();
        let set_cookie = response
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_auth_session_value);

        if !status.is_success() {
            let body: CouchDbErrorBody = response.json().await.unwrap_or(CouchDbErrorBody {
                error: "unauthorized".into(),
                reason: "login failed".into(),
            });
            return Err(Error::from_status_and_body(status.as_u16(), body));
        }

        let cookie = set_cookie.ok_or_else(|| {
            Error::Decode(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "CouchDB login response carried no AuthSession cookie",
            )))
        })?;

        *self.state.lock() = Some(SessionState {
            cookie: cookie.clone(),
            issued_at: Instant::now(),
        });
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(cookie)
    }
}

/// Pulls the `AuthSession` cookie's value out of a `Set-Cookie` header,
/// discarding `Path`/`HttpOnly`/etc attributes.
fn extract_auth_session_value(header: &str) -> Option<String> {
    header.split(';').next().and_then(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name.trim() == "AuthSession").then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_session_value_from_full_set_cookie_header() {
        let header = "AuthSession=abc123; Version=1; Path=/; HttpOnly";
        assert_eq!(extract_auth_session_value(header).as_deref(), Some("abc123"));
    }
}
