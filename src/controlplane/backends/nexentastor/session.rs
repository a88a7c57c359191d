//! Appliance login session
//!
//! Owns the credentials and serializes every (re-)login so that concurrent
//! requests observing a rejected token converge on one fresh token.

use super::envelope::{classify, NefErrorKind};
use super::rest::Transport;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const LOGIN_PATH: &str = "auth/login";

/// Username and password for one appliance
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login state of one provider
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    /// Number of successful logins; 0 means no token yet
    generation: AtomicU64,
    login_lock: Mutex<()>,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            generation: AtomicU64::new(0),
            login_lock: Mutex::new(()),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_logged_in(&self) -> bool {
        self.generation() > 0
    }

    /// Log in unconditionally, replacing the current token
    pub async fn log_in<T: Transport + ?Sized>(
        &self,
        ctx: &RequestContext,
        transport: &T,
    ) -> Result<()> {
        let _guard = ctx.run("Login request", self.login_lock.lock()).await?;
        self.exchange(ctx, transport).await
    }

    /// Log in unless another caller already did so since `observed` was read
    pub async fn refresh<T: Transport + ?Sized>(
        &self,
        ctx: &RequestContext,
        transport: &T,
        observed: u64,
    ) -> Result<()> {
        let _guard = ctx.run("Login request", self.login_lock.lock()).await?;
        if self.generation() != observed {
            debug!("login token already refreshed by a concurrent request");
            return Ok(());
        }
        self.exchange(ctx, transport).await
    }

    /// Log in lazily before the first authenticated request
    pub async fn ensure<T: Transport + ?Sized>(
        &self,
        ctx: &RequestContext,
        transport: &T,
    ) -> Result<()> {
        if self.is_logged_in() {
            return Ok(());
        }
        self.refresh(ctx, transport, 0).await
    }

    async fn exchange<T: Transport + ?Sized>(
        &self,
        ctx: &RequestContext,
        transport: &T,
    ) -> Result<()> {
        let body = json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
        });
        let response = transport
            .send(ctx, Method::POST, LOGIN_PATH, Some(&body))
            .await?;

        if let Some(token) = response.body.get("token").and_then(Value::as_str) {
            transport.set_auth_token(token.to_string());
            self.generation.fetch_add(1, Ordering::AcqRel);
            debug!("login token for {} has been updated", transport.address());
            return Ok(());
        }

        let rejected = |reason: String| {
            warn!(
                "login to NexentaStor {} failed (username: '{}'), \
                 please make sure to use correct address and password",
                transport.address(),
                self.credentials.username
            );
            Error::Auth {
                endpoint: transport.address().to_string(),
                username: self.credentials.username.clone(),
                reason,
            }
        };

        match classify(response.status, &response.body) {
            Some(err) if err.kind() == NefErrorKind::Auth => Err(rejected(err.message)),
            Some(err) => Err(Error::Appliance {
                endpoint: transport.address().to_string(),
                operation: "Login request".to_string(),
                source: err,
            }),
            None if response.status == StatusCode::UNAUTHORIZED => {
                Err(rejected("unauthorized".to_string()))
            }
            None => Err(Error::Protocol {
                endpoint: transport.address().to_string(),
                operation: "Login request".to_string(),
                reason: format!("no token found in response: {}", response.body),
            }),
        }
    }
}
