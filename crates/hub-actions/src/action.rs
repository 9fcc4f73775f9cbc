//! Action types
//!
//! Actions are the steps a rule runs when it matches. The set is closed:
//! wait, trigger, http and email.

use hub_core::{CorrelationId, Hub, RoutingError};
use reqwest::{Client, Method, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::mail::Mailer;

/// Action errors
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid action configuration: {0}")]
    InvalidConfig(String),

    #[error("routing failed: {0}")]
    Routing(#[from] RoutingError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sending email failed: {0}")]
    Mail(String),
}

/// Result type for actions
pub type ActionResult<T> = Result<T, ActionError>;

/// What the executor does after an action fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Skip the remaining actions of the sequence
    Abort,
    /// Log and carry on with the next action
    Continue,
}

/// One step of a rule's response
#[derive(Debug, Clone)]
pub enum Action {
    Wait(WaitAction),
    Trigger(TriggerAction),
    Http(HttpAction),
    Email(EmailAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Wait(_) => "wait",
            Action::Trigger(_) => "trigger",
            Action::Http(_) => "http",
            Action::Email(_) => "email",
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Action::Email(_) => FailurePolicy::Continue,
            Action::Wait(_) | Action::Trigger(_) | Action::Http(_) => FailurePolicy::Abort,
        }
    }

    pub async fn run(&self, hub: &dyn Hub, correlation: &CorrelationId) -> ActionResult<()> {
        match self {
            Action::Wait(a) => a.run(correlation).await,
            Action::Trigger(a) => a.run(hub, correlation).await,
            Action::Http(a) => a.run(correlation).await,
            Action::Email(a) => a.run(correlation).await,
        }
    }
}

/// Suspend the sequence for a fixed time; not cancellable
#[derive(Debug, Clone)]
pub struct WaitAction {
    pub duration: Duration,
}

impl WaitAction {
    pub fn seconds(seconds: u64) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
        }
    }

    async fn run(&self, correlation: &CorrelationId) -> ActionResult<()> {
        info!(%correlation, duration = ?self.duration, "Waiting");
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Route a `bridge://` instruction through the hub
#[derive(Debug, Clone)]
pub struct TriggerAction {
    pub uri: String,
}

impl TriggerAction {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    async fn run(&self, hub: &dyn Hub, correlation: &CorrelationId) -> ActionResult<()> {
        info!(%correlation, uri = %self.uri, "Triggering");
        hub.trigger(&self.uri).await?;
        Ok(())
    }
}

/// Issue one bodiless HTTP request and log the status
#[derive(Debug, Clone)]
pub struct HttpAction {
    pub method: Method,
    pub url: Url,
    client: Client,
}

impl HttpAction {
    pub fn new(client: Client, method: &str, url: &str) -> ActionResult<Self> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ActionError::InvalidConfig(format!("invalid HTTP method '{}'", method)))?;
        let url = Url::parse(url)
            .map_err(|e| ActionError::InvalidConfig(format!("invalid URL '{}': {}", url, e)))?;
        Ok(Self {
            method,
            url,
            client,
        })
    }

    async fn run(&self, correlation: &CorrelationId) -> ActionResult<()> {
        debug!(%correlation, method = %self.method, url = %self.url, "Sending HTTP request");
        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .send()
            .await?;
        info!(
            %correlation,
            status = response.status().as_u16(),
            url = %self.url,
            "HTTP request finished"
        );
        Ok(())
    }
}

/// Send one email through a [`Mailer`]
#[derive(Debug, Clone)]
pub struct EmailAction {
    pub from: String,
    pub to: String,
    /// Message with `\n` escapes already expanded
    pub message: String,
    mailer: Arc<dyn Mailer>,
}

impl EmailAction {
    /// Build the action; the two-character sequence `\n` in `template`
    /// becomes a newline
    pub fn new(
        mailer: Arc<dyn Mailer>,
        from: impl Into<String>,
        to: impl Into<String>,
        template: &str,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            message: template.replace("\\n", "\n"),
            mailer,
        }
    }

    async fn run(&self, correlation: &CorrelationId) -> ActionResult<()> {
        info!(%correlation, to = %self.to, "Sending email");
        self.mailer.send(&self.from, &self.to, &self.message).await
    }
}
