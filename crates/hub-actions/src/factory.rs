//! Builds actions from configuration

use hub_config::ActionConfig;
use reqwest::Client;
use std::sync::Arc;

use crate::action::{
    Action, ActionResult, EmailAction, HttpAction, TriggerAction, WaitAction,
};
use crate::mail::{Mailer, SmtpMailer};

/// Turns [`ActionConfig`] entries into runnable [`Action`]s
///
/// Holds the shared HTTP client. A mailer can be injected to replace the
/// SMTP transport every email action would otherwise build from its own
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct ActionFactory {
    http: Client,
    mailer: Option<Arc<dyn Mailer>>,
}

impl ActionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn build(&self, config: &ActionConfig) -> ActionResult<Action> {
        let action = match config {
            ActionConfig::Wait(c) => Action::Wait(WaitAction::seconds(c.seconds)),
            ActionConfig::Trigger(c) => Action::Trigger(TriggerAction::new(&c.trigger)),
            ActionConfig::Http(c) => {
                Action::Http(HttpAction::new(self.http.clone(), &c.method, &c.url)?)
            }
            ActionConfig::Email(c) => {
                let mailer: Arc<dyn Mailer> = match &self.mailer {
                    Some(mailer) => mailer.clone(),
                    None => Arc::new(SmtpMailer::from_config(c)?),
                };
                Action::Email(EmailAction::new(mailer, &c.from, &c.to, &c.message))
            }
        };
        Ok(action)
    }

    /// Build a whole action list, preserving order
    pub fn build_all(&self, configs: &[ActionConfig]) -> ActionResult<Vec<Action>> {
        configs.iter().map(|c| self.build(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionError;
    use async_trait::async_trait;
    use hub_config::{EmailActionConfig, HttpActionConfig, TriggerActionConfig, WaitActionConfig};

    #[derive(Debug)]
    struct RefusingMailer;

    #[async_trait]
    impl Mailer for RefusingMailer {
        async fn send(&self, _from: &str, _to: &str, _message: &str) -> ActionResult<()> {
            Err(ActionError::Mail("refused".to_string()))
        }
    }

    #[test]
    fn test_build_preserves_order_and_kinds() {
        let configs = vec![
            ActionConfig::Wait(WaitActionConfig { seconds: 5 }),
            ActionConfig::Trigger(TriggerActionConfig {
                trigger: "bridge://lamp1/off".to_string(),
            }),
            ActionConfig::Http(HttpActionConfig {
                method: "GET".to_string(),
                url: "http://localhost:8080/ping".to_string(),
            }),
        ];

        let actions = ActionFactory::new().build_all(&configs).unwrap();
        let kinds: Vec<_> = actions.iter().map(Action::kind).collect();
        assert_eq!(kinds, vec!["wait", "trigger", "http"]);
    }

    #[test]
    fn test_email_from_config_expands_newlines() {
        let config = ActionConfig::Email(EmailActionConfig {
            address: "smtp.example.com:587".to_string(),
            host: "smtp.example.com".to_string(),
            user: "hub".to_string(),
            password: "secret".to_string(),
            from: "hub@example.com".to_string(),
            to: "me@example.com".to_string(),
            message: "Subject: motion\\n\\nSomeone is home".to_string(),
        });

        let factory = ActionFactory::new().with_mailer(Arc::new(RefusingMailer));
        match factory.build(&config).unwrap() {
            Action::Email(email) => {
                assert_eq!(email.message, "Subject: motion\n\nSomeone is home");
                assert_eq!(email.to, "me@example.com");
                assert_eq!(Action::Email(email).failure_policy(), crate::FailurePolicy::Continue);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_invalid_http_method_is_rejected() {
        let config = ActionConfig::Http(HttpActionConfig {
            method: "FETCH IT".to_string(),
            url: "http://localhost/".to_string(),
        });
        tokio_test::assert_err!(ActionFactory::new().build(&config));
    }
}
