//! Outbound mail submission

use async_trait::async_trait;
use hub_config::EmailActionConfig;
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::fmt;

use crate::action::{ActionError, ActionResult};

/// Default submission port when the configured address has none
const DEFAULT_SMTP_PORT: u16 = 25;

/// Sends one raw message from one sender to one recipient
#[async_trait]
pub trait Mailer: Send + Sync + fmt::Debug {
    async fn send(&self, from: &str, to: &str, message: &str) -> ActionResult<()>;
}

/// SMTP submission with PLAIN authentication
///
/// STARTTLS is used when the server offers it, like a stock `sendmail`
/// client would.
pub struct SmtpMailer {
    address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailActionConfig) -> ActionResult<Self> {
        let (relay, port) = split_address(&config.address)?;

        let tls = TlsParameters::new(config.host.clone())
            .map_err(|e| ActionError::InvalidConfig(format!("TLS parameters: {}", e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(relay)
            .port(port)
            .tls(Tls::Opportunistic(tls))
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain])
            .build();

        Ok(Self {
            address: config.address.clone(),
            transport,
        })
    }
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, from: &str, to: &str, message: &str) -> ActionResult<()> {
        let from: Address = from
            .parse()
            .map_err(|e| ActionError::Mail(format!("sender '{}': {}", from, e)))?;
        let to: Address = to
            .parse()
            .map_err(|e| ActionError::Mail(format!("recipient '{}': {}", to, e)))?;
        let envelope =
            Envelope::new(Some(from), vec![to]).map_err(|e| ActionError::Mail(e.to_string()))?;

        self.transport
            .send_raw(&envelope, message.as_bytes())
            .await
            .map_err(|e| ActionError::Mail(e.to_string()))?;
        Ok(())
    }
}

fn split_address(address: &str) -> ActionResult<(&str, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) => port
            .parse()
            .map(|port| (host, port))
            .map_err(|_| ActionError::InvalidConfig(format!("invalid SMTP port in '{}'", address))),
        None => Ok((address, DEFAULT_SMTP_PORT)),
    }
}
