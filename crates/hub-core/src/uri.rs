//! Event URI type: `scheme://authority/path[#fragment]`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scheme reserved for outbound routing instructions consumed by `trigger`
pub const BRIDGE_SCHEME: &str = "bridge";

/// Error type for malformed event URIs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("event URI must start with '<scheme>://': {0}")]
    MissingScheme(String),

    #[error("event URI must contain '/' after the authority: {0}")]
    MissingPath(String),
}

/// An event identifier shaped as a URI
///
/// The scheme names the originating domain (a bridge's protocol tag, or
/// [`BRIDGE_SCHEME`] for routing), the authority names the bridge instance,
/// and the path/fragment carry the protocol-specific payload.
///
/// Parsing follows `^([^:]*)://([^/]*)/(.*)`: the scheme is everything up
/// to the first `:`, the authority runs up to the next `/`, and the rest is
/// split at the first `#` into path and fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventUri {
    scheme: String,
    authority: String,
    path: String,
    fragment: Option<String>,
}

impl EventUri {
    /// Build an event URI from its parts
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            authority: authority.into(),
            path: path.into(),
            fragment: None,
        }
    }

    /// Attach a fragment (usually the observed value)
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Everything after `authority/`, fragment included
    ///
    /// This is what a bridge receives when the manager routes a
    /// `bridge://<id>/...` instruction to it.
    pub fn remainder(&self) -> String {
        match &self.fragment {
            Some(fragment) => format!("{}#{}", self.path, fragment),
            None => self.path.clone(),
        }
    }

    /// Check if this URI is a routing instruction rather than an observation
    pub fn is_routing(&self) -> bool {
        self.scheme == BRIDGE_SCHEME
    }
}

impl FromStr for EventUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let colon = s
            .find(':')
            .ok_or_else(|| UriError::MissingScheme(s.to_string()))?;
        let (scheme, rest) = s.split_at(colon);
        let rest = rest
            .strip_prefix("://")
            .ok_or_else(|| UriError::MissingScheme(s.to_string()))?;

        let (authority, remainder) = rest
            .split_once('/')
            .ok_or_else(|| UriError::MissingPath(s.to_string()))?;

        let (path, fragment) = match remainder.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment.to_string())),
            None => (remainder, None),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
            fragment,
        })
    }
}

impl TryFrom<String> for EventUri {
    type Error = UriError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EventUri> for String {
    fn from(uri: EventUri) -> String {
        uri.to_string()
    }
}

impl fmt::Display for EventUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.path)?;
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}
