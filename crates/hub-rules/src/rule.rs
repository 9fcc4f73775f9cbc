//! Rules
//!
//! A rule pairs a match pattern with a fixed, ordered list of actions. Rules
//! are immutable once built; matching is a pure function of the pattern and
//! the event URI.

use hub_actions::{Action, ActionError, ActionFactory};
use hub_config::{RegexRuleConfig, RuleConfig};
use regex::Regex;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Rule construction errors
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{rule}': action {index} ({kind}): {source}")]
    Action {
        rule: String,
        index: usize,
        kind: &'static str,
        #[source]
        source: ActionError,
    },
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

/// A rule, one variant per rule type
#[derive(Debug, Clone)]
pub enum Rule {
    Regex(RegexRule),
}

impl Rule {
    /// Build a rule and its actions from configuration
    pub fn from_config(config: &RuleConfig, factory: &ActionFactory) -> RuleResult<Self> {
        match config {
            RuleConfig::Regex(c) => RegexRule::from_config(c, factory).map(Rule::Regex),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Rule::Regex(_) => "regex",
        }
    }

    /// Label used in logs
    pub fn label(&self) -> &str {
        match self {
            Rule::Regex(r) => r.label(),
        }
    }

    pub fn matches(&self, uri: &str) -> bool {
        match self {
            Rule::Regex(r) => r.matches(uri),
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            Rule::Regex(r) => &r.actions,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rule '{}'", self.kind(), self.label())
    }
}

/// Regular-expression search over the full event URI
///
/// Case-sensitive and unanchored unless the pattern anchors itself. A
/// pattern that fails to compile is kept for logging but never matches.
#[derive(Debug, Clone)]
pub struct RegexRule {
    name: Option<String>,
    pattern: String,
    regex: Option<Regex>,
    actions: Vec<Action>,
}

impl RegexRule {
    pub fn new(pattern: impl Into<String>, actions: Vec<Action>) -> Self {
        let pattern = pattern.into();
        let regex = match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(
                    pattern = %pattern,
                    error = %e,
                    "Invalid rule pattern, rule will never match"
                );
                None
            }
        };
        Self {
            name: None,
            pattern,
            regex,
            actions,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn from_config(config: &RegexRuleConfig, factory: &ActionFactory) -> RuleResult<Self> {
        let label = config.name.as_deref().unwrap_or(&config.regex);

        let actions = config
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                factory.build(action).map_err(|source| RuleError::Action {
                    rule: label.to_string(),
                    index,
                    kind: action.kind(),
                    source,
                })
            })
            .collect::<RuleResult<Vec<_>>>()?;

        let rule = Self::new(config.regex.clone(), actions);
        Ok(match &config.name {
            Some(name) => rule.with_name(name.clone()),
            None => rule,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Configured name, or the pattern itself
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.pattern)
    }

    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    pub fn matches(&self, uri: &str) -> bool {
        let matched = self.regex.as_ref().is_some_and(|r| r.is_match(uri));
        if matched {
            debug!(rule = %self.label(), uri, "Rule matched");
        }
        matched
    }
}
