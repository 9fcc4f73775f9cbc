//! Event rules
//!
//! Every dispatched event URI is tested against each [`Rule`] in
//! registration order; a match runs the rule's actions.

mod rule;

pub use rule::{RegexRule, Rule, RuleError, RuleResult};
