//! Rule actions for the event hub
//!
//! An [`ActionFactory`] builds [`Action`]s from configuration and
//! [`run_sequence`] executes a list of them in order for one rule match.

mod action;
mod executor;
mod factory;
mod mail;

pub use action::{
    Action, ActionError, ActionResult, EmailAction, FailurePolicy, HttpAction, TriggerAction,
    WaitAction,
};
pub use executor::{run_sequence, SequenceOutcome};
pub use factory::ActionFactory;
pub use mail::{Mailer, SmtpMailer};
