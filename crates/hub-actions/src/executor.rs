//! Sequential action executor
//!
//! Actions of one rule match run strictly in list order on the calling task:
//! action N+1 starts only after action N returned. A failure stops the
//! sequence or is logged and skipped, per the action's [`FailurePolicy`].

use hub_core::{CorrelationId, Hub};
use tracing::{error, info, warn};

use crate::action::{Action, ActionError, FailurePolicy};

/// How a sequence ended
#[derive(Debug)]
pub enum SequenceOutcome {
    /// Every action ran; `failures` counts the ones that failed but were skipped
    Completed { ran: usize, failures: usize },
    /// Action `at` failed and the rest were not run
    Aborted { at: usize, error: ActionError },
}

impl SequenceOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SequenceOutcome::Completed { .. })
    }
}

/// Run `actions` in order against `hub`
pub async fn run_sequence(
    actions: &[Action],
    hub: &dyn Hub,
    correlation: &CorrelationId,
) -> SequenceOutcome {
    let mut failures = 0;

    for (i, action) in actions.iter().enumerate() {
        info!(%correlation, index = i, kind = action.kind(), "Running action");

        let Err(e) = action.run(hub, correlation).await else {
            continue;
        };

        match action.failure_policy() {
            FailurePolicy::Continue => {
                warn!(
                    %correlation,
                    index = i,
                    kind = action.kind(),
                    error = %e,
                    "Action failed, continuing"
                );
                failures += 1;
            }
            FailurePolicy::Abort => {
                error!(
                    %correlation,
                    index = i,
                    kind = action.kind(),
                    error = %e,
                    skipped = actions.len() - i - 1,
                    "Action failed, aborting sequence"
                );
                return SequenceOutcome::Aborted { at: i, error: e };
            }
        }
    }

    SequenceOutcome::Completed {
        ran: actions.len(),
        failures,
    }
}
