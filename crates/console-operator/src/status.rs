//! Accumulates the conditions a sync cycle produces and writes them to the
//! Console status in a single update at the end of the cycle.

use chrono::Utc;
use tracing::warn;

use crate::{
    Error, Result,
    api::{ConditionStatus, OperatorCondition},
    store::HubStore,
};

pub const DEGRADED_SUFFIX: &str = "Degraded";
pub const PROGRESSING_SUFFIX: &str = "Progressing";

#[derive(Debug, Default)]
pub struct StatusHandler {
    conditions: Vec<OperatorCondition>,
    first_error: Option<Error>,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok` clears `<prefix>Degraded`, `Err` sets it with `reason` and the
    /// error text. The first error of the cycle is kept and returned by
    /// [`StatusHandler::flush`].
    pub fn handle_degraded(&mut self, prefix: &str, reason: &str, result: Result<()>) {
        let condition_type = format!("{prefix}{DEGRADED_SUFFIX}");
        match result {
            Ok(()) => self.add(condition(&condition_type, ConditionStatus::False, None, None)),
            Err(error) => {
                warn!(condition = %condition_type, reason, "{error}");
                self.add(condition(
                    &condition_type,
                    ConditionStatus::True,
                    Some(reason),
                    Some(error.to_string()),
                ));
                self.first_error.get_or_insert(error);
            }
        }
    }

    /// Sets `<prefix>Progressing` while any cluster is still waiting on remote
    /// data.
    pub fn handle_progressing(&mut self, prefix: &str, reason: &str, waiting: &[String]) {
        let condition_type = format!("{prefix}{PROGRESSING_SUFFIX}");
        if waiting.is_empty() {
            self.add(condition(&condition_type, ConditionStatus::False, None, None));
        } else {
            self.add(condition(
                &condition_type,
                ConditionStatus::True,
                Some(reason),
                Some(format!("waiting on clusters: {}", waiting.join(", "))),
            ));
        }
    }

    /// A failure recorded earlier in the cycle is never masked by a later
    /// success for the same condition type. A second failure keeps the first
    /// reason and appends its own reason and message.
    fn add(&mut self, new: OperatorCondition) {
        let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == new.type_) else {
            self.conditions.push(new);
            return;
        };
        match (existing.status, new.status) {
            (ConditionStatus::True, ConditionStatus::False) => {}
            (ConditionStatus::True, ConditionStatus::True) => {
                let appended = match (&new.reason, &new.message) {
                    (Some(reason), Some(message)) => format!("{reason}: {message}"),
                    (Some(reason), None) => reason.clone(),
                    (None, Some(message)) => message.clone(),
                    (None, None) => return,
                };
                existing.message = Some(match existing.message.take() {
                    Some(message) => format!("{message}; {appended}"),
                    None => appended,
                });
            }
            _ => *existing = new,
        }
    }

    /// Write every accumulated condition and return the first error of the
    /// cycle, if any.
    pub async fn flush(self, store: &dyn HubStore, console: &str) -> Result<()> {
        let update = if self.conditions.is_empty() {
            Ok(())
        } else {
            store
                .update_console_conditions(console, self.conditions)
                .await
        };

        match (self.first_error, update) {
            (Some(error), Err(update_error)) => {
                warn!("failed to update console status: {update_error}");
                Err(error)
            }
            (Some(error), Ok(())) => Err(error),
            (None, update) => update,
        }
    }
}

fn condition(
    type_: &str,
    status: ConditionStatus,
    reason: Option<&str>,
    message: Option<String>,
) -> OperatorCondition {
    OperatorCondition {
        type_: type_.to_string(),
        status,
        reason: reason.map(str::to_string),
        message,
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Merge `updates` into `existing` by condition type. Conditions not named in
/// `updates` are kept untouched, and the transition time only moves when the
/// status changes.
pub fn merge_conditions(
    existing: &[OperatorCondition],
    updates: Vec<OperatorCondition>,
) -> Vec<OperatorCondition> {
    let mut merged = existing.to_vec();
    for mut update in updates {
        match merged.iter_mut().find(|c| c.type_ == update.type_) {
            Some(current) => {
                if current.status == update.status {
                    update.last_transition_time = current.last_transition_time.clone();
                }
                *current = update;
            }
            None => merged.push(update),
        }
    }
    merged
}
