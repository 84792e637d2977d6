//! Persisted execution history.
//!
//! One entry per effectful step, in execution order. Replay walks the
//! list positionally: the Nth step a workflow takes must match the Nth
//! recorded event, which is what makes workflow code obligated to be
//! deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ActivityError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// An activity call that ran to completion or exhausted retries.
    Activity {
        name: String,
        outcome: Result<Value, ActivityError>,
    },
    /// A durable timer that fired (or was cut short by termination).
    Timer { millis: u64 },
    /// An external-event wait that ended. `received` distinguishes the
    /// event arriving from the timeout winning the race.
    Event {
        name: String,
        received: bool,
        payload: Option<Value>,
    },
    /// A child workflow that finished.
    Child {
        workflow: String,
        instance_id: String,
        outcome: Result<Value, String>,
    },
}

impl HistoryEvent {
    /// Short tag used in divergence diagnostics.
    pub fn kind(&self) -> String {
        match self {
            HistoryEvent::Activity { name, .. } => format!("activity:{name}"),
            HistoryEvent::Timer { .. } => "timer".to_string(),
            HistoryEvent::Event { name, .. } => format!("event:{name}"),
            HistoryEvent::Child { workflow, .. } => format!("child:{workflow}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_round_trips_through_json() {
        let events = vec![
            HistoryEvent::Activity {
                name: "verify_cluster_connection".to_string(),
                outcome: Ok(json!({"platform": "kubernetes"})),
            },
            HistoryEvent::Activity {
                name: "transfer_model".to_string(),
                outcome: Err(ActivityError {
                    message: "connection refused".to_string(),
                    retryable: true,
                    attempts: 3,
                }),
            },
            HistoryEvent::Timer { millis: 30_000 },
            HistoryEvent::Event {
                name: "transfer_completed".to_string(),
                received: false,
                payload: None,
            },
            HistoryEvent::Child {
                workflow: "transfer_poller".to_string(),
                instance_id: "wf-1:0".to_string(),
                outcome: Ok(json!("done")),
            },
        ];
        let encoded = serde_json::to_value(&events).unwrap();
        let decoded: Vec<HistoryEvent> = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn kinds_identify_the_step() {
        let event = HistoryEvent::Timer { millis: 5 };
        assert_eq!(event.kind(), "timer");
        let event = HistoryEvent::Event {
            name: "go".to_string(),
            received: true,
            payload: None,
        };
        assert_eq!(event.kind(), "event:go");
    }
}
