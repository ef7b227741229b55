//! The reducer contract.

use docsync_model::Action;
use std::fmt;

/// An action-level reduction failure.
///
/// Reducer errors propagate as failed operations in the log; they never
/// corrupt state and never abort the surrounding job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducerError(pub String);

impl fmt::Display for ReducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reducer error: {}", self.0)
    }
}

impl std::error::Error for ReducerError {}

/// The external business-logic layer.
///
/// `reduce` must be pure, deterministic and scope-aware: the same state and
/// action always produce the same new state. The engine treats the returned
/// value as the document state after the action.
pub trait Reducer: Send + Sync {
    /// Applies one action to a document state.
    fn reduce(
        &self,
        state: &serde_json::Value,
        action: &Action,
    ) -> Result<serde_json::Value, ReducerError>;
}

/// A reducer that shallow-merges object inputs into an object state.
///
/// Useful as a reference reducer in tests and examples: a `SET` action with
/// input `{"title": "x"}` sets `state.title`. Non-object inputs replace the
/// state wholesale. The action type `FAIL` always errors, for exercising
/// failure paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMergeReducer;

impl Reducer for JsonMergeReducer {
    fn reduce(
        &self,
        state: &serde_json::Value,
        action: &Action,
    ) -> Result<serde_json::Value, ReducerError> {
        if action.action_type == "FAIL" {
            return Err(ReducerError(format!("action {} failed", action.id)));
        }
        match (state.as_object(), action.input.as_object()) {
            (Some(state_map), Some(input_map)) => {
                let mut merged = state_map.clone();
                for (k, v) in input_map {
                    merged.insert(k.clone(), v.clone());
                }
                Ok(serde_json::Value::Object(merged))
            }
            _ => Ok(action.input.clone()),
        }
    }
}
