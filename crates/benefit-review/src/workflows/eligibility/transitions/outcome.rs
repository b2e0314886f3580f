use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Work performed after (or alongside) the primary state change whose failure never
/// undoes that change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffect {
    pub name: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SideEffect {
    pub fn completed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            completed: true,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            completed: false,
            error: Some(error.to_string()),
        }
    }
}

/// Uniform result of a transition: the primary outcome plus every side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub side_effects: Vec<SideEffect>,
}

impl TransitionOutcome {
    pub(crate) fn succeeded(started: Instant, side_effects: Vec<SideEffect>) -> Self {
        Self {
            success: true,
            error: None,
            duration_ms: Some(elapsed_ms(started)),
            side_effects,
        }
    }

    pub(crate) fn failed(started: Instant, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            duration_ms: Some(elapsed_ms(started)),
            side_effects: Vec::new(),
        }
    }

    pub fn side_effect(&self, name: &str) -> Option<&SideEffect> {
        self.side_effects.iter().find(|effect| effect.name == name)
    }

    pub fn failed_side_effects(&self) -> impl Iterator<Item = &SideEffect> {
        self.side_effects.iter().filter(|effect| !effect.completed)
    }

    /// Primary change committed but at least one side effect did not.
    pub fn is_partial(&self) -> bool {
        self.success && self.failed_side_effects().next().is_some()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_when_a_side_effect_failed() {
        let outcome = TransitionOutcome::succeeded(
            Instant::now(),
            vec![
                SideEffect::completed("notification:application_approved"),
                SideEffect::failed("voucher", "issuer offline"),
            ],
        );
        assert!(outcome.success);
        assert!(outcome.is_partial());
        assert_eq!(
            outcome.side_effect("voucher").and_then(|effect| effect.error.as_deref()),
            Some("issuer offline")
        );
    }

    #[test]
    fn failures_serialize_without_side_effect_noise() {
        let outcome = TransitionOutcome::failed(Instant::now(), "Medical provider email is required");
        let value = serde_json::to_value(&outcome).expect("serializes");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Medical provider email is required");
        assert!(!outcome.is_partial());
    }
}
