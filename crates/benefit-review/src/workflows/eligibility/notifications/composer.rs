use serde_json::Value;

use super::action::NotificationAction;
use crate::workflows::eligibility::domain::{Metadata, SubjectRef, User};

/// Render display text for a notification or audit entry. Pure: no lookups, no clock.
pub fn compose(
    action: &str,
    subject: Option<&SubjectRef>,
    actor: Option<&User>,
    metadata: &Metadata,
) -> String {
    let parsed = NotificationAction::parse(action);
    let subject_label = subject.map(|subject| format!("{} #{}", subject.kind.label(), subject.id));
    let by_actor = actor
        .map(|actor| format!(" by {}", actor.full_name()))
        .unwrap_or_default();

    let composed = match (&parsed, subject_label.as_deref()) {
        (NotificationAction::ProofApproved, Some(subject)) => Some(format!(
            "{} proof approved for {subject}{by_actor}.",
            proof_label(metadata)
        )),
        (NotificationAction::ProofRejected, Some(subject)) => Some(proof_rejected(
            &proof_label(metadata),
            subject,
            &by_actor,
            metadata,
        )),
        (NotificationAction::IncomeProofRejected, Some(subject)) => Some(proof_rejected(
            "Income",
            subject,
            &by_actor,
            metadata,
        )),
        (NotificationAction::ResidencyProofRejected, Some(subject)) => Some(proof_rejected(
            "Residency",
            subject,
            &by_actor,
            metadata,
        )),
        (NotificationAction::DocumentsRequested, Some(subject)) => Some(format!(
            "Additional documents requested for {subject}{by_actor}."
        )),
        (NotificationAction::ApplicationApproved, Some(subject)) => {
            Some(format!("{subject} approved{by_actor}."))
        }
        (NotificationAction::ApplicationRejected, Some(subject)) => {
            Some(format!("{subject} rejected{by_actor}."))
        }
        (NotificationAction::MaxRejectionsReached, Some(subject)) => Some(format!(
            "{subject} archived after reaching the maximum number of proof rejections."
        )),
        (NotificationAction::AccountCreated, _) => Some(match text(metadata, "recipient_name") {
            Some(name) => format!("Account created for {name}{by_actor}."),
            None => format!("Account created{by_actor}."),
        }),
        (NotificationAction::MedicalCertification(suffix), Some(subject)) => {
            certification(suffix, subject, &by_actor, metadata)
        }
        _ => None,
    };

    composed.unwrap_or_else(|| fallback(action, subject))
}

fn certification(
    suffix: &str,
    subject: &str,
    by_actor: &str,
    metadata: &Metadata,
) -> Option<String> {
    let provider = text(metadata, "provider_name")
        .map(|name| format!(" from {name}"))
        .unwrap_or_default();

    match suffix {
        "requested" => {
            let attempt = metadata
                .get("request_count")
                .and_then(Value::as_u64)
                .filter(|count| *count > 1)
                .map(|count| format!(" (request #{count})"))
                .unwrap_or_default();
            Some(format!(
                "Medical certification requested{provider} for {subject}{attempt}."
            ))
        }
        "received" => {
            let method = text(metadata, "submission_method")
                .map(|method| format!(" via {method}"))
                .unwrap_or_default();
            Some(format!(
                "Medical certification received{provider} for {subject}{method}."
            ))
        }
        "approved" => Some(format!(
            "Medical certification approved for {subject}{by_actor}."
        )),
        "rejected" => Some(match text(metadata, "rejection_reason") {
            Some(reason) => format!(
                "Medical certification rejected for {subject}{by_actor}: {reason}"
            ),
            None => format!("Medical certification rejected for {subject}{by_actor}."),
        }),
        _ => None,
    }
}

fn proof_rejected(proof: &str, subject: &str, by_actor: &str, metadata: &Metadata) -> String {
    match text(metadata, "rejection_reason") {
        Some(reason) => format!("{proof} proof rejected for {subject}{by_actor}: {reason}"),
        None => format!("{proof} proof rejected for {subject}{by_actor}."),
    }
}

fn proof_label(metadata: &Metadata) -> String {
    text(metadata, "proof_type")
        .map(capitalize)
        .unwrap_or_else(|| "Submitted".to_string())
}

fn text<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn fallback(action: &str, subject: Option<&SubjectRef>) -> String {
    match subject {
        Some(subject) => format!(
            "{} notification regarding {} #{}.",
            humanize(action),
            subject.kind.label(),
            subject.id
        ),
        None => format!("{} notification.", humanize(action)),
    }
}

/// `medical_certification_requested` -> `Medical certification requested`.
pub fn humanize(action: &str) -> String {
    let spaced = action.trim().replace('_', " ");
    capitalize(spaced.trim())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
