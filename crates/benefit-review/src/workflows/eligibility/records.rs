use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, EventId, Metadata, NoteId, NotificationId, ProofReviewId, ProofType,
    ReviewDecision, StatusChangeId, SubjectRef, UserId,
};

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub actor_id: Option<UserId>,
    pub action: String,
    pub auditable: SubjectRef,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub actor_id: Option<UserId>,
    pub action: String,
    pub auditable: SubjectRef,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Error,
}

impl DeliveryStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Error => "error",
        }
    }
}

/// Persisted notification. Only `metadata`, `delivery_status`, and `read_at` change after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub actor_id: UserId,
    pub action: String,
    pub notifiable: Option<SubjectRef>,
    pub metadata: Metadata,
    pub delivery_status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub actor_id: UserId,
    pub action: String,
    pub notifiable: Option<SubjectRef>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Mutable slice of a notification; everything else is fixed at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPatch {
    pub metadata: Metadata,
    pub delivery_status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<&Notification> for NotificationPatch {
    fn from(notification: &Notification) -> Self {
        Self {
            metadata: notification.metadata.clone(),
            delivery_status: notification.delivery_status,
            read_at: notification.read_at,
        }
    }
}

/// One row per certification or proof-dimension transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatusChange {
    pub id: StatusChangeId,
    pub application_id: ApplicationId,
    pub user_id: UserId,
    pub from_status: String,
    pub to_status: String,
    pub metadata: Metadata,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApplicationStatusChange {
    /// Tagged by the transition service when the change concerns medical certification.
    pub fn is_certification_change(&self) -> bool {
        self.metadata
            .get(CHANGE_TYPE_KEY)
            .and_then(|value| value.as_str())
            .map(|value| value == CERTIFICATION_CHANGE_TYPE)
            .unwrap_or(false)
    }
}

pub const CHANGE_TYPE_KEY: &str = "change_type";
pub const CERTIFICATION_CHANGE_TYPE: &str = "medical_certification";

#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusChange {
    pub application_id: ApplicationId,
    pub user_id: UserId,
    pub from_status: String,
    pub to_status: String,
    pub metadata: Metadata,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row per review action; history is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofReview {
    pub id: ProofReviewId,
    pub application_id: ApplicationId,
    pub admin_id: UserId,
    pub proof_type: ProofType,
    pub status: ReviewDecision,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProofReview {
    pub application_id: ApplicationId,
    pub admin_id: UserId,
    pub proof_type: ProofType,
    pub status: ReviewDecision,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Freeform reviewer note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub application_id: ApplicationId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNote {
    pub application_id: ApplicationId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}
