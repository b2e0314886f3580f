use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-keyed metadata attached to events, notifications, and status changes.
pub type Metadata = serde_json::Map<String, Value>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for benefit applications.
    ApplicationId
);
string_id!(UserId);
string_id!(ProofReviewId);
string_id!(StatusChangeId);
string_id!(NotificationId);
string_id!(EventId);
string_id!(NoteId);

/// Kinds of records that events and notifications may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectKind {
    Application,
    ProofReview,
    User,
    ApplicationStatusChange,
    Notification,
}

impl SubjectKind {
    pub const fn label(self) -> &'static str {
        match self {
            SubjectKind::Application => "Application",
            SubjectKind::ProofReview => "ProofReview",
            SubjectKind::User => "User",
            SubjectKind::ApplicationStatusChange => "ApplicationStatusChange",
            SubjectKind::Notification => "Notification",
        }
    }
}

/// Polymorphic `(type, id)` reference used for auditables and notifiables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: String,
}

impl SubjectRef {
    pub fn application(id: &ApplicationId) -> Self {
        Self {
            kind: SubjectKind::Application,
            id: id.0.clone(),
        }
    }

    pub fn proof_review(id: &ProofReviewId) -> Self {
        Self {
            kind: SubjectKind::ProofReview,
            id: id.0.clone(),
        }
    }

    pub fn user(id: &UserId) -> Self {
        Self {
            kind: SubjectKind::User,
            id: id.0.clone(),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind.label(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Applicant,
    Administrator,
    MedicalProvider,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub kind: UserKind,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl User {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn is_applicant(&self) -> bool {
        self.kind == UserKind::Applicant
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.kind, UserKind::Administrator | UserKind::System)
    }
}

/// Proof dimension under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    Income,
    Residency,
}

impl ProofType {
    pub const fn label(self) -> &'static str {
        match self {
            ProofType::Income => "income",
            ProofType::Residency => "residency",
        }
    }
}

impl FromStr for ProofType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "residency" => Ok(Self::Residency),
            other => Err(format!("Invalid proof type: {other}")),
        }
    }
}

/// Review status carried on the application for each proof dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    Unsubmitted,
    NotReviewed,
    Approved,
    Rejected,
}

impl ProofStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ProofStatus::Unsubmitted => "unsubmitted",
            ProofStatus::NotReviewed => "not_reviewed",
            ProofStatus::Approved => "approved",
            ProofStatus::Rejected => "rejected",
        }
    }
}

/// Outcome an administrator may record on a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub const fn label(self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::Rejected => "rejected",
        }
    }

    pub const fn as_proof_status(self) -> ProofStatus {
        match self {
            ReviewDecision::Approved => ProofStatus::Approved,
            ReviewDecision::Rejected => ProofStatus::Rejected,
        }
    }
}

impl FromStr for ReviewDecision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("Invalid proof review status: {other}")),
        }
    }
}

/// Medical certification dimension, independent of proof review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationStatus {
    NotRequested,
    Requested,
    Received,
    Approved,
    Rejected,
}

impl CertificationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CertificationStatus::NotRequested => "not_requested",
            CertificationStatus::Requested => "requested",
            CertificationStatus::Received => "received",
            CertificationStatus::Approved => "approved",
            CertificationStatus::Rejected => "rejected",
        }
    }

    /// `approved` is terminal for this dimension; `rejected` may be re-requested.
    pub fn can_transition_to(self, next: CertificationStatus) -> bool {
        use CertificationStatus::*;
        matches!(
            (self, next),
            (NotRequested, Requested)
                | (Requested, Requested)
                | (Requested, Received)
                | (Requested, Rejected)
                | (Received, Approved)
                | (Received, Rejected)
                | (Rejected, Requested)
        )
    }

    pub const fn requires_reason(self) -> bool {
        matches!(self, CertificationStatus::Rejected)
    }
}

impl FromStr for CertificationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_requested" => Ok(Self::NotRequested),
            "requested" => Ok(Self::Requested),
            "received" => Ok(Self::Received),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("Invalid certification status: {other}")),
        }
    }
}

/// High level lifecycle tracked for the application as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    InProgress,
    AwaitingDocuments,
    Approved,
    Rejected,
    Archived,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::AwaitingDocuments => "awaiting_documents",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Archived => "archived",
        }
    }
}

/// Delivery channel a submission or certification arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMethod {
    Upload,
    Fax,
    Email,
    Mail,
    AdminUpload,
}

impl SubmissionMethod {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionMethod::Upload => "upload",
            SubmissionMethod::Fax => "fax",
            SubmissionMethod::Email => "email",
            SubmissionMethod::Mail => "mail",
            SubmissionMethod::AdminUpload => "admin_upload",
        }
    }
}

impl FromStr for SubmissionMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upload" | "portal" => Ok(Self::Upload),
            "fax" => Ok(Self::Fax),
            "email" => Ok(Self::Email),
            "mail" | "paper" => Ok(Self::Mail),
            "admin_upload" => Ok(Self::AdminUpload),
            other => Err(format!("Invalid submission method: {other}")),
        }
    }
}

/// Contact details for the medical professional certifying the applicant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalProvider {
    pub name: String,
    pub email: Option<String>,
    pub fax: Option<String>,
    pub phone: Option<String>,
}

impl MedicalProvider {
    pub fn email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn fax(&self) -> Option<&str> {
        non_blank(self.fax.as_deref())
    }

    pub fn has_contact_channel(&self) -> bool {
        self.email().is_some() || self.fax().is_some()
    }
}

/// Canonical storable reference produced once an upload has been normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub blob_key: String,
    pub filename: Option<String>,
}

/// Application fields relevant to review and certification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub applicant_id: UserId,
    pub status: ApplicationStatus,
    pub income_proof_status: ProofStatus,
    pub residency_proof_status: ProofStatus,
    pub medical_certification_status: CertificationStatus,
    pub certification_request_count: u32,
    pub medical_provider: MedicalProvider,
    pub medical_certification_requested_at: Option<DateTime<Utc>>,
    pub medical_certification_received_at: Option<DateTime<Utc>>,
    pub medical_certification_verified_at: Option<DateTime<Utc>>,
    pub medical_certification_rejection_reason: Option<String>,
    pub medical_certification: Option<AttachmentRef>,
    pub total_rejections: u32,
    pub last_proof_submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Fresh in-progress application with proofs awaiting review.
    pub fn new(
        id: ApplicationId,
        applicant_id: UserId,
        provider: MedicalProvider,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            applicant_id,
            status: ApplicationStatus::InProgress,
            income_proof_status: ProofStatus::NotReviewed,
            residency_proof_status: ProofStatus::NotReviewed,
            medical_certification_status: CertificationStatus::NotRequested,
            certification_request_count: 0,
            medical_provider: provider,
            medical_certification_requested_at: None,
            medical_certification_received_at: None,
            medical_certification_verified_at: None,
            medical_certification_rejection_reason: None,
            medical_certification: None,
            total_rejections: 0,
            last_proof_submitted_at: None,
            updated_at: now,
        }
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef::application(&self.id)
    }

    pub fn proof_status(&self, proof_type: ProofType) -> ProofStatus {
        match proof_type {
            ProofType::Income => self.income_proof_status,
            ProofType::Residency => self.residency_proof_status,
        }
    }

    pub fn set_proof_status(&mut self, proof_type: ProofType, status: ProofStatus) {
        match proof_type {
            ProofType::Income => self.income_proof_status = status,
            ProofType::Residency => self.residency_proof_status = status,
        }
    }

    /// Every reviewed dimension is approved, so the application itself can be approved.
    pub fn all_requirements_approved(&self) -> bool {
        self.income_proof_status == ProofStatus::Approved
            && self.residency_proof_status == ProofStatus::Approved
            && self.medical_certification_status == CertificationStatus::Approved
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certification_state_machine_allows_documented_edges() {
        use CertificationStatus::*;
        assert!(NotRequested.can_transition_to(Requested));
        assert!(Requested.can_transition_to(Received));
        assert!(Requested.can_transition_to(Rejected));
        assert!(Received.can_transition_to(Approved));
        assert!(Rejected.can_transition_to(Requested));
        assert!(!Approved.can_transition_to(Requested));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!NotRequested.can_transition_to(Approved));
        assert!(!Received.can_transition_to(Requested));
    }

    #[test]
    fn parses_proof_inputs() {
        assert_eq!("Income".parse::<ProofType>(), Ok(ProofType::Income));
        assert!("utility".parse::<ProofType>().is_err());
        assert_eq!(" rejected ".parse::<ReviewDecision>(), Ok(ReviewDecision::Rejected));
        assert!("pending".parse::<ReviewDecision>().is_err());
    }

    #[test]
    fn provider_contact_channels_ignore_blank_values() {
        let provider = MedicalProvider {
            name: "Dr. Reyes".to_string(),
            email: Some("  ".to_string()),
            fax: None,
            phone: Some("555-0100".to_string()),
        };
        assert!(!provider.has_contact_channel());
        let with_fax = MedicalProvider {
            fax: Some("555-0199".to_string()),
            ..provider
        };
        assert!(with_fax.has_contact_channel());
    }
}
