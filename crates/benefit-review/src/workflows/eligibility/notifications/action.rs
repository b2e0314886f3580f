use std::borrow::Cow;
use std::fmt;

use crate::workflows::eligibility::domain::ProofType;

pub const MEDICAL_CERTIFICATION_PREFIX: &str = "medical_certification_";

/// Notification actions with dedicated handling. Anything under the
/// `medical_certification_` prefix keeps its suffix; everything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationAction {
    AccountCreated,
    ProofApproved,
    ProofRejected,
    IncomeProofRejected,
    ResidencyProofRejected,
    DocumentsRequested,
    ApplicationApproved,
    ApplicationRejected,
    MaxRejectionsReached,
    MedicalCertification(String),
    Other(String),
}

impl NotificationAction {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "account_created" => Self::AccountCreated,
            "proof_approved" => Self::ProofApproved,
            "proof_rejected" => Self::ProofRejected,
            "income_proof_rejected" => Self::IncomeProofRejected,
            "residency_proof_rejected" => Self::ResidencyProofRejected,
            "documents_requested" => Self::DocumentsRequested,
            "application_approved" => Self::ApplicationApproved,
            "application_rejected" => Self::ApplicationRejected,
            "max_rejections_reached" => Self::MaxRejectionsReached,
            other => match other.strip_prefix(MEDICAL_CERTIFICATION_PREFIX) {
                Some(suffix) if !suffix.is_empty() => Self::MedicalCertification(suffix.to_string()),
                _ => Self::Other(other.to_string()),
            },
        }
    }

    pub fn proof_rejected_for(proof_type: ProofType) -> Self {
        match proof_type {
            ProofType::Income => Self::IncomeProofRejected,
            ProofType::Residency => Self::ResidencyProofRejected,
        }
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Self::AccountCreated => Cow::Borrowed("account_created"),
            Self::ProofApproved => Cow::Borrowed("proof_approved"),
            Self::ProofRejected => Cow::Borrowed("proof_rejected"),
            Self::IncomeProofRejected => Cow::Borrowed("income_proof_rejected"),
            Self::ResidencyProofRejected => Cow::Borrowed("residency_proof_rejected"),
            Self::DocumentsRequested => Cow::Borrowed("documents_requested"),
            Self::ApplicationApproved => Cow::Borrowed("application_approved"),
            Self::ApplicationRejected => Cow::Borrowed("application_rejected"),
            Self::MaxRejectionsReached => Cow::Borrowed("max_rejections_reached"),
            Self::MedicalCertification(suffix) => {
                Cow::Owned(format!("{MEDICAL_CERTIFICATION_PREFIX}{suffix}"))
            }
            Self::Other(raw) => Cow::Borrowed(raw.as_str()),
        }
    }

    /// Proof review actions carry a stricter delivery contract.
    pub fn is_proof_review(&self) -> bool {
        matches!(
            self,
            Self::ProofApproved
                | Self::ProofRejected
                | Self::IncomeProofRejected
                | Self::ResidencyProofRejected
        )
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Other(raw) if raw.trim().is_empty())
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for NotificationAction {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
