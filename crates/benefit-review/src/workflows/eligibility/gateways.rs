use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{Application, ApplicationId, AttachmentRef, Metadata, NotificationId};

/// Template groups the mail transport knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateGroup {
    ApplicationNotifications,
    MedicalProvider,
}

impl TemplateGroup {
    pub const fn label(self) -> &'static str {
        match self {
            TemplateGroup::ApplicationNotifications => "application_notifications",
            TemplateGroup::MedicalProvider => "medical_provider",
        }
    }
}

/// Outbound message payload handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub template_group: TemplateGroup,
    pub message: String,
    pub recipient: String,
    pub data: Metadata,
}

/// Mail transport (SMTP relay, provider API, ...). Returns an error when the send fails.
pub trait Mailer: Send + Sync {
    fn deliver(&self, message: MailMessage) -> Result<(), MailError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    #[error("mail transport unavailable: {0}")]
    Transport(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

/// Raw bytes submitted through a form upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Object storage holding certification documents. MIME and size checks happen upstream.
pub trait ObjectStorage: Send + Sync {
    fn store_upload(&self, upload: &UploadedFile) -> Result<AttachmentRef, StorageError>;
    fn resolve_signed_id(&self, signed_id: &str) -> Result<AttachmentRef, StorageError>;
    fn attach(
        &self,
        application_id: &ApplicationId,
        attachment: &AttachmentRef,
    ) -> Result<(), StorageError>;
    fn is_attached(
        &self,
        application_id: &ApplicationId,
        attachment: &AttachmentRef,
    ) -> Result<bool, StorageError>;
    /// Drop any locally cached attachment state and re-read it from the backing store.
    fn reset(&self, application_id: &ApplicationId) -> Result<(), StorageError>;
    fn detach(&self, application_id: &ApplicationId) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("signed reference could not be resolved")]
    InvalidSignedId,
    #[error("blob {0} does not exist")]
    MissingBlob(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Background work descriptors executed at least once after the enqueuing transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum QueuedTask {
    ProviderCertificationRequest {
        application_id: ApplicationId,
        notification_id: Option<NotificationId>,
        request_count: u32,
    },
}

pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Issues vouchers for approved applications; eligibility rules live behind this boundary.
pub trait VoucherIssuer: Send + Sync {
    fn issue_if_eligible(&self, application: &Application) -> Result<Option<String>, VoucherError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoucherError {
    #[error("voucher issuance failed: {0}")]
    Issuance(String),
}

/// External collaborators the transition service talks to after (or around) a commit.
#[derive(Clone)]
pub struct Gateways {
    pub mailer: Arc<dyn Mailer>,
    pub storage: Arc<dyn ObjectStorage>,
    pub queue: Arc<dyn TaskQueue>,
    pub vouchers: Arc<dyn VoucherIssuer>,
}
