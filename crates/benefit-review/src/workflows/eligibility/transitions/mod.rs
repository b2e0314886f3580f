//! Status transitions for the proof, certification, and overall application dimensions.

mod attachment;
mod outcome;
mod service;

pub use attachment::{AttachmentError, CertificationInput};
pub use outcome::{SideEffect, TransitionOutcome};
pub use service::{
    ProofReviewError, ReviewedProof, StatusTransitionService, TransitionError,
    AUTO_APPROVAL_EFFECT, MAX_CERTIFICATION_REQUESTS_REACHED, PROVIDER_EMAIL_REQUIRED,
};
