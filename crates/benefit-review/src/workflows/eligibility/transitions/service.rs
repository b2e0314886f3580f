use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, warn};

use super::attachment::{attach_and_verify, normalize, AttachmentError, CertificationInput};
use super::outcome::{SideEffect, TransitionOutcome};
use crate::clock::Clock;
use crate::config::ReviewPolicy;
use crate::workflows::eligibility::audit::AuditEventRecorder;
use crate::workflows::eligibility::domain::{
    non_blank, Application, ApplicationId, ApplicationStatus, AttachmentRef, CertificationStatus,
    Metadata, ProofType, ReviewDecision, SubjectRef, SubmissionMethod, User,
};
use crate::workflows::eligibility::gateways::{Gateways, QueuedTask};
use crate::workflows::eligibility::notifications::{
    DeliveryOutcome, Dispatch, NotificationAction, NotificationBuilder, NotificationConfig,
    NotificationError, NotificationMode, NotificationOrchestrator,
};
use crate::workflows::eligibility::records::{
    NewNote, NewProofReview, NewStatusChange, Notification, ProofReview, CERTIFICATION_CHANGE_TYPE,
    CHANGE_TYPE_KEY,
};
use crate::workflows::eligibility::repository::{
    EligibilityRepository, RecordWriter, RepositoryError,
};

pub const PROVIDER_EMAIL_REQUIRED: &str = "Medical provider email is required";
pub const MAX_CERTIFICATION_REQUESTS_REACHED: &str = "Maximum certification requests reached";
pub const AUTO_APPROVAL_EFFECT: &str = "application_auto_approved";

/// Failures inside a transition. Converted to a [`TransitionOutcome`] at the operation
/// boundary; only [`TransitionError::Validation`] text is shown to users verbatim.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

impl TransitionError {
    fn validation(message: impl Into<String>) -> Self {
        TransitionError::Validation(message.into())
    }

    fn user_message(&self, fallback: &str) -> String {
        match self {
            TransitionError::Validation(message) => message.clone(),
            TransitionError::Repository(RepositoryError::NotFound) => {
                "Application not found".to_string()
            }
            TransitionError::Attachment(
                error @ (AttachmentError::Unrecognized | AttachmentError::NotVisible),
            ) => error.to_string(),
            TransitionError::Repository(_) | TransitionError::Attachment(_) => {
                fallback.to_string()
            }
        }
    }
}

/// Raised by [`StatusTransitionService::review_proof`] so callers can render form feedback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofReviewError {
    #[error("Invalid proof type: {0}")]
    InvalidProofType(String),
    #[error("Invalid proof review status: {0}")]
    InvalidStatus(String),
    #[error("Please select a reason for rejection")]
    MissingRejectionReason,
    #[error("Application not found")]
    ApplicationNotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of a successful proof review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewedProof {
    pub review: ProofReview,
    pub application: Application,
    pub outcome: TransitionOutcome,
}

struct StagedNotification {
    config: NotificationConfig,
    notification: Notification,
}

/// Applies state changes to the proof, certification, and overall status dimensions of an
/// application. State fields, status-change rows, and audit events for one transition are
/// written in a single transaction; email delivery and queued work happen after commit.
pub struct StatusTransitionService<R> {
    repository: Arc<R>,
    recorder: AuditEventRecorder,
    notifications: NotificationOrchestrator<R>,
    gateways: Gateways,
    clock: Arc<dyn Clock>,
    policy: ReviewPolicy,
}

impl<R> StatusTransitionService<R>
where
    R: EligibilityRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        gateways: Gateways,
        clock: Arc<dyn Clock>,
        policy: ReviewPolicy,
        system_actor: User,
        mode: NotificationMode,
    ) -> Self {
        let recorder = AuditEventRecorder::new(clock.clone(), &policy);
        let notifications = NotificationOrchestrator::new(
            repository.clone(),
            gateways.mailer.clone(),
            recorder.clone(),
            clock.clone(),
            system_actor,
            mode,
        );

        Self {
            repository,
            recorder,
            notifications,
            gateways,
            clock,
            policy,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn notifications(&self) -> &NotificationOrchestrator<R> {
        &self.notifications
    }

    pub fn recorder(&self) -> &AuditEventRecorder {
        &self.recorder
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    /// Approve the application and issue a voucher when the issuer deems it eligible.
    pub fn approve(&self, application_id: &ApplicationId, actor: &User) -> TransitionOutcome {
        let started = Instant::now();
        let result = self.try_approve(application_id, actor);
        conclude(
            "approve",
            application_id,
            started,
            result,
            "Failed to approve application",
        )
    }

    fn try_approve(
        &self,
        application_id: &ApplicationId,
        actor: &User,
    ) -> Result<Vec<SideEffect>, TransitionError> {
        let (application, mut effects) = self.change_overall_status(
            application_id,
            actor,
            ApplicationStatus::Approved,
            "application_approved",
            NotificationAction::ApplicationApproved,
        )?;

        match self.gateways.vouchers.issue_if_eligible(&application) {
            Ok(Some(code)) => {
                info!(application_id = %application.id, voucher = %code, "voucher issued");
                effects.push(SideEffect::completed("voucher"));
            }
            Ok(None) => {}
            Err(error) => {
                warn!(
                    application_id = %application.id,
                    error = %error,
                    "voucher issuance failed after approval"
                );
                effects.push(SideEffect::failed("voucher", error));
            }
        }

        Ok(effects)
    }

    pub fn reject(&self, application_id: &ApplicationId, actor: &User) -> TransitionOutcome {
        let started = Instant::now();
        let result = self
            .change_overall_status(
                application_id,
                actor,
                ApplicationStatus::Rejected,
                "application_rejected",
                NotificationAction::ApplicationRejected,
            )
            .map(|(_, effects)| effects);
        conclude(
            "reject",
            application_id,
            started,
            result,
            "Failed to reject application",
        )
    }

    pub fn request_documents(
        &self,
        application_id: &ApplicationId,
        actor: &User,
    ) -> TransitionOutcome {
        let started = Instant::now();
        let result = self
            .change_overall_status(
                application_id,
                actor,
                ApplicationStatus::AwaitingDocuments,
                "documents_requested",
                NotificationAction::DocumentsRequested,
            )
            .map(|(_, effects)| effects);
        conclude(
            "request_documents",
            application_id,
            started,
            result,
            "Failed to request documents",
        )
    }

    fn change_overall_status(
        &self,
        application_id: &ApplicationId,
        actor: &User,
        to: ApplicationStatus,
        event: &str,
        notify: NotificationAction,
    ) -> Result<(Application, Vec<SideEffect>), TransitionError> {
        let now = self.clock.now();
        let (application, staged, mut effects) =
            self.repository.transaction::<_, TransitionError, _>(|tx| {
                let mut application = load_application(tx, application_id)?;
                let from = application.status;
                application.status = to;
                application.updated_at = now;
                tx.save_application(&application)?;

                let mut metadata = Metadata::new();
                put(&mut metadata, "from_status", from.label());
                put(&mut metadata, "to_status", to.label());
                self.recorder.log(
                    tx,
                    event,
                    Some(&actor.id),
                    &application.subject(),
                    metadata,
                    Some(now),
                )?;

                let applicant = tx.find_user(&application.applicant_id)?;
                let mut effects = Vec::new();
                let staged = self.stage_notification(
                    tx,
                    notify,
                    |builder| {
                        with_recipient(builder, applicant)
                            .actor(actor.clone())
                            .notifiable(application.subject())
                            .with_metadata("application_id", application.id.0.clone())
                    },
                    &mut effects,
                )?;
                Ok((application, staged, effects))
            })?;

        self.deliver_staged(staged, &mut effects);
        Ok((application, effects))
    }

    /// Record an administrator's decision on one proof. Errors are returned to the caller
    /// rather than folded into a [`TransitionOutcome`].
    pub fn review_proof(
        &self,
        application_id: &ApplicationId,
        admin: &User,
        proof_type: &str,
        status: &str,
        rejection_reason: Option<&str>,
        notes: Option<&str>,
    ) -> Result<ReviewedProof, ProofReviewError> {
        let started = Instant::now();
        let result = self.try_review_proof(
            application_id,
            admin,
            proof_type,
            status,
            rejection_reason,
            notes,
            started,
        );
        match &result {
            Ok(reviewed) => info!(
                application_id = %application_id,
                proof_type = reviewed.review.proof_type.label(),
                status = reviewed.review.status.label(),
                "proof reviewed"
            ),
            Err(error) => error!(
                application_id = %application_id,
                proof_type,
                status,
                error = %error,
                "proof review failed"
            ),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn try_review_proof(
        &self,
        application_id: &ApplicationId,
        admin: &User,
        proof_type: &str,
        status: &str,
        rejection_reason: Option<&str>,
        notes: Option<&str>,
        started: Instant,
    ) -> Result<ReviewedProof, ProofReviewError> {
        let proof_type = proof_type
            .parse::<ProofType>()
            .map_err(|_| ProofReviewError::InvalidProofType(proof_type.trim().to_string()))?;
        let decision = status
            .parse::<ReviewDecision>()
            .map_err(|_| ProofReviewError::InvalidStatus(status.trim().to_string()))?;
        let rejection_reason = non_blank(rejection_reason).map(str::to_string);
        if decision == ReviewDecision::Rejected && rejection_reason.is_none() {
            return Err(ProofReviewError::MissingRejectionReason);
        }
        let notes = non_blank(notes).map(str::to_string);
        let now = self.clock.now();
        let max_rejections = self.policy.max_proof_rejections;

        let (review, application, staged, mut effects) =
            self.repository.transaction::<_, ProofReviewError, _>(|tx| {
                let mut application = tx
                    .find_application(application_id)?
                    .ok_or(ProofReviewError::ApplicationNotFound)?;

                let review = tx.insert_proof_review(NewProofReview {
                    application_id: application.id.clone(),
                    admin_id: admin.id.clone(),
                    proof_type,
                    status: decision,
                    rejection_reason: rejection_reason.clone(),
                    notes: notes.clone(),
                    reviewed_at: now,
                })?;

                let from = application.proof_status(proof_type);
                application.set_proof_status(proof_type, decision.as_proof_status());
                let mut archived = false;
                if decision == ReviewDecision::Rejected {
                    application.total_rejections += 1;
                    if application.total_rejections >= max_rejections
                        && application.status != ApplicationStatus::Archived
                    {
                        application.status = ApplicationStatus::Archived;
                        archived = true;
                    }
                }
                application.updated_at = now;
                tx.save_application(&application)?;

                let mut details = Metadata::new();
                put(&mut details, "application_id", application.id.0.clone());
                put(&mut details, "proof_type", proof_type.label());
                put(&mut details, "proof_review_id", review.id.0.clone());
                if let Some(reason) = &rejection_reason {
                    put(&mut details, "rejection_reason", reason.clone());
                }

                let mut change = details.clone();
                put(
                    &mut change,
                    CHANGE_TYPE_KEY,
                    format!("{}_proof", proof_type.label()),
                );
                tx.insert_status_change(NewStatusChange {
                    application_id: application.id.clone(),
                    user_id: admin.id.clone(),
                    from_status: from.label().to_string(),
                    to_status: decision.label().to_string(),
                    metadata: change,
                    notes: notes.clone(),
                    created_at: now,
                })?;

                let event = match decision {
                    ReviewDecision::Approved => "proof_approved",
                    ReviewDecision::Rejected => "proof_rejected",
                };
                self.recorder.log(
                    tx,
                    event,
                    Some(&admin.id),
                    &application.subject(),
                    details.clone(),
                    Some(now),
                )?;

                let applicant = tx.find_user(&application.applicant_id)?;
                let mut effects = Vec::new();
                let mut staged = Vec::new();
                let notify = match decision {
                    ReviewDecision::Approved => NotificationAction::ProofApproved,
                    ReviewDecision::Rejected => NotificationAction::proof_rejected_for(proof_type),
                };
                staged.extend(self.stage_notification(
                    tx,
                    notify,
                    |builder| {
                        with_recipient(builder, applicant.clone())
                            .actor(admin.clone())
                            .notifiable(SubjectRef::proof_review(&review.id))
                            .metadata(details.clone())
                            .audit(true)
                    },
                    &mut effects,
                )?);

                if archived {
                    let mut limit = Metadata::new();
                    put(&mut limit, "application_id", application.id.0.clone());
                    put(&mut limit, "total_rejections", application.total_rejections);
                    put(&mut limit, "max_rejections", max_rejections);
                    self.recorder.log(
                        tx,
                        "max_rejections_reached",
                        Some(&admin.id),
                        &application.subject(),
                        limit.clone(),
                        Some(now),
                    )?;
                    staged.extend(self.stage_notification(
                        tx,
                        NotificationAction::MaxRejectionsReached,
                        |builder| {
                            with_recipient(builder, applicant)
                                .actor(admin.clone())
                                .notifiable(application.subject())
                                .metadata(limit)
                        },
                        &mut effects,
                    )?);
                    warn!(
                        application_id = %application.id,
                        total_rejections = application.total_rejections,
                        "application archived after reaching the proof rejection limit"
                    );
                }

                Ok((review, application, staged, effects))
            })?;

        for notification in staged {
            self.deliver_staged(Some(notification), &mut effects);
        }
        if decision == ReviewDecision::Approved {
            effects.extend(self.auto_approve_if_complete(&application, admin));
        }

        Ok(ReviewedProof {
            review,
            application,
            outcome: TransitionOutcome::succeeded(started, effects),
        })
    }

    /// Ask the applicant's medical provider for a certification. The provider email itself
    /// goes out through the task queue once the request has committed.
    pub fn request_certification(
        &self,
        application_id: &ApplicationId,
        actor: &User,
    ) -> TransitionOutcome {
        let started = Instant::now();
        let result = self.try_request_certification(application_id, actor);
        conclude(
            "request_certification",
            application_id,
            started,
            result,
            "Failed to request medical certification",
        )
    }

    fn try_request_certification(
        &self,
        application_id: &ApplicationId,
        actor: &User,
    ) -> Result<Vec<SideEffect>, TransitionError> {
        let now = self.clock.now();
        let max_requests = self.policy.max_certification_requests;

        let application = self.repository.transaction::<_, TransitionError, _>(|tx| {
            let mut application = load_application(tx, application_id)?;
            if application.medical_provider.email().is_none() {
                return Err(TransitionError::validation(PROVIDER_EMAIL_REQUIRED));
            }

            let from = application.medical_certification_status;
            if !from.can_transition_to(CertificationStatus::Requested) {
                return Err(match from {
                    CertificationStatus::Approved => {
                        TransitionError::validation("Medical certification has already been approved")
                    }
                    other => TransitionError::Validation(format!(
                        "Medical certification cannot be requested while it is {}",
                        other.label()
                    )),
                });
            }
            if application.certification_request_count >= max_requests {
                return Err(TransitionError::validation(
                    MAX_CERTIFICATION_REQUESTS_REACHED,
                ));
            }

            application.medical_certification_status = CertificationStatus::Requested;
            application.medical_certification_requested_at = Some(now);
            application.certification_request_count += 1;
            application.updated_at = now;
            tx.save_application(&application)?;

            let mut details = provider_details(&application);
            put(
                &mut details,
                "request_count",
                application.certification_request_count,
            );

            let mut change = details.clone();
            put(&mut change, CHANGE_TYPE_KEY, CERTIFICATION_CHANGE_TYPE);
            tx.insert_status_change(NewStatusChange {
                application_id: application.id.clone(),
                user_id: actor.id.clone(),
                from_status: from.label().to_string(),
                to_status: CertificationStatus::Requested.label().to_string(),
                metadata: change,
                notes: None,
                created_at: now,
            })?;

            self.recorder.log(
                tx,
                "medical_certification_requested",
                Some(&actor.id),
                &application.subject(),
                details,
                Some(now),
            )?;
            Ok(application)
        })?;

        let mut effects = Vec::new();
        let request_count = application.certification_request_count;
        let notification_name = notification_effect(&NotificationAction::MedicalCertification(
            CertificationStatus::Requested.label().to_string(),
        ));
        let notification_id = match self.request_notification(&application, actor) {
            Ok(dispatch) => {
                effects.push(SideEffect::completed(notification_name));
                Some(dispatch.notification.id)
            }
            Err(error) => {
                warn!(
                    application_id = %application.id,
                    error = %error,
                    "certification request notification failed"
                );
                effects.push(SideEffect::failed(notification_name, error));
                None
            }
        };

        let task = QueuedTask::ProviderCertificationRequest {
            application_id: application.id.clone(),
            notification_id,
            request_count,
        };
        match self.gateways.queue.enqueue(task) {
            Ok(()) => effects.push(SideEffect::completed("provider_email")),
            Err(error) => {
                warn!(
                    application_id = %application.id,
                    error = %error,
                    "could not enqueue provider certification email"
                );
                effects.push(SideEffect::failed("provider_email", error));
            }
        }

        Ok(effects)
    }

    fn request_notification(
        &self,
        application: &Application,
        actor: &User,
    ) -> Result<Dispatch, NotificationError> {
        let applicant = self
            .repository
            .find_user(&application.applicant_id)?
            .ok_or(RepositoryError::NotFound)?;

        let mut metadata = provider_details(application);
        put(
            &mut metadata,
            "request_count",
            application.certification_request_count,
        );
        if let Some(email) = application.medical_provider.email() {
            put(&mut metadata, "provider_email", email);
        }

        let config = self
            .notifications
            .builder()
            .action(NotificationAction::MedicalCertification(
                CertificationStatus::Requested.label().to_string(),
            ))
            .recipient(applicant)
            .actor(actor.clone())
            .notifiable(application.subject())
            .metadata(metadata)
            .deliver(false)
            .finalize()?;
        self.notifications.send(config)
    }

    /// Reject the submitted certification. The rejection commits before the optional note
    /// is written; a failed note is reported as a side effect and the rejection stands.
    pub fn reject_certification(
        &self,
        application_id: &ApplicationId,
        admin: Option<&User>,
        reason: &str,
        notes: Option<&str>,
    ) -> TransitionOutcome {
        let started = Instant::now();
        let result = self.try_reject_certification(application_id, admin, reason, notes);
        conclude(
            "reject_certification",
            application_id,
            started,
            result,
            "Failed to reject medical certification",
        )
    }

    fn try_reject_certification(
        &self,
        application_id: &ApplicationId,
        admin: Option<&User>,
        reason: &str,
        notes: Option<&str>,
    ) -> Result<Vec<SideEffect>, TransitionError> {
        let admin = admin.ok_or_else(|| TransitionError::validation("Admin user is required"))?;
        let reason = non_blank(Some(reason))
            .ok_or_else(|| TransitionError::validation("Rejection reason is required"))?;

        let application = self
            .repository
            .find_application(application_id)?
            .ok_or(RepositoryError::NotFound)?;
        if !application.medical_provider.has_contact_channel() {
            return Err(TransitionError::validation(
                "Medical provider contact information (email or fax) is required",
            ));
        }

        let mut metadata = Metadata::new();
        put(&mut metadata, "rejection_reason", reason);
        if let Some(notes) = non_blank(notes) {
            put(&mut metadata, "notes", notes);
        }
        let mut effects = self.apply_certification(
            application_id,
            CertificationStatus::Rejected,
            admin,
            None,
            metadata,
            None,
        )?;

        if let Some(body) = non_blank(notes) {
            let now = self.clock.now();
            let saved = self.repository.transaction(|tx| {
                tx.insert_note(NewNote {
                    application_id: application_id.clone(),
                    author_id: admin.id.clone(),
                    body: body.to_string(),
                    created_at: now,
                })
            });
            match saved {
                Ok(_) => effects.push(SideEffect::completed("note")),
                Err(error) => {
                    warn!(
                        application_id = %application_id,
                        error = %error,
                        "certification rejected but the reviewer note was not saved"
                    );
                    effects.push(SideEffect::failed("note", error));
                }
            }
        }

        Ok(effects)
    }

    /// Store the document, confirm storage can serve it, then move the certification status.
    pub fn attach_certification(
        &self,
        application_id: &ApplicationId,
        input: CertificationInput,
        status: CertificationStatus,
        admin: &User,
        submission_method: SubmissionMethod,
        metadata: Metadata,
    ) -> TransitionOutcome {
        let started = Instant::now();
        let result = self.try_attach_certification(
            application_id,
            input,
            status,
            admin,
            submission_method,
            metadata,
        );
        conclude(
            "attach_certification",
            application_id,
            started,
            result,
            "Failed to process medical certification",
        )
    }

    fn try_attach_certification(
        &self,
        application_id: &ApplicationId,
        input: CertificationInput,
        status: CertificationStatus,
        admin: &User,
        submission_method: SubmissionMethod,
        metadata: Metadata,
    ) -> Result<Vec<SideEffect>, TransitionError> {
        let current = self
            .repository
            .find_application(application_id)?
            .ok_or(RepositoryError::NotFound)?;
        if status == CertificationStatus::Requested {
            return Err(TransitionError::validation(
                "An attached certification cannot be marked as requested",
            ));
        }
        ensure_certification_transition(current.medical_certification_status, status)?;
        ensure_reason(status, &metadata)?;

        let storage = self.gateways.storage.as_ref();
        let attachment = normalize(storage, input)?;
        attach_and_verify(storage, application_id, &attachment)?;

        self.apply_certification(
            application_id,
            status,
            admin,
            Some(submission_method),
            metadata,
            Some(attachment),
        )
    }

    pub fn update_certification_status_only(
        &self,
        application_id: &ApplicationId,
        status: CertificationStatus,
        admin: &User,
        submission_method: Option<SubmissionMethod>,
        metadata: Metadata,
    ) -> TransitionOutcome {
        let started = Instant::now();
        let result = if status == CertificationStatus::Requested {
            self.try_request_certification(application_id, admin)
        } else {
            self.apply_certification(
                application_id,
                status,
                admin,
                submission_method,
                metadata,
                None,
            )
        };
        conclude(
            "update_certification_status",
            application_id,
            started,
            result,
            "Failed to update medical certification status",
        )
    }

    fn apply_certification(
        &self,
        application_id: &ApplicationId,
        status: CertificationStatus,
        admin: &User,
        submission_method: Option<SubmissionMethod>,
        metadata: Metadata,
        attachment: Option<AttachmentRef>,
    ) -> Result<Vec<SideEffect>, TransitionError> {
        let rejection_reason = ensure_reason(status, &metadata)?;
        let now = self.clock.now();

        let (application, staged, mut effects) =
            self.repository.transaction::<_, TransitionError, _>(|tx| {
                let mut application = load_application(tx, application_id)?;
                let from = application.medical_certification_status;
                ensure_certification_transition(from, status)?;

                application.medical_certification_status = status;
                match status {
                    CertificationStatus::Requested => {
                        application.medical_certification_requested_at = Some(now)
                    }
                    CertificationStatus::Received => {
                        application.medical_certification_received_at = Some(now)
                    }
                    CertificationStatus::Approved => {
                        application.medical_certification_verified_at = Some(now);
                        application.medical_certification_rejection_reason = None;
                    }
                    CertificationStatus::Rejected => {
                        application.medical_certification_rejection_reason =
                            rejection_reason.clone()
                    }
                    CertificationStatus::NotRequested => {}
                }
                if let Some(attachment) = &attachment {
                    application.medical_certification = Some(attachment.clone());
                }
                application.updated_at = now;
                tx.save_application(&application)?;

                let mut details = metadata.clone();
                details.extend(provider_details(&application));
                if let Some(method) = submission_method {
                    put(&mut details, "submission_method", method.label());
                }
                if let Some(attachment) = &attachment {
                    put(&mut details, "blob_key", attachment.blob_key.clone());
                    if let Some(filename) = &attachment.filename {
                        put(&mut details, "filename", filename.clone());
                    }
                }
                let notes = details
                    .get("notes")
                    .and_then(Value::as_str)
                    .and_then(|notes| non_blank(Some(notes)))
                    .map(str::to_string);

                let mut change = details.clone();
                put(&mut change, CHANGE_TYPE_KEY, CERTIFICATION_CHANGE_TYPE);
                tx.insert_status_change(NewStatusChange {
                    application_id: application.id.clone(),
                    user_id: admin.id.clone(),
                    from_status: from.label().to_string(),
                    to_status: status.label().to_string(),
                    metadata: change,
                    notes,
                    created_at: now,
                })?;

                let action = NotificationAction::MedicalCertification(status.label().to_string());
                let mut audit = details.clone();
                put(&mut audit, "old_status", from.label());
                put(&mut audit, "new_status", status.label());
                self.recorder.log(
                    tx,
                    &action.as_str(),
                    Some(&admin.id),
                    &application.subject(),
                    audit,
                    Some(now),
                )?;

                let mut notice = details;
                if let Some(email) = application.medical_provider.email() {
                    put(&mut notice, "provider_email", email);
                }
                let applicant = tx.find_user(&application.applicant_id)?;
                let mut effects = Vec::new();
                let staged = self.stage_notification(
                    tx,
                    action,
                    |builder| {
                        with_recipient(builder, applicant)
                            .actor(admin.clone())
                            .notifiable(application.subject())
                            .metadata(notice)
                    },
                    &mut effects,
                )?;
                Ok((application, staged, effects))
            })?;

        self.deliver_staged(staged, &mut effects);
        if status == CertificationStatus::Approved {
            effects.extend(self.auto_approve_if_complete(&application, admin));
        }
        Ok(effects)
    }

    /// Create a notification inside the transition's transaction. Validation failures and
    /// rejected records are absorbed as side effects; storage failures abort the transaction.
    fn stage_notification<F>(
        &self,
        tx: &mut dyn RecordWriter,
        action: NotificationAction,
        build: F,
        effects: &mut Vec<SideEffect>,
    ) -> Result<Option<StagedNotification>, RepositoryError>
    where
        F: FnOnce(NotificationBuilder) -> NotificationBuilder,
    {
        let name = notification_effect(&action);
        let config = match build(self.notifications.builder().action(action)).finalize() {
            Ok(config) => config,
            Err(error) => {
                warn!(notification = %name, error = %error, "notification not created");
                effects.push(SideEffect::failed(name, error));
                return Ok(None);
            }
        };

        match self.notifications.create(tx, &config) {
            Ok(notification) => Ok(Some(StagedNotification {
                config,
                notification,
            })),
            Err(error) if is_record_rejection(&error) => {
                warn!(notification = %name, error = %error, "notification not created");
                effects.push(SideEffect::failed(name, error));
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn deliver_staged(&self, staged: Option<StagedNotification>, effects: &mut Vec<SideEffect>) {
        let Some(StagedNotification {
            config,
            notification,
        }) = staged
        else {
            return;
        };

        let name = notification_effect(&config.action);
        match self.notifications.deliver(notification, &config).delivery {
            DeliveryOutcome::Delivered | DeliveryOutcome::NotAttempted => {
                effects.push(SideEffect::completed(name))
            }
            DeliveryOutcome::Failed(failure) => effects.push(SideEffect::failed(name, failure)),
        }
    }

    /// Approve the application once every proof and the certification are approved.
    fn auto_approve_if_complete(&self, application: &Application, actor: &User) -> Vec<SideEffect> {
        if !application.all_requirements_approved()
            || application.status == ApplicationStatus::Approved
        {
            return Vec::new();
        }

        info!(application_id = %application.id, "all requirements approved; approving application");
        let outcome = self.approve(&application.id, actor);
        let mut effects = outcome.side_effects;
        effects.push(match outcome.error {
            None if outcome.success => SideEffect::completed(AUTO_APPROVAL_EFFECT),
            error => SideEffect::failed(AUTO_APPROVAL_EFFECT, error.unwrap_or_default()),
        });
        effects
    }
}

fn conclude(
    operation: &'static str,
    application_id: &ApplicationId,
    started: Instant,
    result: Result<Vec<SideEffect>, TransitionError>,
    fallback: &str,
) -> TransitionOutcome {
    match result {
        Ok(effects) => {
            info!(
                operation,
                application_id = %application_id,
                side_effects = effects.len(),
                "transition completed"
            );
            TransitionOutcome::succeeded(started, effects)
        }
        Err(TransitionError::Validation(message)) => {
            warn!(
                operation,
                application_id = %application_id,
                error = %message,
                "transition rejected"
            );
            TransitionOutcome::failed(started, message)
        }
        Err(failure) => {
            error!(
                operation,
                application_id = %application_id,
                error = %failure,
                "transition failed"
            );
            TransitionOutcome::failed(started, failure.user_message(fallback))
        }
    }
}

fn load_application(
    tx: &dyn RecordWriter,
    application_id: &ApplicationId,
) -> Result<Application, RepositoryError> {
    tx.find_application(application_id)?
        .ok_or(RepositoryError::NotFound)
}

fn ensure_certification_transition(
    from: CertificationStatus,
    to: CertificationStatus,
) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError::Validation(format!(
            "Cannot change medical certification from {} to {}",
            from.label(),
            to.label()
        )))
    }
}

fn ensure_reason(
    status: CertificationStatus,
    metadata: &Metadata,
) -> Result<Option<String>, TransitionError> {
    let reason = metadata
        .get("rejection_reason")
        .and_then(Value::as_str)
        .and_then(|reason| non_blank(Some(reason)))
        .map(str::to_string);
    if status.requires_reason() && reason.is_none() {
        return Err(TransitionError::validation("Rejection reason is required"));
    }
    Ok(reason)
}

fn provider_details(application: &Application) -> Metadata {
    let mut details = Metadata::new();
    put(&mut details, "application_id", application.id.0.clone());
    if let Some(name) = non_blank(Some(application.medical_provider.name.as_str())) {
        put(&mut details, "provider_name", name);
    }
    details
}

fn with_recipient(builder: NotificationBuilder, recipient: Option<User>) -> NotificationBuilder {
    match recipient {
        Some(recipient) => builder.recipient(recipient),
        None => builder,
    }
}

fn notification_effect(action: &NotificationAction) -> String {
    format!("notification:{action}")
}

/// The store refused this particular record; the rest of the transaction is still sound.
fn is_record_rejection(error: &RepositoryError) -> bool {
    matches!(
        error,
        RepositoryError::Invalid(_) | RepositoryError::StaleReference { .. } | RepositoryError::NotFound
    )
}

fn put(metadata: &mut Metadata, key: &str, value: impl Into<Value>) {
    metadata.insert(key.to_string(), value.into());
}
