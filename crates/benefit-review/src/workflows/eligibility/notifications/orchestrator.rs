use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::action::NotificationAction;
use super::builder::{
    has_temp_password, NotificationBuilder, NotificationChannel, NotificationConfig,
    NotificationMode, NotificationValidationError, TEMP_PASSWORD_KEY,
};
use super::composer::compose;
use super::mailer::{resolve_route, UnroutableAction};
use crate::clock::Clock;
use crate::workflows::eligibility::audit::AuditEventRecorder;
use crate::workflows::eligibility::domain::{
    non_blank, Metadata, NotificationId, SubjectKind, SubjectRef, User, UserKind,
};
use crate::workflows::eligibility::gateways::{
    MailError, MailMessage, Mailer, QueuedTask, TemplateGroup,
};
use crate::workflows::eligibility::records::{
    DeliveryStatus, Event, NewNotification, Notification, NotificationPatch,
};
use crate::workflows::eligibility::repository::{
    EligibilityRepository, RecordWriter, RepositoryError,
};

pub const DELIVERY_ERROR_KEY: &str = "delivery_error";

/// Why an attempted delivery did not reach the mail transport or was refused by it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("delivery contract violated: {0}")]
    Contract(String),
    #[error(transparent)]
    Unroutable(#[from] UnroutableAction),
    #[error("recipient has no email address")]
    MissingAddress,
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error("delivery lookup failed: {0}")]
    Lookup(RepositoryError),
}

/// Outcome of the delivery step for a persisted notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(DeliveryFailure),
    /// Delivery was never attempted (non-email channel or `deliver(false)`).
    NotAttempted,
}

impl DeliveryOutcome {
    /// Suffix for the audit event recorded when the notification asked for auditing.
    pub const fn audit_suffix(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "sent",
            DeliveryOutcome::Failed(_) => "failed",
            DeliveryOutcome::NotAttempted => "created",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Persisted notification plus what happened when it was delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub notification: Notification,
    pub delivery: DeliveryOutcome,
    pub audit_event: Option<Event>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotificationError {
    #[error(transparent)]
    Validation(#[from] NotificationValidationError),
    #[error("notification could not be saved: {0}")]
    Repository(#[from] RepositoryError),
    #[error("notification {0} not found")]
    NotFound(NotificationId),
}

/// Creates notifications under validation, enforces the per-action delivery contract,
/// and records what delivery actually did.
pub struct NotificationOrchestrator<R> {
    repository: Arc<R>,
    mailer: Arc<dyn Mailer>,
    recorder: AuditEventRecorder,
    clock: Arc<dyn Clock>,
    system_actor: User,
    mode: NotificationMode,
}

impl<R> NotificationOrchestrator<R>
where
    R: EligibilityRepository,
{
    pub fn new(
        repository: Arc<R>,
        mailer: Arc<dyn Mailer>,
        recorder: AuditEventRecorder,
        clock: Arc<dyn Clock>,
        system_actor: User,
        mode: NotificationMode,
    ) -> Self {
        Self {
            repository,
            mailer,
            recorder,
            clock,
            system_actor,
            mode,
        }
    }

    pub fn builder(&self) -> NotificationBuilder {
        NotificationBuilder::new(self.system_actor.clone(), self.mode)
    }

    pub fn system_actor(&self) -> &User {
        &self.system_actor
    }

    /// Persist `config` through `writer`. A stale notifiable is reloaded and the insert
    /// retried once; any other failure is returned as is.
    pub fn create(
        &self,
        writer: &mut dyn RecordWriter,
        config: &NotificationConfig,
    ) -> Result<Notification, RepositoryError> {
        let record = NewNotification {
            recipient_id: config.recipient.id.clone(),
            actor_id: config.actor.id.clone(),
            action: config.action.as_str().into_owned(),
            notifiable: config.notifiable.clone(),
            metadata: config.metadata.clone(),
            created_at: self.clock.now(),
        };

        match writer.insert_notification(record.clone()) {
            Err(error) if error.is_stale_reference() => {
                let Some(stale) = record.notifiable.as_ref() else {
                    return Err(error);
                };
                match writer.reload_subject(stale)? {
                    Some(fresh) => {
                        info!(
                            action = %config.action,
                            notifiable = %fresh,
                            "retrying notification after reloading stale notifiable"
                        );
                        writer.insert_notification(NewNotification {
                            notifiable: Some(fresh),
                            ..record
                        })
                    }
                    None => Err(error),
                }
            }
            other => other,
        }
    }

    /// Create in a transaction of its own, then deliver.
    pub fn send(&self, config: NotificationConfig) -> Result<Dispatch, NotificationError> {
        let notification = self
            .repository
            .transaction(|tx| self.create(tx, &config))?;
        Ok(self.deliver(notification, &config))
    }

    /// Run the delivery contract, send through the mailer, and record the outcome on the
    /// notification. Never fails; bookkeeping errors are logged.
    pub fn deliver(&self, notification: Notification, config: &NotificationConfig) -> Dispatch {
        let delivery = if config.is_deliverable() {
            match self.attempt(&notification, config) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(failure) => DeliveryOutcome::Failed(failure),
            }
        } else {
            DeliveryOutcome::NotAttempted
        };

        let notification = self.record_outcome(notification, config, &delivery);
        let audit_event = if config.audit {
            self.audit_outcome(&notification, config, &delivery)
        } else {
            None
        };

        Dispatch {
            notification,
            delivery,
            audit_event,
        }
    }

    fn attempt(
        &self,
        notification: &Notification,
        config: &NotificationConfig,
    ) -> Result<(), DeliveryFailure> {
        self.check_contract(notification, config)?;
        let route = resolve_route(&config.action)?;

        let address = match route.template_group {
            TemplateGroup::MedicalProvider => text(&notification.metadata, "provider_email")
                .or_else(|| text(&config.metadata, "provider_email")),
            TemplateGroup::ApplicationNotifications => {
                non_blank(Some(config.recipient.email.as_str()))
            }
        }
        .ok_or(DeliveryFailure::MissingAddress)?
        .to_string();

        let mut data = notification.metadata.clone();
        data.insert(
            "notification_id".to_string(),
            Value::String(notification.id.0.clone()),
        );
        data.insert(
            "recipient_name".to_string(),
            Value::String(config.recipient.full_name()),
        );
        data.insert(
            "text".to_string(),
            Value::String(compose(
                &notification.action,
                notification.notifiable.as_ref(),
                Some(&config.actor),
                &notification.metadata,
            )),
        );

        self.mailer.deliver(MailMessage {
            template_group: route.template_group,
            message: route.message,
            recipient: address,
            data,
        })?;
        Ok(())
    }

    fn check_contract(
        &self,
        notification: &Notification,
        config: &NotificationConfig,
    ) -> Result<(), DeliveryFailure> {
        if config.action.is_proof_review() {
            let references_review = matches!(
                notification.notifiable.as_ref().map(|subject| subject.kind),
                Some(SubjectKind::Application | SubjectKind::ProofReview)
            );
            if !references_review {
                return Err(DeliveryFailure::Contract(
                    "proof review notifications must reference an application or proof review"
                        .to_string(),
                ));
            }
            let actor = self
                .repository
                .find_user(&notification.actor_id)
                .map_err(DeliveryFailure::Lookup)?;
            if actor.is_none() {
                return Err(DeliveryFailure::Contract(
                    "proof review notifications require an actor".to_string(),
                ));
            }
        }

        if config.action == NotificationAction::AccountCreated {
            if config.recipient.kind != UserKind::Applicant {
                return Err(DeliveryFailure::Contract(
                    "account notifications must go to an applicant".to_string(),
                ));
            }
            if !has_temp_password(&notification.metadata) {
                return Err(DeliveryFailure::Contract(
                    "temporary password is missing".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn record_outcome(
        &self,
        notification: Notification,
        config: &NotificationConfig,
        delivery: &DeliveryOutcome,
    ) -> Notification {
        let id = notification.id.clone();
        let result = match delivery {
            DeliveryOutcome::NotAttempted => return notification,
            DeliveryOutcome::Delivered => {
                let mut patch = NotificationPatch::from(&notification);
                patch.delivery_status = DeliveryStatus::Delivered;
                patch.metadata.remove(TEMP_PASSWORD_KEY);
                self.repository
                    .transaction(|tx| tx.update_notification(&id, patch))
            }
            DeliveryOutcome::Failed(failure) => {
                warn!(
                    notification_id = %id,
                    action = %config.action,
                    error = %failure,
                    "notification delivery failed"
                );
                let mut patch = NotificationPatch::from(&notification);
                patch.delivery_status = DeliveryStatus::Error;
                patch.metadata.insert(
                    DELIVERY_ERROR_KEY.to_string(),
                    json!({
                        "channel": config.channel.label(),
                        "message": failure.to_string(),
                        "timestamp": self.clock.now().to_rfc3339(),
                    }),
                );
                self.repository.transaction(|tx| {
                    tx.update_notification_unchecked(&id, patch)?;
                    tx.find_notification(&id)?.ok_or(RepositoryError::NotFound)
                })
            }
        };

        match result {
            Ok(updated) => updated,
            Err(error) => {
                warn!(
                    notification_id = %id,
                    error = %error,
                    "could not record notification delivery outcome"
                );
                notification
            }
        }
    }

    fn audit_outcome(
        &self,
        notification: &Notification,
        config: &NotificationConfig,
        delivery: &DeliveryOutcome,
    ) -> Option<Event> {
        let action = format!("{}_{}", config.action, delivery.audit_suffix());
        let auditable = notification.notifiable.clone().unwrap_or(SubjectRef {
            kind: SubjectKind::Notification,
            id: notification.id.0.clone(),
        });

        let mut metadata = Metadata::new();
        metadata.insert(
            "notification_id".to_string(),
            Value::String(notification.id.0.clone()),
        );
        metadata.insert(
            "channel".to_string(),
            Value::String(config.channel.label().to_string()),
        );
        if let Some(application_id) = notification.metadata.get("application_id") {
            metadata.insert("application_id".to_string(), application_id.clone());
        }
        for key in ["provider_name", "submission_method"] {
            if let Some(value) = notification.metadata.get(key) {
                metadata.insert(key.to_string(), value.clone());
            }
        }
        if let DeliveryOutcome::Failed(failure) = delivery {
            metadata.insert("error".to_string(), Value::String(failure.to_string()));
        }

        match self.recorder.log_committed(
            self.repository.as_ref(),
            &action,
            Some(&config.actor.id),
            &auditable,
            metadata,
        ) {
            Ok(event) => event,
            Err(error) => {
                warn!(
                    notification_id = %notification.id,
                    action = %action,
                    error = %error,
                    "could not audit notification delivery"
                );
                None
            }
        }
    }

    /// Set `read_at` the first time the recipient opens the notification.
    pub fn mark_as_read(&self, id: &NotificationId) -> Result<Notification, NotificationError> {
        let now = self.clock.now();
        let notification = self.repository.transaction(|tx| {
            let Some(notification) = tx.find_notification(id)? else {
                return Ok(None);
            };
            if notification.read_at.is_some() {
                return Ok(Some(notification));
            }
            let mut patch = NotificationPatch::from(&notification);
            patch.read_at = Some(now);
            tx.update_notification_unchecked(id, patch)?;
            tx.find_notification(id)
        })?;
        notification.ok_or_else(|| NotificationError::NotFound(id.clone()))
    }

    /// Display text for a stored notification.
    pub fn render(&self, notification: &Notification) -> Result<String, NotificationError> {
        let actor = self.repository.find_user(&notification.actor_id)?;
        Ok(compose(
            &notification.action,
            notification.notifiable.as_ref(),
            actor.as_ref(),
            &notification.metadata,
        ))
    }

    /// Execute a queued provider email. Runs after the enqueuing transaction committed.
    pub fn perform_task(&self, task: &QueuedTask) -> Result<DeliveryOutcome, NotificationError> {
        match task {
            QueuedTask::ProviderCertificationRequest {
                application_id,
                notification_id,
                request_count,
            } => {
                let application = self
                    .repository
                    .find_application(application_id)?
                    .ok_or(RepositoryError::NotFound)?;
                let applicant = self
                    .repository
                    .find_user(&application.applicant_id)?
                    .ok_or(RepositoryError::NotFound)?;

                let stored = match notification_id {
                    Some(id) => self.repository.find_notification(id)?,
                    None => None,
                };
                if stored.as_ref().is_some_and(|notification| {
                    notification.delivery_status == DeliveryStatus::Delivered
                }) {
                    info!(
                        application_id = %application.id,
                        request_count,
                        "provider certification request already delivered"
                    );
                    return Ok(DeliveryOutcome::Delivered);
                }

                let mut metadata = stored
                    .as_ref()
                    .map(|notification| notification.metadata.clone())
                    .unwrap_or_default();
                metadata.insert(
                    "application_id".to_string(),
                    Value::String(application.id.0.clone()),
                );
                metadata.insert("request_count".to_string(), json!(request_count));
                metadata.insert(
                    "provider_name".to_string(),
                    Value::String(application.medical_provider.name.clone()),
                );
                if let Some(email) = application.medical_provider.email() {
                    metadata.insert(
                        "provider_email".to_string(),
                        Value::String(email.to_string()),
                    );
                }

                let actor = match stored.as_ref() {
                    Some(notification) => self
                        .repository
                        .find_user(&notification.actor_id)?
                        .unwrap_or_else(|| self.system_actor.clone()),
                    None => self.system_actor.clone(),
                };

                let config = self
                    .builder()
                    .action(NotificationAction::MedicalCertification(
                        "requested".to_string(),
                    ))
                    .recipient(applicant)
                    .actor(actor)
                    .notifiable(application.subject())
                    .metadata(metadata.clone())
                    .channel(NotificationChannel::Email.label())
                    .audit(true)
                    .finalize()?;

                let delivery = match stored {
                    Some(notification) => self.deliver(notification, &config).delivery,
                    None => match self.attempt_untracked(&config, metadata) {
                        Ok(()) => DeliveryOutcome::Delivered,
                        Err(failure) => {
                            warn!(
                                application_id = %application.id,
                                error = %failure,
                                "provider certification email failed"
                            );
                            DeliveryOutcome::Failed(failure)
                        }
                    },
                };

                info!(
                    application_id = %application.id,
                    request_count,
                    delivered = delivery.is_delivered(),
                    "processed provider certification request"
                );
                Ok(delivery)
            }
        }
    }

    fn attempt_untracked(
        &self,
        config: &NotificationConfig,
        metadata: Metadata,
    ) -> Result<(), DeliveryFailure> {
        let route = resolve_route(&config.action)?;
        let address = text(&metadata, "provider_email")
            .ok_or(DeliveryFailure::MissingAddress)?
            .to_string();
        self.mailer.deliver(MailMessage {
            template_group: route.template_group,
            message: route.message,
            recipient: address,
            data: metadata,
        })?;
        Ok(())
    }
}

fn text<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    non_blank(metadata.get(key).and_then(Value::as_str))
}
