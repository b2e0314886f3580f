use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::NotificationAction;
use crate::config::AppEnvironment;
use crate::workflows::eligibility::domain::{is_blank, Metadata, SubjectRef, User};

pub const TEMP_PASSWORD_KEY: &str = "temp_password";
/// Substituted for a missing `temp_password` when running in [`NotificationMode::TestFallback`].
pub const TEST_TEMP_PASSWORD: &str = "TempPass-Test-0000";

/// Channels a notification may be configured for. Only email is delivered today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

impl NotificationChannel {
    pub const fn label(self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::InApp => "in_app",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for NotificationChannel {
    type Err = NotificationValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "in_app" => Ok(Self::InApp),
            other => Err(NotificationValidationError::UnsupportedChannel(
                other.to_string(),
            )),
        }
    }
}

/// How strictly `finalize` treats secrets that tests routinely omit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationMode {
    #[default]
    Strict,
    TestFallback,
}

impl NotificationMode {
    pub const fn for_environment(environment: AppEnvironment) -> Self {
        if environment.is_test() {
            NotificationMode::TestFallback
        } else {
            NotificationMode::Strict
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationValidationError {
    #[error("Notification type is required")]
    MissingType,
    #[error("Notification recipient is required")]
    MissingRecipient,
    #[error("Unsupported notification channel: {0}")]
    UnsupportedChannel(String),
    #[error("Temporary password is required for account notifications")]
    MissingTemporaryPassword,
}

/// Validated notification request produced by [`NotificationBuilder::finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub action: NotificationAction,
    pub recipient: User,
    pub actor: User,
    pub notifiable: Option<SubjectRef>,
    pub metadata: Metadata,
    pub channel: NotificationChannel,
    pub audit: bool,
    pub deliver: bool,
}

impl NotificationConfig {
    /// Delivery is attempted only for email notifications that asked for it.
    pub fn is_deliverable(&self) -> bool {
        self.deliver && self.channel == NotificationChannel::Email
    }
}

/// Accumulates a notification request. `finalize` consumes the builder, so a finalized
/// request can no longer be changed.
#[derive(Debug, Clone)]
#[must_use = "a builder does nothing until finalized"]
pub struct NotificationBuilder {
    mode: NotificationMode,
    system_actor: User,
    action: Option<NotificationAction>,
    recipient: Option<User>,
    actor: Option<User>,
    notifiable: Option<SubjectRef>,
    metadata: Metadata,
    channel: String,
    audit: bool,
    deliver: bool,
}

impl NotificationBuilder {
    pub fn new(system_actor: User, mode: NotificationMode) -> Self {
        Self {
            mode,
            system_actor,
            action: None,
            recipient: None,
            actor: None,
            notifiable: None,
            metadata: Metadata::new(),
            channel: NotificationChannel::Email.label().to_string(),
            audit: false,
            deliver: true,
        }
    }

    pub fn action(mut self, action: impl Into<NotificationAction>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn recipient(mut self, recipient: User) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn actor(mut self, actor: User) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn notifiable(mut self, notifiable: SubjectRef) -> Self {
        self.notifiable = Some(notifiable);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    pub fn deliver(mut self, deliver: bool) -> Self {
        self.deliver = deliver;
        self
    }

    pub fn finalize(self) -> Result<NotificationConfig, NotificationValidationError> {
        let action = self
            .action
            .filter(|action| !action.is_blank())
            .ok_or(NotificationValidationError::MissingType)?;
        let recipient = self
            .recipient
            .filter(|recipient| !is_blank(&recipient.id.0))
            .ok_or(NotificationValidationError::MissingRecipient)?;
        let channel = self.channel.parse::<NotificationChannel>()?;

        let mut metadata = self.metadata;
        if action == NotificationAction::AccountCreated && !has_temp_password(&metadata) {
            match self.mode {
                NotificationMode::TestFallback => {
                    metadata.insert(
                        TEMP_PASSWORD_KEY.to_string(),
                        Value::String(TEST_TEMP_PASSWORD.to_string()),
                    );
                }
                NotificationMode::Strict => {
                    return Err(NotificationValidationError::MissingTemporaryPassword)
                }
            }
        }

        Ok(NotificationConfig {
            action,
            recipient,
            actor: self.actor.unwrap_or(self.system_actor),
            notifiable: self.notifiable,
            metadata,
            channel,
            audit: self.audit,
            deliver: self.deliver,
        })
    }
}

pub(crate) fn has_temp_password(metadata: &Metadata) -> bool {
    metadata
        .get(TEMP_PASSWORD_KEY)
        .and_then(Value::as_str)
        .map(|value| !is_blank(value))
        .unwrap_or(false)
}
