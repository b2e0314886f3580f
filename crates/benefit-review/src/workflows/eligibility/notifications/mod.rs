//! Notification creation, delivery, and display text.

mod action;
mod builder;
mod composer;
mod mailer;
mod orchestrator;

pub use action::{NotificationAction, MEDICAL_CERTIFICATION_PREFIX};
pub use builder::{
    NotificationBuilder, NotificationChannel, NotificationConfig, NotificationMode,
    NotificationValidationError, TEMP_PASSWORD_KEY, TEST_TEMP_PASSWORD,
};
pub use composer::{compose, humanize};
pub use mailer::{resolve_route, MailerRoute, UnroutableAction};
pub use orchestrator::{
    DeliveryFailure, DeliveryOutcome, Dispatch, NotificationError, NotificationOrchestrator,
    DELIVERY_ERROR_KEY,
};
