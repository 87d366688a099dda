//! User-facing messages produced by the canvas layer
//!
//! The core never renders these; it queues them and a front end drains the queue.

use crate::core::error::{ErrorKind, SchemaError};
use serde::{Deserialize, Serialize};

/// Notification type for canvas display
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    Success,
    Error,
    Warning,
    Info,
}

/// Notification for canvas display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasNotification {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub auto_dismiss_ms: Option<u32>,
}

impl CanvasNotification {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: NotificationType::Success,
            title: title.into(),
            message: message.into(),
            auto_dismiss_ms: Some(3000),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: NotificationType::Error,
            title: title.into(),
            message: message.into(),
            auto_dismiss_ms: None, // errors stay until dismissed
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: NotificationType::Warning,
            title: title.into(),
            message: message.into(),
            auto_dismiss_ms: Some(5000),
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: NotificationType::Info,
            title: title.into(),
            message: message.into(),
            auto_dismiss_ms: Some(3000),
        }
    }

    /// Rejected user actions are warnings; a missing project is an error
    pub fn from_error(title: impl Into<String>, error: &SchemaError) -> Self {
        match error.kind() {
            ErrorKind::State => Self::error(title, error.to_string()),
            ErrorKind::Validation | ErrorKind::Referential => {
                Self::warning(title, error.to_string())
            }
        }
    }

    /// Warnings attached to a successful mutation, folded into one message
    pub fn from_warnings(title: impl Into<String>, warnings: &[String]) -> Option<Self> {
        if warnings.is_empty() {
            return None;
        }
        Some(Self::warning(title, warnings.join("\n")))
    }

    pub fn is_error(&self) -> bool {
        self.notification_type == NotificationType::Error
    }
}
