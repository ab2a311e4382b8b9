//! Seams to the platform that hosts the widget: trigger scheduling,
//! notification delivery, and tone/vibration output.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::{Trigger, TriggerId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} service unavailable")]
    Unavailable(&'static str),

    #[error("{service} failed: {message}")]
    Failed {
        service: &'static str,
        message: String,
    },
}

pub trait TriggerHost {
    /// Registers `trigger`, replacing any trigger with the same id.
    fn schedule_at(&mut self, trigger: &Trigger) -> Result<(), ServiceError>;

    /// Removes the trigger with this id. Unknown ids are not an error.
    fn cancel(&mut self, id: &TriggerId) -> Result<(), ServiceError>;

    /// Ids of every pending trigger registered for `card_id`.
    fn registered(&self, card_id: &Uuid) -> Result<Vec<TriggerId>, ServiceError>;
}

pub trait Notifier {
    /// Shows `notification`, replacing one with the same key.
    fn notify(&mut self, notification: &Notification) -> Result<(), ServiceError>;

    fn cancel(&mut self, key: &NotificationKey) -> Result<(), ServiceError>;
}

/// A playing alarm tone. Consuming `stop` releases it.
pub trait ToneHandle {
    fn stop(self: Box<Self>);
}

pub trait AlertOutput {
    fn start_tone(&mut self) -> Result<Box<dyn ToneHandle>, ServiceError>;

    fn vibrate(&mut self, pattern: &VibrationPattern) -> Result<(), ServiceError>;

    fn cancel_vibration(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "card", rename_all = "snake_case")]
pub enum NotificationKey {
    Reminder(Uuid),
    Urgent,
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reminder(card_id) => write!(f, "reminder:{card_id}"),
            Self::Urgent => f.write_str("urgent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Default,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Reminder,
    Alarm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibrationPattern {
    /// Alternating off/on durations in milliseconds, starting with off.
    pub timings_ms: Vec<u64>,
    pub repeat: bool,
}

impl VibrationPattern {
    pub fn one_shot(ms: u64) -> Self {
        Self {
            timings_ms: vec![0, ms],
            repeat: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub key: NotificationKey,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub category: Category,

    /// Ongoing notifications cannot be swiped away.
    #[serde(default)]
    pub ongoing: bool,

    #[serde(default)]
    pub sound: bool,

    #[serde(default)]
    pub actions: Vec<String>,

    #[serde(default)]
    pub vibration: Option<VibrationPattern>,
}
