//! The single urgent alarm a device can be sounding at once.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::host::{
    AlertOutput, Category, Notification, NotificationKey, Notifier, Priority, ToneHandle,
    VibrationPattern,
};
use crate::scheduler::TriggerPayload;

pub const STOP_ACTION: &str = "Stop Alarm";

pub struct AlertSession {
    pub card_id: Uuid,
    pub card_name: String,
    pub started_at: DateTime<Utc>,
    tone: Option<Box<dyn ToneHandle>>,
    vibrating: bool,
}

impl std::fmt::Debug for AlertSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSession")
            .field("card_id", &self.card_id)
            .field("card_name", &self.card_name)
            .field("started_at", &self.started_at)
            .field("tone", &self.tone.is_some())
            .field("vibrating", &self.vibrating)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct UrgentAlerts {
    active: Option<AlertSession>,
}

impl UrgentAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&AlertSession> {
        self.active.as_ref()
    }

    /// Starts sounding for `payload`, silencing any alert already running.
    /// Tone and vibration failures degrade the alert, they do not abort it.
    #[tracing::instrument(skip_all, fields(card_id = %payload.card_id))]
    pub fn start(
        &mut self,
        payload: &TriggerPayload,
        now: &DateTime<Tz>,
        notifier: &mut dyn Notifier,
        output: &mut dyn AlertOutput,
    ) {
        if self.active.is_some() {
            debug!("replacing running urgent alert");
            self.release(output);
        }

        let tone = match output.start_tone() {
            Ok(tone) => Some(tone),
            Err(err) => {
                warn!(error = %err, "alarm tone unavailable");
                None
            }
        };

        let pattern = urgent_vibration();
        let vibrating = match output.vibrate(&pattern) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "alarm vibration unavailable");
                false
            }
        };

        if let Err(err) = notifier.notify(&urgent_notification(&payload.card_name)) {
            warn!(error = %err, "failed to post urgent notification");
        }

        self.active = Some(AlertSession {
            card_id: payload.card_id,
            card_name: payload.card_name.clone(),
            started_at: now.with_timezone(&Utc),
            tone,
            vibrating,
        });
        info!(card_name = %payload.card_name, "urgent alert started");
    }

    /// Silences the alert and dismisses its notification. Safe to call when
    /// nothing is sounding; returns whether an alert was running.
    #[tracing::instrument(skip_all)]
    pub fn stop(&mut self, notifier: &mut dyn Notifier, output: &mut dyn AlertOutput) -> bool {
        let was_active = self.active.is_some();
        self.release(output);

        if let Err(err) = notifier.cancel(&NotificationKey::Urgent) {
            warn!(error = %err, "failed to dismiss urgent notification");
        }

        if was_active {
            info!("urgent alert stopped");
        } else {
            debug!("stop requested with no alert running");
        }
        was_active
    }

    fn release(&mut self, output: &mut dyn AlertOutput) {
        let Some(session) = self.active.take() else {
            return;
        };
        if let Some(tone) = session.tone {
            tone.stop();
        }
        if session.vibrating {
            output.cancel_vibration();
        }
    }
}

pub fn urgent_vibration() -> VibrationPattern {
    VibrationPattern {
        timings_ms: vec![0, 1000, 500, 1000, 500, 1000],
        repeat: true,
    }
}

pub fn urgent_notification(card_name: &str) -> Notification {
    Notification {
        key: NotificationKey::Urgent,
        title: "URGENT: Credit Card Payment Due!".to_string(),
        message: format!("{card_name} payment is due TODAY! Don't miss it!"),
        priority: Priority::High,
        category: Category::Alarm,
        ongoing: true,
        sound: true,
        actions: vec![STOP_ACTION.to_string()],
        vibration: Some(urgent_vibration()),
    }
}
