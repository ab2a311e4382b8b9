//! File-backed host services for running widgets from a terminal.
//!
//! Pending triggers and shown notifications live as JSON maps in the data
//! directory so that separate invocations (`configure`, later `tick`, then
//! `stop`) see each other's state.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use crate::datastore::write_json_atomic;
use crate::host::{
    AlertOutput, Notification, NotificationKey, Notifier, ServiceError, ToneHandle, TriggerHost,
    VibrationPattern,
};
use crate::scheduler::{Trigger, TriggerId};

const TRIGGERS_FILE: &str = "triggers.json";
const NOTIFICATIONS_FILE: &str = "notifications.json";

fn load_map<T: DeserializeOwned>(path: &Path) -> anyhow::Result<BTreeMap<String, T>> {
    match fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
    }
}

fn persist<T: Serialize>(
    service: &'static str,
    path: &Path,
    map: &BTreeMap<String, T>,
) -> Result<(), ServiceError> {
    write_json_atomic(path, map).map_err(|err| ServiceError::Failed {
        service,
        message: format!("{err:#}"),
    })
}

/// Pending triggers keyed by trigger id.
#[derive(Debug)]
pub struct FileTriggerTable {
    path: PathBuf,
    triggers: BTreeMap<String, Trigger>,
}

impl FileTriggerTable {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(TRIGGERS_FILE);
        let triggers = load_map(&path)?;
        debug!(count = triggers.len(), "loaded pending triggers");
        Ok(Self { path, triggers })
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Pending triggers, soonest first.
    pub fn pending(&self) -> Vec<&Trigger> {
        let mut out: Vec<&Trigger> = self.triggers.values().collect();
        out.sort_by_key(|t| (t.fire_at, t.id));
        out
    }

    pub fn get(&self, id: &TriggerId) -> Option<&Trigger> {
        self.triggers.get(&id.to_string())
    }

    /// Removes and returns every trigger whose time has come, soonest first.
    pub fn take_due(&mut self, now: &DateTime<Tz>) -> Result<Vec<Trigger>, ServiceError> {
        let now = now.with_timezone(&Utc);
        let due_keys: Vec<String> = self
            .triggers
            .iter()
            .filter(|(_, t)| t.fire_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        if due_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut due: Vec<Trigger> = due_keys
            .iter()
            .filter_map(|key| self.triggers.remove(key))
            .collect();
        due.sort_by_key(|t| (t.fire_at, t.id));
        persist("alarm", &self.path, &self.triggers)?;
        Ok(due)
    }
}

impl TriggerHost for FileTriggerTable {
    fn schedule_at(&mut self, trigger: &Trigger) -> Result<(), ServiceError> {
        self.triggers.insert(trigger.id.to_string(), trigger.clone());
        persist("alarm", &self.path, &self.triggers)
    }

    fn cancel(&mut self, id: &TriggerId) -> Result<(), ServiceError> {
        if self.triggers.remove(&id.to_string()).is_none() {
            return Ok(());
        }
        persist("alarm", &self.path, &self.triggers)
    }

    fn registered(&self, card_id: &Uuid) -> Result<Vec<TriggerId>, ServiceError> {
        Ok(self
            .triggers
            .values()
            .filter(|t| t.id.card_id == *card_id)
            .map(|t| t.id)
            .collect())
    }
}

/// Shown notifications keyed by notification key.
#[derive(Debug)]
pub struct FileNotifier {
    path: PathBuf,
    shown: BTreeMap<String, Notification>,
}

impl FileNotifier {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(NOTIFICATIONS_FILE);
        let shown = load_map(&path)?;
        Ok(Self { path, shown })
    }

    pub fn shown(&self) -> impl Iterator<Item = &Notification> {
        self.shown.values()
    }
}

impl Notifier for FileNotifier {
    fn notify(&mut self, notification: &Notification) -> Result<(), ServiceError> {
        info!(key = %notification.key, title = %notification.title, "posting notification");
        self.shown
            .insert(notification.key.to_string(), notification.clone());
        persist("notification", &self.path, &self.shown)
    }

    fn cancel(&mut self, key: &NotificationKey) -> Result<(), ServiceError> {
        if self.shown.remove(&key.to_string()).is_none() {
            return Ok(());
        }
        debug!(key = %key, "dismissed notification");
        persist("notification", &self.path, &self.shown)
    }
}

/// Rings the terminal bell. There is no vibrator, so patterns are only
/// logged.
#[derive(Debug, Default)]
pub struct TerminalAlert;

struct TerminalTone {
    started_at: DateTime<Utc>,
}

impl ToneHandle for TerminalTone {
    fn stop(self: Box<Self>) {
        let rang_for = Utc::now() - self.started_at;
        debug!(seconds = rang_for.num_seconds(), "alarm tone released");
    }
}

impl AlertOutput for TerminalAlert {
    fn start_tone(&mut self) -> Result<Box<dyn ToneHandle>, ServiceError> {
        let mut stderr = io::stderr().lock();
        stderr
            .write_all(b"\x07")
            .and_then(|()| stderr.flush())
            .map_err(|e| ServiceError::Failed {
                service: "ringtone",
                message: e.to_string(),
            })?;
        Ok(Box::new(TerminalTone {
            started_at: Utc::now(),
        }))
    }

    fn vibrate(&mut self, pattern: &VibrationPattern) -> Result<(), ServiceError> {
        debug!(timings = ?pattern.timings_ms, repeat = pattern.repeat, "vibration requested");
        Ok(())
    }

    fn cancel_vibration(&mut self) {
        debug!("vibration cancelled");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use chrono_tz::UTC;
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;
    use crate::host::{Category, Priority};
    use crate::scheduler::{TriggerKind, TriggerPayload};

    fn trigger(kind: TriggerKind, fire_at: DateTime<Utc>) -> Trigger {
        let card_id = Uuid::new_v4();
        Trigger {
            id: TriggerId { card_id, kind },
            fire_at,
            payload: TriggerPayload {
                widget_id: 1,
                card_id,
                card_name: "Visa".to_string(),
                due_date: fire_at.timestamp_millis(),
            },
        }
    }

    #[test]
    fn trigger_table_survives_reopen_and_pops_due() {
        let temp = tempdir().expect("tempdir");
        let now = UTC
            .with_ymd_and_hms(2026, 10, 19, 9, 0, 0)
            .single()
            .expect("valid now");
        let utc_now = now.with_timezone(&Utc);

        let mut table = FileTriggerTable::open(temp.path()).expect("open");
        let past = trigger(TriggerKind::AlarmWindow, utc_now - Duration::minutes(1));
        let future = trigger(TriggerKind::Reminder { days_before: 1 }, utc_now + Duration::hours(1));
        table.schedule_at(&past).expect("schedule");
        table.schedule_at(&future).expect("schedule");
        table.schedule_at(&future).expect("replace");

        let mut table = FileTriggerTable::open(temp.path()).expect("reopen");
        assert_eq!(table.len(), 2);
        let due = table.take_due(&now).expect("due");
        assert_eq!(due, vec![past]);

        let table = FileTriggerTable::open(temp.path()).expect("reopen");
        assert_eq!(table.pending(), vec![&future]);
    }

    #[test]
    fn registered_lists_only_that_cards_triggers() {
        let temp = tempdir().expect("tempdir");
        let fire_at = UTC
            .with_ymd_and_hms(2026, 10, 20, 9, 0, 0)
            .single()
            .expect("valid time")
            .with_timezone(&Utc);

        let mut table = FileTriggerTable::open(temp.path()).expect("open");
        let reminder = trigger(TriggerKind::Reminder { days_before: 5 }, fire_at);
        let alarm = Trigger {
            id: TriggerId {
                card_id: reminder.id.card_id,
                kind: TriggerKind::AlarmWindow,
            },
            ..reminder.clone()
        };
        let other = trigger(TriggerKind::AlarmWindow, fire_at);
        for t in [&reminder, &alarm, &other] {
            table.schedule_at(t).expect("schedule");
        }

        let mut held = table.registered(&reminder.id.card_id).expect("list");
        held.sort();
        assert_eq!(held, vec![reminder.id, alarm.id]);
    }

    #[test]
    fn notifier_replaces_by_key() {
        let temp = tempdir().expect("tempdir");
        let mut notifier = FileNotifier::open(temp.path()).expect("open");
        let note = Notification {
            key: NotificationKey::Urgent,
            title: "first".to_string(),
            message: String::new(),
            priority: Priority::High,
            category: Category::Alarm,
            ongoing: true,
            sound: true,
            actions: vec![],
            vibration: None,
        };
        notifier.notify(&note).expect("notify");
        notifier
            .notify(&Notification {
                title: "second".to_string(),
                ..note
            })
            .expect("replace");

        let notifier = FileNotifier::open(temp.path()).expect("reopen");
        let titles: Vec<&str> = notifier.shown().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["second"]);

        let mut notifier = notifier;
        notifier.cancel(&NotificationKey::Urgent).expect("cancel");
        notifier.cancel(&NotificationKey::Urgent).expect("cancel again");
        assert_eq!(notifier.shown().count(), 0);
    }
}
