use std::collections::BTreeSet;
use std::fmt;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::alert::UrgentAlerts;
use crate::card::{CardRecord, CardStore};
use crate::config::Config;
use crate::datetime::{days_before, from_millis, local_datetime};
use crate::host::{
    AlertOutput, Category, Notification, NotificationKey, Notifier, Priority, TriggerHost,
    VibrationPattern,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Reminder { days_before: u32 },
    AlarmWindow,
    AutoStop,
}

/// Deterministic trigger identity: the same card and purpose always map to
/// the same id, so registering again replaces instead of duplicating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerId {
    pub card_id: Uuid,
    pub kind: TriggerKind,
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::Reminder { days_before } => {
                write!(f, "{}/reminder-{days_before}", self.card_id)
            }
            TriggerKind::AlarmWindow => write!(f, "{}/alarm", self.card_id),
            TriggerKind::AutoStop => write!(f, "{}/auto-stop", self.card_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub widget_id: u32,
    pub card_id: Uuid,
    pub card_name: String,
    pub due_date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub fire_at: DateTime<Utc>,
    pub payload: TriggerPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPolicy {
    /// Local hour at which reminder notifications fire.
    pub reminder_hour: u32,
    /// Days before the due date that get a reminder.
    pub reminder_offsets: Vec<u32>,
    /// The alarm window is `[alarm_start_hour, alarm_end_hour)` local time.
    pub alarm_start_hour: u32,
    pub alarm_end_hour: u32,
    pub auto_stop: Duration,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            reminder_hour: 9,
            reminder_offsets: vec![3, 1, 0],
            alarm_start_hour: 10,
            alarm_end_hour: 17,
            auto_stop: Duration::minutes(2),
        }
    }
}

impl ReminderPolicy {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let mut policy = Self::default();

        if let Some(hour) = cfg.get_u32("reminder.hour")? {
            policy.reminder_hour = hour;
        }
        if let Some(offsets) = cfg.get_u32_list("reminder.offsets")? {
            policy.reminder_offsets = offsets;
        }
        if let Some(hour) = cfg.get_u32("alarm.start")? {
            policy.alarm_start_hour = hour;
        }
        if let Some(hour) = cfg.get_u32("alarm.end")? {
            policy.alarm_end_hour = hour;
        }
        if let Some(minutes) = cfg.get_u32("alarm.autostop.minutes")? {
            policy.auto_stop = Duration::minutes(i64::from(minutes));
        }

        if policy.reminder_hour > 23 {
            return Err(anyhow!("reminder.hour must be 0-23, got {}", policy.reminder_hour));
        }
        if policy.alarm_start_hour >= policy.alarm_end_hour || policy.alarm_end_hour > 24 {
            return Err(anyhow!(
                "alarm window {}..{} is not a valid hour range",
                policy.alarm_start_hour,
                policy.alarm_end_hour
            ));
        }

        debug!(?policy, "loaded reminder policy");
        Ok(policy)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub scheduled: usize,
    pub skipped_past: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for ScheduleReport {
    fn add_assign(&mut self, other: Self) {
        self.scheduled += other.scheduled;
        self.skipped_past += other.skipped_past;
        self.cancelled += other.cancelled;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    Escalated { auto_stop_at: DateTime<Utc> },
    Deferred { next_check: DateTime<Utc> },
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Reminded,
    Alarm(AlarmOutcome),
    Stopped { was_active: bool },
}

/// Host services a fired trigger may touch.
pub struct HostContext<'a> {
    pub triggers: &'a mut dyn TriggerHost,
    pub notifier: &'a mut dyn Notifier,
    pub output: &'a mut dyn AlertOutput,
    pub alerts: &'a mut UrgentAlerts,
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    policy: ReminderPolicy,
}

impl Scheduler {
    pub fn new(policy: ReminderPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReminderPolicy {
        &self.policy
    }

    /// Triggers for one card that are still in the future.
    pub fn plan(&self, widget_id: u32, card: &CardRecord, now: &DateTime<Tz>) -> Vec<Trigger> {
        let tz = now.timezone();
        let due_day = from_millis(card.due_date, &tz).date_naive();
        let payload = TriggerPayload {
            widget_id,
            card_id: card.id,
            card_name: card.name.clone(),
            due_date: card.due_date,
        };

        let mut slots = Vec::with_capacity(self.policy.reminder_offsets.len() + 1);
        for &offset in &self.policy.reminder_offsets {
            let fire_at = days_before(due_day, offset)
                .and_then(|day| local_datetime(&tz, day, self.policy.reminder_hour, 0));
            slots.push((TriggerKind::Reminder { days_before: offset }, fire_at));
        }
        slots.push((
            TriggerKind::AlarmWindow,
            local_datetime(&tz, due_day, self.policy.alarm_start_hour, 0),
        ));

        let mut out = Vec::with_capacity(slots.len());
        for (kind, fire_at) in slots {
            let id = TriggerId {
                card_id: card.id,
                kind,
            };
            let Some(fire_at) = fire_at else {
                warn!(trigger = %id, "no local fire time for trigger, skipping");
                continue;
            };
            if fire_at <= *now {
                debug!(trigger = %id, fire_at = %fire_at, "trigger time already passed");
                continue;
            }
            out.push(Trigger {
                id,
                fire_at: fire_at.with_timezone(&Utc),
                payload: payload.clone(),
            });
        }
        out
    }

    /// Every id `plan` can produce for `card`, whatever its due date.
    pub fn trigger_ids(&self, card: &CardRecord) -> Vec<TriggerId> {
        self.policy
            .reminder_offsets
            .iter()
            .map(|&days_before| TriggerKind::Reminder { days_before })
            .chain([TriggerKind::AlarmWindow])
            .map(|kind| TriggerId {
                card_id: card.id,
                kind,
            })
            .collect()
    }

    /// Ids to clear before registering `card` again: everything the current
    /// policy can produce plus whatever the host still holds for the card,
    /// which covers reminders planned under earlier offsets. A pending
    /// auto-stop is kept so a sounding alarm still ends.
    fn stale_ids(&self, card: &CardRecord, host: &dyn TriggerHost) -> Vec<TriggerId> {
        let mut ids = self.trigger_ids(card);
        match host.registered(&card.id) {
            Ok(held) => ids.extend(
                held.into_iter()
                    .filter(|id| id.kind != TriggerKind::AutoStop),
            ),
            Err(err) => {
                warn!(card_id = %card.id, error = %err, "could not list registered triggers");
            }
        }
        ids
    }

    /// Cancels every trigger belonging to `previous` or `next`, then
    /// registers the plan for `next`.
    #[instrument(skip(self, previous, next, now, host), fields(previous = previous.len(), next = next.len()))]
    pub fn reschedule(
        &self,
        widget_id: u32,
        previous: &CardStore,
        next: &CardStore,
        now: &DateTime<Tz>,
        host: &mut dyn TriggerHost,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        let held: &dyn TriggerHost = &*host;
        let stale: BTreeSet<TriggerId> = previous
            .iter()
            .chain(next.iter())
            .flat_map(|card| self.stale_ids(card, held))
            .collect();
        for id in &stale {
            cancel_trigger(host, id, &mut report);
        }

        for card in next.iter() {
            let planned = self.plan(widget_id, card, now);
            report.skipped_past += self.trigger_ids(card).len().saturating_sub(planned.len());
            for trigger in &planned {
                match host.schedule_at(trigger) {
                    Ok(()) => {
                        debug!(trigger = %trigger.id, fire_at = %trigger.fire_at, "scheduled trigger");
                        report.scheduled += 1;
                    }
                    Err(err) => {
                        warn!(trigger = %trigger.id, error = %err, "failed to schedule trigger");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            scheduled = report.scheduled,
            skipped = report.skipped_past,
            cancelled = report.cancelled,
            failed = report.failed,
            "rescheduled widget reminders"
        );
        report
    }

    #[instrument(skip(self, store, host), fields(cards = store.len()))]
    pub fn cancel_all(&self, store: &CardStore, host: &mut dyn TriggerHost) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let held: &dyn TriggerHost = &*host;
        let stale: BTreeSet<TriggerId> = store
            .iter()
            .flat_map(|card| self.stale_ids(card, held))
            .collect();
        for id in &stale {
            cancel_trigger(host, id, &mut report);
        }
        debug!(cancelled = report.cancelled, "cancelled widget reminders");
        report
    }

    /// Routes a fired trigger to its handler.
    #[instrument(skip(self, trigger, now, ctx), fields(trigger = %trigger.id))]
    pub fn dispatch(
        &self,
        trigger: &Trigger,
        now: &DateTime<Tz>,
        ctx: &mut HostContext<'_>,
    ) -> DispatchOutcome {
        match trigger.id.kind {
            TriggerKind::Reminder { days_before } => {
                self.handle_reminder(&trigger.payload, days_before, ctx);
                DispatchOutcome::Reminded
            }
            TriggerKind::AlarmWindow => {
                DispatchOutcome::Alarm(self.handle_alarm_window(trigger, now, ctx))
            }
            TriggerKind::AutoStop => {
                info!(card_id = %trigger.payload.card_id, "urgent alert timed out");
                let was_active = ctx.alerts.stop(ctx.notifier, ctx.output);
                DispatchOutcome::Stopped { was_active }
            }
        }
    }

    pub fn handle_reminder(
        &self,
        payload: &TriggerPayload,
        days_before: u32,
        ctx: &mut HostContext<'_>,
    ) {
        let notification = reminder_notification(payload, days_before);
        let vibration = if days_before == 0 {
            VibrationPattern {
                timings_ms: vec![0, 500, 200, 500, 200, 500],
                repeat: false,
            }
        } else {
            VibrationPattern::one_shot(300)
        };

        if let Err(err) = ctx.output.vibrate(&vibration) {
            warn!(error = %err, "could not vibrate for reminder");
        }
        match ctx.notifier.notify(&notification) {
            Ok(()) => info!(card_id = %payload.card_id, days_before, "delivered reminder"),
            Err(err) => warn!(card_id = %payload.card_id, error = %err, "failed to deliver reminder"),
        }
    }

    /// Escalates inside the alarm window, otherwise re-arms itself for the
    /// next window start.
    pub fn handle_alarm_window(
        &self,
        trigger: &Trigger,
        now: &DateTime<Tz>,
        ctx: &mut HostContext<'_>,
    ) -> AlarmOutcome {
        let hour = now.hour();
        let tz = now.timezone();

        if (self.policy.alarm_start_hour..self.policy.alarm_end_hour).contains(&hour) {
            ctx.alerts
                .start(&trigger.payload, now, ctx.notifier, ctx.output);

            let auto_stop_at = now.with_timezone(&Utc) + self.policy.auto_stop;
            let auto_stop = Trigger {
                id: TriggerId {
                    card_id: trigger.payload.card_id,
                    kind: TriggerKind::AutoStop,
                },
                fire_at: auto_stop_at,
                payload: trigger.payload.clone(),
            };
            if let Err(err) = ctx.triggers.schedule_at(&auto_stop) {
                warn!(error = %err, "failed to arm alarm auto-stop");
            }
            info!(card_id = %trigger.payload.card_id, auto_stop_at = %auto_stop_at, "alarm escalated");
            return AlarmOutcome::Escalated { auto_stop_at };
        }

        let day = if hour < self.policy.alarm_start_hour {
            Some(now.date_naive())
        } else {
            now.date_naive().succ_opt()
        };
        let Some(next_check) =
            day.and_then(|day| local_datetime(&tz, day, self.policy.alarm_start_hour, 0))
        else {
            warn!(trigger = %trigger.id, "no next alarm window, dropping alarm");
            return AlarmOutcome::Dropped;
        };

        let next_check = next_check.with_timezone(&Utc);
        let rearmed = Trigger {
            id: trigger.id,
            fire_at: next_check,
            payload: trigger.payload.clone(),
        };
        if let Err(err) = ctx.triggers.schedule_at(&rearmed) {
            warn!(error = %err, "failed to re-arm alarm window");
        }
        debug!(hour, next_check = %next_check, "outside alarm window, deferred");
        AlarmOutcome::Deferred { next_check }
    }
}

fn cancel_trigger(host: &mut dyn TriggerHost, id: &TriggerId, report: &mut ScheduleReport) {
    match host.cancel(id) {
        Ok(()) => report.cancelled += 1,
        Err(err) => {
            warn!(trigger = %id, error = %err, "failed to cancel trigger");
            report.failed += 1;
        }
    }
}

pub fn reminder_notification(payload: &TriggerPayload, days_before: u32) -> Notification {
    let name = &payload.card_name;
    let (title, message) = match days_before {
        0 => (
            "Credit Card Payment Due TODAY!".to_string(),
            format!("{name} payment is due today"),
        ),
        1 => (
            "Credit Card Payment Due Tomorrow".to_string(),
            format!("{name} payment is due in 1 day"),
        ),
        days => (
            "Credit Card Payment Reminder".to_string(),
            format!("{name} payment is due in {days} days"),
        ),
    };

    Notification {
        key: NotificationKey::Reminder(payload.card_id),
        title,
        message,
        priority: if days_before == 0 {
            Priority::High
        } else {
            Priority::Default
        },
        category: Category::Reminder,
        ongoing: false,
        sound: days_before == 0,
        actions: vec![],
        vibration: None,
    }
}
