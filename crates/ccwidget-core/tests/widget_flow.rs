use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use ccwidget_core::card::{CardRecord, CardStore, MAX_CARDS};
use ccwidget_core::datastore::DataStore;
use ccwidget_core::display::{ERROR_TEXT, WidgetView};
use ccwidget_core::form::{ConfigForm, FormEntry, FormError};
use ccwidget_core::host::{ServiceError, TriggerHost};
use ccwidget_core::scheduler::{ReminderPolicy, Scheduler, Trigger, TriggerId, TriggerKind};
use ccwidget_core::widget::{WidgetError, WidgetService};
use ccwidget_core::writer::StoreWriter;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::{Europe::Berlin, Tz};
use tempfile::tempdir;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Default)]
struct AlarmTable(BTreeMap<TriggerId, Trigger>);

impl TriggerHost for AlarmTable {
    fn schedule_at(&mut self, trigger: &Trigger) -> Result<(), ServiceError> {
        self.0.insert(trigger.id, trigger.clone());
        Ok(())
    }

    fn cancel(&mut self, id: &TriggerId) -> Result<(), ServiceError> {
        self.0.remove(id);
        Ok(())
    }

    fn registered(&self, card_id: &Uuid) -> Result<Vec<TriggerId>, ServiceError> {
        Ok(self.0.keys().filter(|id| id.card_id == *card_id).copied().collect())
    }
}

fn berlin(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
    Berlin
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid local time")
}

fn service(store: Arc<DataStore>) -> (WidgetService, JoinHandle<()>) {
    let (writer, task) = StoreWriter::spawn(Arc::clone(&store));
    (
        WidgetService::new(store, writer, Scheduler::new(ReminderPolicy::default())),
        task,
    )
}

fn form(cards: &[(&str, DateTime<Tz>)]) -> ConfigForm {
    ConfigForm::from_entries(
        cards
            .iter()
            .map(|(name, due)| FormEntry {
                id: Uuid::new_v4(),
                name: (*name).to_string(),
                due_date: due.timestamp_millis(),
            })
            .collect(),
    )
    .expect("form")
}

#[tokio::test]
async fn configure_persists_and_schedules_future_triggers_only() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (service, _task) = service(Arc::clone(&store));
    let mut alarms = AlarmTable::default();

    let now = berlin(2026, 10, 19, 7, 30);
    let due = now + Duration::days(1);
    let outcome = service
        .configure(1, &form(&[("Visa", due)]), &now, &mut alarms)
        .await
        .expect("configure");

    assert_eq!(outcome.schedule.scheduled, 3);
    let mut fire_times: Vec<DateTime<Utc>> = alarms.0.values().map(|t| t.fire_at).collect();
    fire_times.sort();
    assert_eq!(
        fire_times,
        vec![
            berlin(2026, 10, 19, 9, 0).with_timezone(&Utc),
            berlin(2026, 10, 20, 9, 0).with_timezone(&Utc),
            berlin(2026, 10, 20, 10, 0).with_timezone(&Utc),
        ]
    );

    let stored = store.load(1, &now).expect("load");
    assert_eq!(stored, outcome.store);
    assert_eq!(stored.cards[0].name, "Visa");
}

#[tokio::test]
async fn show_lists_nearest_card_first() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (service, _task) = service(Arc::clone(&store));
    let now = berlin(2026, 10, 19, 12, 0);

    service
        .configure(
            3,
            &form(&[
                ("Amex", now + Duration::days(12)),
                ("Visa", now + Duration::days(2)),
            ]),
            &now,
            &mut AlarmTable::default(),
        )
        .await
        .expect("configure");

    let WidgetView::Cards {
        headline, slots, click,
    } = service.refresh(3, &now, Some(120))
    else {
        panic!("expected cards view");
    };
    assert_eq!(headline, "Visa (+1 more)");
    assert_eq!(click.widget_id, 3);
    assert_eq!(slots[0].days_text, "2");
    assert_eq!(slots[0].color, "#FF9800");
    assert_eq!(slots[1].name, "Amex");
}

#[tokio::test]
async fn overdue_cards_are_rolled_forward_and_written_back() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let now = berlin(2026, 10, 19, 12, 0);
    let overdue = CardRecord::new("Visa", (now - Duration::days(5)).timestamp_millis());
    store
        .save(8, &CardStore::new(vec![overdue.clone()]))
        .expect("seed");

    let (service, task) = service(Arc::clone(&store));
    let WidgetView::Cards { slots, .. } = service.refresh(8, &now, None) else {
        panic!("expected cards view");
    };
    assert_eq!(slots[0].due_text, "Nov 14");

    drop(service);
    task.await.expect("writer drained");

    let stored = store.load(8, &now).expect("load");
    assert_eq!(stored.cards[0].id, overdue.id);
    let due = stored.cards[0].due_at(&Berlin);
    assert_eq!((due.month(), due.day()), (11, 14));
}

#[tokio::test]
async fn eleventh_card_is_rejected_and_store_unchanged() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (service, _task) = service(Arc::clone(&store));
    let now = berlin(2026, 10, 19, 12, 0);
    let mut alarms = AlarmTable::default();

    let cards: Vec<(String, DateTime<Tz>)> = (0..MAX_CARDS)
        .map(|i| (format!("Card {i}"), now + Duration::days(i as i64 + 1)))
        .collect();
    let named: Vec<(&str, DateTime<Tz>)> = cards.iter().map(|(n, d)| (n.as_str(), *d)).collect();
    service
        .configure(2, &form(&named), &now, &mut alarms)
        .await
        .expect("ten cards");
    let before = store.load_raw(2).expect("raw");

    let err = service
        .add_card(2, Some("One too many".to_string()), None, &now, &mut alarms)
        .await
        .expect_err("limit");
    assert!(matches!(err, WidgetError::Form(FormError::TooManyCards)));
    assert_eq!(err.to_string(), "Maximum 10 cards allowed");
    assert_eq!(store.load_raw(2).expect("raw"), before);
}

#[tokio::test]
async fn failed_write_keeps_triggers_untouched() {
    let temp = tempdir().expect("tempdir");
    let data_dir = temp.path().join("data");
    let store = Arc::new(DataStore::open(&data_dir).expect("open"));
    let (service, _task) = service(Arc::clone(&store));
    let now = berlin(2026, 10, 19, 12, 0);
    fs::remove_dir_all(&data_dir).expect("pull the data dir away");

    let mut alarms = AlarmTable::default();
    let err = service
        .configure(1, &form(&[("Visa", now + Duration::days(4))]), &now, &mut alarms)
        .await
        .expect_err("write fails");
    assert!(matches!(err, WidgetError::Save(_)));
    assert_eq!(err.to_string(), "Failed to save configuration");
    assert!(alarms.0.is_empty());
}

#[tokio::test]
async fn unreadable_store_shows_error_view() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    fs::create_dir(store.widget_path(6)).expect("directory in place of the file");
    let (service, _task) = service(Arc::clone(&store));

    let view = service.refresh(6, &berlin(2026, 10, 19, 12, 0), None);
    assert_eq!(
        view,
        WidgetView::Error {
            message: ERROR_TEXT.to_string(),
            click: view.click(),
        }
    );
}

#[tokio::test]
async fn delete_cancels_triggers_and_removes_file() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (service, _task) = service(Arc::clone(&store));
    let now = berlin(2026, 10, 1, 8, 0);
    let mut alarms = AlarmTable::default();

    service
        .configure(
            4,
            &form(&[("Visa", now + Duration::days(10)), ("Amex", now + Duration::days(20))]),
            &now,
            &mut alarms,
        )
        .await
        .expect("configure");
    assert_eq!(alarms.0.len(), 8);

    let report = service.delete(4, &now, &mut alarms).await.expect("delete");
    assert_eq!(report.cancelled, 8);
    assert!(alarms.0.is_empty());
    assert!(store.load_raw(4).expect("raw").is_none());
}

#[tokio::test]
async fn renaming_a_card_keeps_its_reminders() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (service, _task) = service(Arc::clone(&store));
    let now = berlin(2026, 10, 1, 8, 0);
    let mut alarms = AlarmTable::default();

    let outcome = service
        .configure(5, &form(&[("Visa", now + Duration::days(10))]), &now, &mut alarms)
        .await
        .expect("configure");
    let card_id = outcome.store.cards[0].id;

    let mut renamed = service.load_form(5, &now).expect("form");
    renamed.entry_mut(0).expect("entry").name = "Visa Gold".to_string();
    service
        .configure(5, &renamed, &now, &mut alarms)
        .await
        .expect("rename");

    assert_eq!(alarms.0.len(), 4);
    assert!(alarms.0.keys().all(|id| id.card_id == card_id));
    assert!(alarms.0.values().all(|t| t.payload.card_name == "Visa Gold"));
}

#[tokio::test]
async fn reschedule_all_rolls_stale_widgets_forward() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let now = berlin(2026, 10, 19, 8, 0);
    store
        .save(
            1,
            &CardStore::new(vec![CardRecord::new(
                "Old",
                (now - Duration::days(3)).timestamp_millis(),
            )]),
        )
        .expect("seed 1");
    store
        .save(
            2,
            &CardStore::new(vec![CardRecord::new(
                "Soon",
                (now + Duration::days(5)).timestamp_millis(),
            )]),
        )
        .expect("seed 2");

    let (service, _task) = service(Arc::clone(&store));
    let mut alarms = AlarmTable::default();
    let report = service
        .reschedule_all(&now, &mut alarms)
        .await
        .expect("reschedule");

    assert_eq!(report.scheduled, 8);
    assert_eq!(report.failed, 0);
    let rolled = alarms
        .0
        .values()
        .find(|t| t.payload.card_name == "Old" && t.id.kind == TriggerKind::AlarmWindow)
        .expect("rolled card alarm");
    assert_eq!(rolled.fire_at, berlin(2026, 11, 16, 10, 0).with_timezone(&Utc));

    let stored = store.load(1, &now).expect("load");
    assert_eq!(stored.cards[0].due_at(&Berlin).day(), 16);
}

#[tokio::test]
async fn cards_stored_without_ids_keep_their_triggers_across_restarts() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let now = berlin(2026, 10, 1, 8, 0);
    let due = berlin(2026, 10, 20, 0, 0).timestamp_millis();
    fs::write(
        store.widget_path(5),
        format!(r#"[{{"name":"Visa","dueDate":{due}}}]"#),
    )
    .expect("seed without ids");

    let (service, _task) = service(Arc::clone(&store));
    let mut alarms = AlarmTable::default();
    service
        .reschedule_all(&now, &mut alarms)
        .await
        .expect("first reschedule");
    assert_eq!(alarms.0.len(), 4);
    let first: Vec<TriggerId> = alarms.0.keys().copied().collect();

    service
        .reschedule_all(&now, &mut alarms)
        .await
        .expect("second reschedule");
    assert_eq!(alarms.0.keys().copied().collect::<Vec<_>>(), first);

    let mut renamed = service.load_form(5, &now).expect("form");
    renamed.entry_mut(0).expect("entry").name = "Visa Gold".to_string();
    service
        .configure(5, &renamed, &now, &mut alarms)
        .await
        .expect("configure");
    assert_eq!(alarms.0.keys().copied().collect::<Vec<_>>(), first);
}

#[tokio::test]
async fn new_reminder_offsets_replace_the_old_ones() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let now = berlin(2026, 10, 1, 8, 0);
    let mut alarms = AlarmTable::default();

    let (service, _task) = service(Arc::clone(&store));
    service
        .configure(3, &form(&[("Visa", berlin(2026, 10, 20, 0, 0))]), &now, &mut alarms)
        .await
        .expect("configure");
    assert_eq!(alarms.0.len(), 4);

    let (writer, _weekly_task) = StoreWriter::spawn(Arc::clone(&store));
    let weekly = WidgetService::new(
        Arc::clone(&store),
        writer,
        Scheduler::new(ReminderPolicy {
            reminder_offsets: vec![7],
            ..ReminderPolicy::default()
        }),
    );
    let current = weekly.load_form(3, &now).expect("form");
    weekly
        .configure(3, &current, &now, &mut alarms)
        .await
        .expect("reconfigure");

    let kinds: Vec<TriggerKind> = alarms.0.keys().map(|id| id.kind).collect();
    assert_eq!(
        kinds,
        vec![TriggerKind::Reminder { days_before: 7 }, TriggerKind::AlarmWindow]
    );
}
