use std::sync::Arc;

use ccwidget_core::card::{CardRecord, CardStore};
use ccwidget_core::datastore::DataStore;
use ccwidget_core::writer::StoreWriter;
use chrono::{DateTime, TimeZone};
use chrono_tz::{Tz, UTC};
use tempfile::tempdir;

fn now() -> DateTime<Tz> {
    UTC.with_ymd_and_hms(2026, 10, 19, 12, 0, 0)
        .single()
        .expect("valid now")
}

fn single(name: &str) -> CardStore {
    CardStore::new(vec![CardRecord::new(name, now().timestamp_millis())])
}

#[tokio::test]
async fn last_queued_save_wins() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (writer, _task) = StoreWriter::spawn(Arc::clone(&store));

    let tickets: Vec<_> = (0..20)
        .map(|i| writer.enqueue_save(1, single(&format!("Card {i}"))))
        .collect();
    for ticket in tickets {
        ticket.wait().await.expect("write");
    }

    let stored = store.load(1, &now()).expect("load");
    assert_eq!(stored.cards[0].name, "Card 19");
}

#[tokio::test]
async fn dropped_tickets_still_write_before_shutdown() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (writer, task) = StoreWriter::spawn(Arc::clone(&store));

    drop(writer.enqueue_save(2, single("Visa")));
    drop(writer.enqueue_save(3, single("Amex")));
    drop(writer);
    task.await.expect("writer drained");

    assert_eq!(store.widget_ids().expect("ids"), vec![2, 3]);
}

#[tokio::test]
async fn delete_is_ordered_after_pending_save() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(DataStore::open(temp.path()).expect("open"));
    let (writer, _task) = StoreWriter::spawn(Arc::clone(&store));

    let save = writer.enqueue_save(4, single("Visa"));
    let delete = writer.enqueue_delete(4);
    delete.wait().await.expect("delete");
    save.wait().await.expect("save finished first");

    assert!(store.load_raw(4).expect("raw").is_none());
}

#[tokio::test]
async fn write_errors_reach_the_ticket() {
    let temp = tempdir().expect("tempdir");
    let data_dir = temp.path().join("gone");
    let store = Arc::new(DataStore::open(&data_dir).expect("open"));
    std::fs::remove_dir_all(&data_dir).expect("remove");
    let (writer, _task) = StoreWriter::spawn(Arc::clone(&store));

    let err = writer
        .enqueue_save(1, single("Visa"))
        .wait()
        .await
        .expect_err("no directory to write into");
    assert!(format!("{err:#}").contains("widget 1"));
}
