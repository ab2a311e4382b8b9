use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::datetime::{default_due_millis, from_millis, within_validity_window};

pub const DEFAULT_CARD_NAME: &str = "Credit Card";

/// Upper bound on cards per widget.
pub const MAX_CARDS: usize = 10;

/// Namespace for ids given to stored cards that were written without one.
const SLOT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c2f_0e4b_93a1_4d7e_8b55_1f0a_c3d9_2e61);

/// Stable id for the card at `slot` of a widget's stored list. The same
/// file decodes to the same ids on every load until it is rewritten.
pub fn slot_card_id(widget_id: u32, slot: usize) -> Uuid {
    Uuid::new_v5(
        &SLOT_ID_NAMESPACE,
        format!("widget-{widget_id}/slot-{slot}").as_bytes(),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    /// Epoch milliseconds.
    #[serde(rename = "dueDate")]
    pub due_date: i64,
}

impl CardRecord {
    pub fn new(name: impl Into<String>, due_date: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            due_date,
        }
    }

    pub fn default_for(now: &DateTime<Tz>) -> Self {
        Self::new(DEFAULT_CARD_NAME, default_due_millis(now))
    }

    pub fn due_at(&self, tz: &Tz) -> DateTime<Tz> {
        from_millis(self.due_date, tz)
    }
}

/// The card list of one widget instance. Order is entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardStore {
    pub cards: Vec<CardRecord>,
}

impl CardStore {
    pub fn new(cards: Vec<CardRecord>) -> Self {
        Self { cards }
    }

    pub fn default_for(now: &DateTime<Tz>) -> Self {
        Self::new(vec![CardRecord::default_for(now)])
    }

    /// Default store for a widget with nothing usable on disk. Its card id
    /// is fixed per widget so repeated loads schedule the same triggers.
    pub fn fallback(widget_id: u32, now: &DateTime<Tz>) -> Self {
        Self::new(vec![CardRecord {
            id: slot_card_id(widget_id, 0),
            ..CardRecord::default_for(now)
        }])
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CardRecord> {
        self.cards.iter()
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Lenient decode of persisted text. Never fails: anything that cannot
    /// be used becomes the default single-card store. Records without a
    /// usable id get [`slot_card_id`] for their position.
    #[tracing::instrument(skip(raw, now), fields(bytes = raw.len()))]
    pub fn decode(raw: &str, widget_id: u32, now: &DateTime<Tz>) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            debug!("no stored cards, using default");
            return Self::fallback(widget_id, now);
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "stored cards are not valid json, using default");
                return Self::fallback(widget_id, now);
            }
        };

        let Value::Array(items) = value else {
            warn!("stored cards are not a json array, using default");
            return Self::fallback(widget_id, now);
        };

        let total = items.len();
        let mut cards = Vec::with_capacity(total.min(MAX_CARDS));
        for (idx, item) in items.into_iter().enumerate() {
            if cards.len() == MAX_CARDS {
                warn!(total, kept = MAX_CARDS, "stored cards exceed the limit, truncating");
                break;
            }
            match decode_record(item, slot_card_id(widget_id, idx), now) {
                Some(card) => cards.push(card),
                None => debug!(index = idx, "dropped stored card"),
            }
        }

        if cards.is_empty() {
            warn!(total, "no usable stored cards, using default");
            return Self::fallback(widget_id, now);
        }

        debug!(total, kept = cards.len(), "decoded stored cards");
        Self::new(cards)
    }
}

#[derive(Debug, Deserialize)]
struct RawCard {
    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    name: Option<String>,

    #[serde(default, rename = "dueDate")]
    due_date: Option<i64>,
}

fn decode_record(item: Value, slot_id: Uuid, now: &DateTime<Tz>) -> Option<CardRecord> {
    let raw: RawCard = match serde_json::from_value(item) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(error = %err, "malformed card record");
            return None;
        }
    };

    let due_date = raw.due_date.unwrap_or_else(|| default_due_millis(now));
    if !within_validity_window(due_date, now) {
        debug!(due_date, "card due date outside the validity window");
        return None;
    }

    let id = raw
        .id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .unwrap_or(slot_id);

    let name = raw
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_CARD_NAME.to_string());

    Some(CardRecord { id, name, due_date })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone};
    use chrono_tz::UTC;

    use super::*;

    fn now() -> DateTime<Tz> {
        UTC.with_ymd_and_hms(2026, 10, 19, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn empty_text_gives_default_card() {
        let store = CardStore::decode("   ", 1, &now());
        assert_eq!(store.len(), 1);
        assert_eq!(store.cards[0].name, DEFAULT_CARD_NAME);
        let due = store.cards[0].due_at(&UTC);
        assert_eq!((due.month(), due.day()), (11, 15));
    }

    #[test]
    fn garbage_gives_default_card() {
        for raw in ["not json", "{\"name\":\"x\"}", "[]", "[1, \"two\"]"] {
            let store = CardStore::decode(raw, 1, &now());
            assert_eq!(store.len(), 1, "input {raw}");
            assert_eq!(store.cards[0].name, DEFAULT_CARD_NAME);
        }
    }

    #[test]
    fn tolerates_missing_and_unknown_fields() {
        let due = now().timestamp_millis() + 86_400_000;
        let raw = format!(
            r#"[{{"name":"Visa","dueDate":{due},"color":"blue"}},{{"dueDate":{due}}},{{"name":"  "}}]"#
        );
        let store = CardStore::decode(&raw, 1, &now());
        assert_eq!(store.len(), 3);
        assert_eq!(store.cards[0].name, "Visa");
        assert_eq!(store.cards[0].due_date, due);
        assert_eq!(store.cards[1].name, DEFAULT_CARD_NAME);
        assert_eq!(store.cards[2].name, DEFAULT_CARD_NAME);
        let defaulted = store.cards[2].due_at(&UTC);
        assert_eq!((defaulted.month(), defaulted.day()), (11, 15));
    }

    #[test]
    fn drops_out_of_window_and_mistyped_records() {
        let ok = now().timestamp_millis();
        let far = ok + 6 * 365 * 86_400_000;
        let raw = format!(
            r#"[{{"name":"Old","dueDate":{far}}},{{"name":"Typo","dueDate":"soon"}},{{"name":"Keep","dueDate":{ok}}}]"#
        );
        let store = CardStore::decode(&raw, 1, &now());
        assert_eq!(store.len(), 1);
        assert_eq!(store.cards[0].name, "Keep");
    }

    #[test]
    fn keeps_stored_ids() {
        let card = CardRecord::new("Amex", now().timestamp_millis());
        let raw = CardStore::new(vec![card.clone()])
            .to_json()
            .expect("serialize");
        let store = CardStore::decode(&raw, 1, &now());
        assert_eq!(store.cards, vec![card]);
    }

    #[test]
    fn truncates_to_card_limit() {
        let due = now().timestamp_millis();
        let items: Vec<String> = (0..14)
            .map(|i| format!(r#"{{"name":"Card {i}","dueDate":{due}}}"#))
            .collect();
        let raw = format!("[{}]", items.join(","));
        let store = CardStore::decode(&raw, 1, &now());
        assert_eq!(store.len(), MAX_CARDS);
        assert_eq!(store.cards[9].name, "Card 9");
    }

    #[test]
    fn id_less_records_decode_to_the_same_ids_every_time() {
        let due = now().timestamp_millis();
        let raw = format!(r#"[{{"name":"Visa","dueDate":{due}}},{{"name":"Amex","dueDate":{due}}}]"#);

        let first = CardStore::decode(&raw, 5, &now());
        let second = CardStore::decode(&raw, 5, &now());
        assert_eq!(first, second);
        assert_ne!(first.cards[0].id, first.cards[1].id);
        assert_eq!(first.cards[1].id, slot_card_id(5, 1));

        let other_widget = CardStore::decode(&raw, 6, &now());
        assert_ne!(other_widget.cards[0].id, first.cards[0].id);
    }

    #[test]
    fn fallback_card_id_is_stable_per_widget() {
        let a = CardStore::decode("garbage", 2, &now());
        let b = CardStore::decode("", 2, &now());
        assert_eq!(a.cards[0].id, b.cards[0].id);
        assert_eq!(a.cards[0].id, slot_card_id(2, 0));
    }
}
