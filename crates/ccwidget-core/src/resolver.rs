use chrono::{DateTime, Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::card::{CardRecord, CardStore};
use crate::datetime::{add_months_clamped, day_difference, from_millis, local_datetime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTier {
    Critical,
    Warning,
    Caution,
    Safe,
}

impl ColorTier {
    pub fn from_days(days_remaining: i64) -> Self {
        match days_remaining {
            i64::MIN..=0 => Self::Critical,
            1..=3 => Self::Warning,
            4..=7 => Self::Caution,
            _ => Self::Safe,
        }
    }

    pub fn hex(self) -> &'static str {
        match self {
            Self::Critical => "#F44336",
            Self::Warning => "#FF9800",
            Self::Caution => "#FFC107",
            Self::Safe => "#4CAF50",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no local midnight on {date} in {tz}")]
    NoLocalTime { date: NaiveDate, tz: &'static str },

    #[error("cannot move {date} into the following month")]
    MonthOverflow { date: NaiveDate },

    #[error("card store is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDisplay {
    /// Card with the nearest due date.
    pub primary_card: CardRecord,

    /// All cards after rollover, nearest first.
    pub cards: Vec<CardRecord>,

    pub total_cards: usize,

    pub days_remaining: i64,

    pub color_tier: ColorTier,

    /// The corrected store, present only when rollover moved a due date.
    /// The caller persists it.
    pub rolled_over_store: Option<CardStore>,
}

/// Resolves the nearest due card as of `now`, rolling stale due dates into
/// the following month.
#[tracing::instrument(skip(store, now), fields(cards = store.len()))]
pub fn resolve(store: &CardStore, now: &DateTime<Tz>) -> Result<ResolvedDisplay, ResolveError> {
    let tz = now.timezone();
    let today = now.date_naive();

    let source = if store.is_empty() {
        debug!("empty store resolved as default");
        CardStore::default_for(now)
    } else {
        store.clone()
    };

    let mut changed = false;
    let mut cards = Vec::with_capacity(source.len());
    for card in source.cards {
        match rollover(card.due_date, now)? {
            Some(due_date) => {
                debug!(
                    card_id = %card.id,
                    from = card.due_date,
                    to = due_date,
                    "rolled overdue card into next month"
                );
                changed = true;
                cards.push(CardRecord { due_date, ..card });
            }
            None => cards.push(card),
        }
    }

    let rolled_over_store = changed.then(|| CardStore::new(cards.clone()));

    cards.sort_by_key(|card| card.due_date);
    let Some(primary_card) = cards.first().cloned() else {
        return Err(ResolveError::Empty);
    };

    let due_day = from_millis(primary_card.due_date, &tz).date_naive();
    let days_remaining = day_difference(today, due_day);
    let color_tier = ColorTier::from_days(days_remaining);

    debug!(
        card_id = %primary_card.id,
        days_remaining,
        ?color_tier,
        rolled_over = changed,
        "resolved widget display"
    );

    Ok(ResolvedDisplay {
        primary_card,
        total_cards: cards.len(),
        cards,
        days_remaining,
        color_tier,
        rolled_over_store,
    })
}

/// New due date for a card whose due day is before today: the same
/// day-of-month in the month after today's, clamped, at local midnight.
/// `None` when the card is due today or later.
pub fn rollover(due_date: i64, now: &DateTime<Tz>) -> Result<Option<i64>, ResolveError> {
    let tz = now.timezone();
    let today = now.date_naive();
    let due_day = from_millis(due_date, &tz).date_naive();
    if due_day >= today {
        return Ok(None);
    }

    let target = add_months_clamped(today, 1, due_day.day())
        .ok_or(ResolveError::MonthOverflow { date: today })?;
    let midnight = local_datetime(&tz, target, 0, 0).ok_or(ResolveError::NoLocalTime {
        date: target,
        tz: tz.name(),
    })?;

    Ok(Some(midnight.timestamp_millis()))
}
