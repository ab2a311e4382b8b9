use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

use crate::card::DEFAULT_CARD_NAME;
use crate::datetime::{day_difference, format_short_date, from_millis};
use crate::resolver::{ColorTier, ResolvedDisplay};

/// Widgets narrower than this (in host units) use the compact layout.
pub const COMPACT_WIDTH_THRESHOLD: u32 = 180;

pub const NEUTRAL_HEX: &str = "#9E9E9E";

pub const ERROR_TEXT: &str = "Error. Tap to retry.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaysDisplay {
    pub text: String,
    pub label: &'static str,
    pub tier: ColorTier,
}

pub fn days_display(days_remaining: i64, compact: bool) -> DaysDisplay {
    let tier = ColorTier::from_days(days_remaining);
    let (text, label) = match days_remaining {
        d if d < 0 => (if compact { "DUE" } else { "OVERDUE" }.to_string(), ""),
        0 => (if compact { "DUE" } else { "TODAY" }.to_string(), ""),
        1 => ("1".to_string(), "day"),
        d => (d.to_string(), "days"),
    };
    DaysDisplay { text, label, tier }
}

pub fn is_compact(width: Option<u32>) -> bool {
    width.is_some_and(|w| w < COMPACT_WIDTH_THRESHOLD)
}

/// Opens the configuration screen for a widget when the view is tapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClickTarget {
    pub widget_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardSlot {
    pub card_id: Option<Uuid>,
    pub name: String,
    pub due_text: String,
    pub days_text: String,
    pub label: &'static str,
    pub tier: ColorTier,
    pub color: &'static str,
}

impl CardSlot {
    fn placeholder() -> Self {
        Self {
            card_id: None,
            name: DEFAULT_CARD_NAME.to_string(),
            due_text: "---".to_string(),
            days_text: "--".to_string(),
            label: "days",
            tier: ColorTier::Safe,
            color: NEUTRAL_HEX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum WidgetView {
    Cards {
        headline: String,
        slots: Vec<CardSlot>,
        click: ClickTarget,
    },
    Degraded {
        slot: CardSlot,
        click: ClickTarget,
    },
    Error {
        message: String,
        click: ClickTarget,
    },
}

impl WidgetView {
    pub fn from_resolved(
        widget_id: u32,
        resolved: &ResolvedDisplay,
        now: &DateTime<Tz>,
        compact: bool,
    ) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();

        let slots = resolved
            .cards
            .iter()
            .map(|card| {
                let due = from_millis(card.due_date, &tz);
                let days = days_display(day_difference(today, due.date_naive()), compact);
                CardSlot {
                    card_id: Some(card.id),
                    name: card.name.clone(),
                    due_text: format_short_date(&due),
                    days_text: days.text,
                    label: days.label,
                    tier: days.tier,
                    color: days.tier.hex(),
                }
            })
            .collect();

        let mut headline = resolved.primary_card.name.clone();
        if resolved.total_cards > 1 {
            headline.push_str(&format!(" (+{} more)", resolved.total_cards - 1));
        }

        Self::Cards {
            headline,
            slots,
            click: ClickTarget { widget_id },
        }
    }

    pub fn degraded(widget_id: u32) -> Self {
        Self::Degraded {
            slot: CardSlot::placeholder(),
            click: ClickTarget { widget_id },
        }
    }

    pub fn error(widget_id: u32) -> Self {
        Self::Error {
            message: ERROR_TEXT.to_string(),
            click: ClickTarget { widget_id },
        }
    }

    pub fn click(&self) -> ClickTarget {
        match self {
            Self::Cards { click, .. } | Self::Degraded { click, .. } | Self::Error { click, .. } => {
                *click
            }
        }
    }
}
