use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::display::{CardSlot, WidgetView};
use crate::host::Notification;
use crate::resolver::ColorTier;
use crate::scheduler::{ScheduleReport, Trigger, TriggerKind};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or("on");
        let color = match color_cfg.trim().to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, view))]
    pub fn print_widget(&mut self, widget_id: u32, view: &WidgetView) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_widget(&mut out, widget_id, view)
    }

    fn write_widget<W: Write>(
        &self,
        mut out: W,
        widget_id: u32,
        view: &WidgetView,
    ) -> anyhow::Result<()> {
        match view {
            WidgetView::Cards {
                headline, slots, ..
            } => {
                writeln!(out, "widget {widget_id}: {headline}")?;
                let headers = vec![
                    "#".to_string(),
                    "Card".to_string(),
                    "Due".to_string(),
                    "Days".to_string(),
                ];
                let rows = slots
                    .iter()
                    .enumerate()
                    .map(|(idx, slot)| {
                        vec![
                            idx.to_string(),
                            slot.name.clone(),
                            slot.due_text.clone(),
                            self.days_cell(slot),
                        ]
                    })
                    .collect();
                write_table(&mut out, headers, rows)?;
            }
            WidgetView::Degraded { slot, .. } => {
                writeln!(
                    out,
                    "widget {widget_id}: {}  {}  {}",
                    slot.name,
                    slot.due_text,
                    self.days_cell(slot)
                )?;
            }
            WidgetView::Error { message, .. } => {
                writeln!(out, "widget {widget_id}: {}", self.paint(message, "31"))?;
            }
        }
        Ok(())
    }

    fn days_cell(&self, slot: &CardSlot) -> String {
        let text = if slot.label.is_empty() {
            slot.days_text.clone()
        } else {
            format!("{} {}", slot.days_text, slot.label)
        };
        let code = if slot.card_id.is_none() {
            "90"
        } else {
            tier_code(slot.tier)
        };
        self.paint(&text, code)
    }

    #[tracing::instrument(skip(self, widgets))]
    pub fn print_widget_list(&mut self, widgets: &[(u32, usize)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if widgets.is_empty() {
            writeln!(out, "No widgets configured.")?;
            return Ok(());
        }
        let headers = vec!["Widget".to_string(), "Cards".to_string()];
        let rows = widgets
            .iter()
            .map(|(id, cards)| vec![self.paint(&id.to_string(), "33"), cards.to_string()])
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, triggers, tz))]
    pub fn print_triggers(&mut self, triggers: &[&Trigger], tz: &Tz) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if triggers.is_empty() {
            writeln!(out, "No pending triggers.")?;
            return Ok(());
        }
        let headers = vec![
            "Fires".to_string(),
            "Widget".to_string(),
            "Card".to_string(),
            "Kind".to_string(),
        ];
        let rows = triggers
            .iter()
            .map(|t| {
                let kind = match t.id.kind {
                    TriggerKind::Reminder { days_before } => format!("reminder -{days_before}d"),
                    TriggerKind::AlarmWindow => self.paint("alarm", "31"),
                    TriggerKind::AutoStop => "auto-stop".to_string(),
                };
                vec![
                    t.fire_at.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string(),
                    t.payload.widget_id.to_string(),
                    t.payload.card_name.clone(),
                    kind,
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, notifications))]
    pub fn print_notifications<'a, I>(&mut self, notifications: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = &'a Notification>,
    {
        let mut out = io::stdout().lock();
        let mut any = false;
        for note in notifications {
            any = true;
            let title = if note.ongoing {
                self.paint(&note.title, "31")
            } else {
                note.title.clone()
            };
            writeln!(out, "[{}] {title}", note.key)?;
            writeln!(out, "    {}", note.message)?;
            if !note.actions.is_empty() {
                writeln!(out, "    actions: {}", note.actions.join(", "))?;
            }
        }
        if !any {
            writeln!(out, "No notifications.")?;
        }
        Ok(())
    }

    pub fn print_schedule_report(&mut self, report: &ScheduleReport) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write!(
            out,
            "Scheduled {} trigger(s), skipped {} past",
            report.scheduled, report.skipped_past
        )?;
        if report.failed > 0 {
            write!(out, ", {}", self.paint(&format!("{} failed", report.failed), "31"))?;
        }
        writeln!(out, ".")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn tier_code(tier: ColorTier) -> &'static str {
    match tier {
        ColorTier::Critical => "31",
        ColorTier::Warning => "33",
        ColorTier::Caution => "93",
        ColorTier::Safe => "32",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
