use std::path::Path;

use anyhow::Context;
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::alert::UrgentAlerts;
use crate::cli::{CardArg, Command};
use crate::console::{FileNotifier, FileTriggerTable, TerminalAlert};
use crate::datetime::parse_date_expr;
use crate::form::{ConfigForm, FormEntry};
use crate::host::NotificationKey;
use crate::render::Renderer;
use crate::scheduler::{AlarmOutcome, DispatchOutcome, HostContext};
use crate::widget::WidgetService;

#[instrument(skip(service, renderer, data_dir, command, now))]
pub async fn dispatch(
    service: &WidgetService,
    renderer: &mut Renderer,
    data_dir: &Path,
    command: Command,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    debug!(?command, now = %now, "dispatching command");

    match command {
        Command::Show { widget, width } => cmd_show(service, renderer, widget, width, now),
        Command::Configure { widget, cards } => {
            cmd_configure(service, renderer, data_dir, widget, &cards, now).await
        }
        Command::Add { widget, name, due } => {
            cmd_add(service, renderer, data_dir, widget, name, due.as_deref(), now).await
        }
        Command::Remove { widget, index } => {
            cmd_remove(service, renderer, data_dir, widget, index, now).await
        }
        Command::Delete { widget } => cmd_delete(service, data_dir, widget, now).await,
        Command::List => cmd_list(service, renderer, now),
        Command::Triggers => cmd_triggers(renderer, data_dir, now),
        Command::Tick => cmd_tick(service, data_dir, now),
        Command::Stop => cmd_stop(data_dir),
        Command::Reschedule => cmd_reschedule(service, renderer, data_dir, now).await,
        Command::Notifications => cmd_notifications(renderer, data_dir),
    }
}

#[instrument(skip(service, renderer, now))]
fn cmd_show(
    service: &WidgetService,
    renderer: &mut Renderer,
    widget: u32,
    width: Option<u32>,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command show");
    let view = service.refresh(widget, &now, width);
    renderer.print_widget(widget, &view)
}

#[instrument(skip(service, renderer, data_dir, cards, now))]
async fn cmd_configure(
    service: &WidgetService,
    renderer: &mut Renderer,
    data_dir: &Path,
    widget: u32,
    cards: &[CardArg],
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command configure");

    // Cards keep their identity across a full replace when the name matches.
    let existing = service.load_form(widget, &now)?;
    let mut entries = Vec::with_capacity(cards.len());
    for card in cards {
        let due = parse_date_expr(&card.due, now)
            .with_context(|| format!("invalid due date for {}", card.name))?;
        let id = existing
            .entries()
            .iter()
            .find(|entry| entry.name.trim() == card.name)
            .filter(|entry| !entries.iter().any(|e: &FormEntry| e.id == entry.id))
            .map(|entry| entry.id)
            .unwrap_or_else(Uuid::new_v4);
        entries.push(FormEntry {
            id,
            name: card.name.clone(),
            due_date: due.timestamp_millis(),
        });
    }
    let form = ConfigForm::from_entries(entries)?;

    let mut triggers = FileTriggerTable::open(data_dir)?;
    let outcome = service.configure(widget, &form, &now, &mut triggers).await?;
    println!(
        "Configured widget {widget} with {} card(s).",
        outcome.store.len()
    );
    renderer.print_schedule_report(&outcome.schedule)
}

#[instrument(skip(service, renderer, data_dir, now))]
async fn cmd_add(
    service: &WidgetService,
    renderer: &mut Renderer,
    data_dir: &Path,
    widget: u32,
    name: Option<String>,
    due: Option<&str>,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command add");

    let due_date = due
        .map(|raw| parse_date_expr(raw, now).map(|dt| dt.timestamp_millis()))
        .transpose()
        .context("invalid due date")?;

    let mut triggers = FileTriggerTable::open(data_dir)?;
    let outcome = service
        .add_card(widget, name, due_date, &now, &mut triggers)
        .await?;
    println!(
        "Added card to widget {widget} ({} card(s)).",
        outcome.store.len()
    );
    renderer.print_schedule_report(&outcome.schedule)
}

#[instrument(skip(service, renderer, data_dir, now))]
async fn cmd_remove(
    service: &WidgetService,
    renderer: &mut Renderer,
    data_dir: &Path,
    widget: u32,
    index: usize,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command remove");

    let mut triggers = FileTriggerTable::open(data_dir)?;
    let outcome = service
        .remove_card(widget, index, &now, &mut triggers)
        .await?;
    println!(
        "Removed card {index} from widget {widget} ({} left).",
        outcome.store.len()
    );
    renderer.print_schedule_report(&outcome.schedule)
}

#[instrument(skip(service, data_dir, now))]
async fn cmd_delete(
    service: &WidgetService,
    data_dir: &Path,
    widget: u32,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command delete");

    let mut triggers = FileTriggerTable::open(data_dir)?;
    let report = service.delete(widget, &now, &mut triggers).await?;
    println!(
        "Deleted widget {widget}; cancelled {} trigger(s).",
        report.cancelled
    );
    Ok(())
}

#[instrument(skip(service, renderer, now))]
fn cmd_list(
    service: &WidgetService,
    renderer: &mut Renderer,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command list");

    let mut widgets = Vec::new();
    for id in service.store().widget_ids()? {
        let cards = service.store().load(id, &now)?;
        widgets.push((id, cards.len()));
    }
    renderer.print_widget_list(&widgets)
}

#[instrument(skip(renderer, data_dir, now))]
fn cmd_triggers(renderer: &mut Renderer, data_dir: &Path, now: DateTime<Tz>) -> anyhow::Result<()> {
    info!("command triggers");
    let table = FileTriggerTable::open(data_dir)?;
    renderer.print_triggers(&table.pending(), &now.timezone())
}

#[instrument(skip(service, data_dir, now))]
fn cmd_tick(service: &WidgetService, data_dir: &Path, now: DateTime<Tz>) -> anyhow::Result<()> {
    info!("command tick");

    let mut triggers = FileTriggerTable::open(data_dir)?;
    let mut notifier = FileNotifier::open(data_dir)?;
    let mut output = TerminalAlert;
    let mut alerts = UrgentAlerts::new();

    let due = triggers.take_due(&now)?;
    let mut ctx = HostContext {
        triggers: &mut triggers,
        notifier: &mut notifier,
        output: &mut output,
        alerts: &mut alerts,
    };

    let mut reminded = 0usize;
    let mut escalated = 0usize;
    for trigger in &due {
        match service.scheduler().dispatch(trigger, &now, &mut ctx) {
            DispatchOutcome::Reminded => reminded += 1,
            DispatchOutcome::Alarm(AlarmOutcome::Escalated { .. }) => {
                escalated += 1;
            }
            other => debug!(trigger = %trigger.id, ?other, "trigger handled"),
        }
    }

    println!(
        "Fired {} trigger(s): {reminded} reminder(s), {escalated} alarm(s).",
        due.len()
    );
    Ok(())
}

#[instrument(skip(data_dir))]
fn cmd_stop(data_dir: &Path) -> anyhow::Result<()> {
    info!("command stop");

    let mut notifier = FileNotifier::open(data_dir)?;
    let was_showing = notifier
        .shown()
        .any(|note| note.key == NotificationKey::Urgent);

    UrgentAlerts::new().stop(&mut notifier, &mut TerminalAlert);

    if was_showing {
        println!("Alarm stopped.");
    } else {
        println!("No alarm was sounding.");
    }
    Ok(())
}

#[instrument(skip(service, renderer, data_dir, now))]
async fn cmd_reschedule(
    service: &WidgetService,
    renderer: &mut Renderer,
    data_dir: &Path,
    now: DateTime<Tz>,
) -> anyhow::Result<()> {
    info!("command reschedule");

    let mut triggers = FileTriggerTable::open(data_dir)?;
    let report = service.reschedule_all(&now, &mut triggers).await?;
    renderer.print_schedule_report(&report)
}

#[instrument(skip(renderer, data_dir))]
fn cmd_notifications(renderer: &mut Renderer, data_dir: &Path) -> anyhow::Result<()> {
    info!("command notifications");
    let notifier = FileNotifier::open(data_dir)?;
    renderer.print_notifications(notifier.shown())
}
