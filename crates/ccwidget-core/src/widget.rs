use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::card::CardStore;
use crate::datastore::DataStore;
use crate::display::{WidgetView, is_compact};
use crate::form::{ConfigForm, FormError};
use crate::host::TriggerHost;
use crate::resolver::resolve;
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::writer::StoreWriter;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error(transparent)]
    Form(#[from] FormError),

    #[error("Failed to load configuration")]
    Load(#[source] BoxError),

    #[error("Failed to save configuration")]
    Save(#[source] BoxError),

    #[error("Failed to delete configuration")]
    Delete(#[source] BoxError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub store: CardStore,
    pub schedule: ScheduleReport,
}

/// Ties storage, the background writer, and the reminder scheduler
/// together for every widget instance.
#[derive(Debug)]
pub struct WidgetService {
    store: Arc<DataStore>,
    writer: StoreWriter,
    scheduler: Scheduler,
}

impl WidgetService {
    pub fn new(store: Arc<DataStore>, writer: StoreWriter, scheduler: Scheduler) -> Self {
        Self {
            store,
            writer,
            scheduler,
        }
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Builds the view for a widget. Never fails: storage errors give the
    /// error view, resolution errors the degraded one. A rollover is queued
    /// for write-back without waiting on it.
    #[instrument(skip(self, now))]
    pub fn refresh(&self, widget_id: u32, now: &DateTime<Tz>, width: Option<u32>) -> WidgetView {
        let store = match self.store.load(widget_id, now) {
            Ok(store) => store,
            Err(err) => {
                warn!(widget_id, error = %format!("{err:#}"), "failed to load widget cards");
                return WidgetView::error(widget_id);
            }
        };

        let resolved = match resolve(&store, now) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(widget_id, error = %err, "failed to resolve widget cards");
                return WidgetView::degraded(widget_id);
            }
        };

        if let Some(rolled) = &resolved.rolled_over_store {
            debug!(widget_id, "queueing rollover write-back");
            drop(self.writer.enqueue_save(widget_id, rolled.clone()));
        }

        WidgetView::from_resolved(widget_id, &resolved, now, is_compact(width))
    }

    #[instrument(skip(self, now))]
    pub fn load_form(&self, widget_id: u32, now: &DateTime<Tz>) -> Result<ConfigForm, WidgetError> {
        let store = self.load(widget_id, now)?;
        Ok(ConfigForm::from_store(&store, now))
    }

    /// Validates `form`, writes it as the widget's full card list, then
    /// moves the widget's triggers from the old cards to the new ones.
    /// Triggers are left alone when the write fails.
    #[instrument(skip(self, form, now, host), fields(cards = form.len()))]
    pub async fn configure(
        &self,
        widget_id: u32,
        form: &ConfigForm,
        now: &DateTime<Tz>,
        host: &mut dyn TriggerHost,
    ) -> Result<SaveOutcome, WidgetError> {
        let next = form.into_store(now)?;
        let previous = self.load(widget_id, now)?;

        self.writer
            .enqueue_save(widget_id, next.clone())
            .wait()
            .await
            .map_err(|err| WidgetError::Save(err.into()))?;

        let schedule = self
            .scheduler
            .reschedule(widget_id, &previous, &next, now, host);
        info!(widget_id, cards = next.len(), "widget configured");

        Ok(SaveOutcome {
            store: next,
            schedule,
        })
    }

    #[instrument(skip(self, now, host))]
    pub async fn add_card(
        &self,
        widget_id: u32,
        name: Option<String>,
        due_date: Option<i64>,
        now: &DateTime<Tz>,
        host: &mut dyn TriggerHost,
    ) -> Result<SaveOutcome, WidgetError> {
        let mut form = self.load_form(widget_id, now)?;
        let entry = form.add_entry(now)?;
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(due_date) = due_date {
            entry.due_date = due_date;
        }
        self.configure(widget_id, &form, now, host).await
    }

    #[instrument(skip(self, now, host))]
    pub async fn remove_card(
        &self,
        widget_id: u32,
        index: usize,
        now: &DateTime<Tz>,
        host: &mut dyn TriggerHost,
    ) -> Result<SaveOutcome, WidgetError> {
        let mut form = self.load_form(widget_id, now)?;
        let removed = form.remove_entry(index)?;
        debug!(widget_id, card_id = %removed.id, "removing card");
        self.configure(widget_id, &form, now, host).await
    }

    /// Forgets a widget: its triggers are cancelled and its file removed.
    #[instrument(skip(self, now, host))]
    pub async fn delete(
        &self,
        widget_id: u32,
        now: &DateTime<Tz>,
        host: &mut dyn TriggerHost,
    ) -> Result<ScheduleReport, WidgetError> {
        let report = match self.store.load(widget_id, now) {
            Ok(store) => self.scheduler.cancel_all(&store, host),
            Err(err) => {
                warn!(widget_id, error = %format!("{err:#}"), "could not read cards of deleted widget");
                ScheduleReport::default()
            }
        };

        self.writer
            .enqueue_delete(widget_id)
            .wait()
            .await
            .map_err(|err| WidgetError::Delete(err.into()))?;

        info!(widget_id, cancelled = report.cancelled, "widget deleted");
        Ok(report)
    }

    /// Re-registers triggers for every stored widget, applying any pending
    /// rollover first so rolled cards get reminders for their new month.
    #[instrument(skip(self, now, host))]
    pub async fn reschedule_all(
        &self,
        now: &DateTime<Tz>,
        host: &mut dyn TriggerHost,
    ) -> Result<ScheduleReport, WidgetError> {
        let ids = self
            .store
            .widget_ids()
            .map_err(|err| WidgetError::Load(err.into()))?;

        let mut total = ScheduleReport::default();
        for widget_id in ids {
            let stored = self.load(widget_id, now)?;
            let effective = match resolve(&stored, now) {
                Ok(resolved) => match resolved.rolled_over_store {
                    Some(rolled) => {
                        self.writer
                            .enqueue_save(widget_id, rolled.clone())
                            .wait()
                            .await
                            .map_err(|err| WidgetError::Save(err.into()))?;
                        rolled
                    }
                    None => stored.clone(),
                },
                Err(err) => {
                    warn!(widget_id, error = %err, "scheduling stored cards without rollover");
                    stored.clone()
                }
            };

            let report = self
                .scheduler
                .reschedule(widget_id, &stored, &effective, now, host);
            total += report;
        }

        info!(scheduled = total.scheduled, failed = total.failed, "rescheduled all widgets");
        Ok(total)
    }

    fn load(&self, widget_id: u32, now: &DateTime<Tz>) -> Result<CardStore, WidgetError> {
        self.store
            .load(widget_id, now)
            .map_err(|err| WidgetError::Load(err.into()))
    }
}
