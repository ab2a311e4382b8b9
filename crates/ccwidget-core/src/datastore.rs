use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::card::CardStore;

const WIDGET_FILE_PREFIX: &str = "widget-";
const WIDGET_FILE_SUFFIX: &str = ".json";

/// Per-widget card lists, one JSON file each.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    pub fn widget_path(&self, widget_id: u32) -> PathBuf {
        self.data_dir
            .join(format!("{WIDGET_FILE_PREFIX}{widget_id}{WIDGET_FILE_SUFFIX}"))
    }

    /// Reads the raw persisted text. A missing file reads as `None`.
    #[tracing::instrument(skip(self))]
    pub fn load_raw(&self, widget_id: u32) -> anyhow::Result<Option<String>> {
        let path = self.widget_path(widget_id);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    /// Loads the card list for a widget. Absent or unusable data yields the
    /// default store; only an unreadable file is an error.
    #[tracing::instrument(skip(self, now))]
    pub fn load(&self, widget_id: u32, now: &DateTime<Tz>) -> anyhow::Result<CardStore> {
        let raw = self.load_raw(widget_id)?;
        let store = CardStore::decode(raw.as_deref().unwrap_or_default(), widget_id, now);
        debug!(widget_id, cards = store.len(), "loaded widget cards");
        Ok(store)
    }

    /// Whole-record overwrite.
    #[tracing::instrument(skip(self, store), fields(cards = store.len()))]
    pub fn save(&self, widget_id: u32, store: &CardStore) -> anyhow::Result<()> {
        let path = self.widget_path(widget_id);
        write_json_atomic(&path, store)
            .with_context(|| format!("failed to save cards for widget {widget_id}"))
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&self, widget_id: u32) -> anyhow::Result<()> {
        let path = self.widget_path(widget_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(widget_id, "deleted widget cards");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(widget_id, "no stored cards to delete");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }

    /// Every widget id with a stored card file, ascending.
    #[tracing::instrument(skip(self))]
    pub fn widget_ids(&self) -> anyhow::Result<Vec<u32>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.data_dir)
            .with_context(|| format!("failed to read {}", self.data_dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = name
                .strip_prefix(WIDGET_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(WIDGET_FILE_SUFFIX))
                .and_then(|id| id.parse::<u32>().ok())
            else {
                continue;
            };
            ids.push(id);
        }
        ids.sort_unstable();
        debug!(count = ids.len(), "listed stored widgets");
        Ok(ids)
    }
}

#[tracing::instrument(skip(path, value))]
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving json atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut temp, value)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
