//! Persisted settings stores with a change notification feed
//!
//! Every successful write broadcasts a [`StorageChange`] holding only the
//! keys whose values changed, to every subscribed context.

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::settings::{Settings, StorageChange};
use crate::constants::config::{APP_DIR, CHANGE_FEED_CAPACITY, FILENAME};

pub trait ConfigStore {
    /// Current settings, with defaults for anything not stored
    fn load(&self) -> Result<Settings>;

    /// Replace the stored settings and notify subscribers of changed keys
    fn save(&self, settings: &Settings) -> Result<()>;

    /// Change notification feed
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

impl<T: ConfigStore + ?Sized> ConfigStore for Arc<T> {
    fn load(&self) -> Result<Settings> {
        (**self).load()
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        (**self).save(settings)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        (**self).subscribe()
    }
}

fn notify(changes: &broadcast::Sender<StorageChange>, previous: &Settings, next: &Settings) {
    let change = previous.diff(next);
    if change.is_empty() {
        debug!("settings write changed nothing, no notification");
        return;
    }
    // No subscribers is not an error
    let receivers = changes.send(change).unwrap_or(0);
    debug!(receivers, "broadcast settings change");
}

// ==============================================================================
// JSON file store
// ==============================================================================

/// Settings persisted as pretty-printed JSON
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            path: path.into(),
            changes,
        }
    }

    /// Store at the platform config location (`~/.config/timeflip/settings.json` on Linux)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().context("Failed to determine config directory (no XDG_CONFIG_HOME or HOME)")?;
        path.push(APP_DIR);
        path.push(FILENAME);
        Ok(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Settings> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(e).context(format!("Failed to read settings file {}", self.path.display()));
            }
        };
        let mut settings: Settings = serde_json::from_str(&contents)
            .context(format!("Failed to parse settings file {}", self.path.display()))?;
        settings.validate();
        Ok(settings)
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<Settings> {
        self.read()
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        // An unreadable previous file still gets overwritten; every key counts as changed
        let previous = self.read().unwrap_or_default();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(settings)
            .context("Failed to serialize settings to JSON")?;
        fs::write(&self.path, contents)
            .context(format!("Failed to write settings file to {}", self.path.display()))?;
        info!(path = %self.path.display(), mode = %settings.mode, "saved settings");

        notify(&self.changes, &previous, settings);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// ==============================================================================
// In-memory store
// ==============================================================================

/// Process-local store shared between contexts through `Arc`
#[derive(Debug)]
pub struct MemoryStore {
    settings: Mutex<Settings>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            settings: Mutex::new(settings),
            changes,
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Settings> {
        let settings = self.settings.lock().map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(settings.clone())
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let previous = {
            let mut stored = self.settings.lock().map_err(|_| anyhow!("settings lock poisoned"))?;
            std::mem::replace(&mut *stored, settings.clone())
        };
        notify(&self.changes, &previous, settings);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
