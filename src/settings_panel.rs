//! Settings surface controller
//!
//! Every change is applied optimistically, written to the store, then pushed
//! to the active tab's content script. A failed write rolls the panel back to
//! the last confirmed settings.

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, Settings, normalize_hostname};
use crate::constants::status;
use crate::constants::timing::STATUS_DURATION;
use crate::convert::ConversionMode;
use crate::ipc::{ContentRequest, TabMessenger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Error,
}

/// Status line shown after a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: &'static str,
    shown_at: Instant,
}

impl StatusMessage {
    fn success(text: &'static str) -> Self {
        Self {
            kind: StatusKind::Success,
            text,
            shown_at: Instant::now(),
        }
    }

    fn error() -> Self {
        Self {
            kind: StatusKind::Error,
            text: status::ERROR,
            shown_at: Instant::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }

    /// Whether the line is still on screen at `now`
    pub fn is_visible(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.shown_at) < STATUS_DURATION
    }
}

#[derive(Debug)]
pub struct SettingsPanel<S, M> {
    store: S,
    messenger: M,
    /// Last settings the store accepted
    current: Settings,
    status: Option<StatusMessage>,
}

impl<S: ConfigStore, M: TabMessenger> SettingsPanel<S, M> {
    /// Open the panel with the stored settings
    pub fn load(store: S, messenger: M) -> Result<Self> {
        let current = store.load().context("Failed to load settings for the settings panel")?;
        debug!(mode = %current.mode, globally_enabled = current.globally_enabled, "settings panel loaded");
        Ok(Self {
            store,
            messenger,
            current,
            status: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.current
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    /// Status line if it has not faded yet
    pub fn visible_status(&self, now: Instant) -> Option<&StatusMessage> {
        self.status.as_ref().filter(|status| status.is_visible(now))
    }

    /// Hostname of the active tab, if there is one
    pub fn active_host(&self) -> Option<String> {
        self.messenger.active_tab().map(|tab| normalize_hostname(&tab.hostname))
    }

    /// Whether conversion runs on the active tab
    pub fn is_active_tab_enabled(&self) -> bool {
        self.active_host()
            .is_some_and(|host| self.current.is_active_for(&host))
    }

    pub async fn select_mode(&mut self, mode: ConversionMode) -> Option<&StatusMessage> {
        let next = Settings {
            mode,
            ..self.current.clone()
        };
        self.commit(next).await
    }

    pub async fn set_globally_enabled(&mut self, enabled: bool) -> Option<&StatusMessage> {
        let next = Settings {
            globally_enabled: enabled,
            ..self.current.clone()
        };
        self.commit(next).await
    }

    /// Switch one site on or off. Edits `disabledSites` while globally
    /// enabled and `enabledSites` otherwise.
    pub async fn set_site_enabled(&mut self, hostname: &str, enabled: bool) -> Option<&StatusMessage> {
        if normalize_hostname(hostname).is_empty() {
            warn!(hostname, "ignoring empty hostname");
            return None;
        }
        let next = self.current.with_site_enabled(hostname, enabled);
        self.commit(next).await
    }

    /// Returns `None` when nothing changed.
    async fn commit(&mut self, next: Settings) -> Option<&StatusMessage> {
        if next == self.current {
            debug!("settings unchanged, nothing to commit");
            return None;
        }

        let previous = std::mem::replace(&mut self.current, next);
        if let Err(e) = self.store.save(&self.current) {
            error!(error = ?e, "Error applying settings");
            self.current = previous;
            self.status = Some(StatusMessage::error());
            return self.status.as_ref();
        }

        let status = match self.messenger.active_tab() {
            None => {
                debug!("no active tab, settings saved only");
                StatusMessage::success(status::SAVED)
            }
            Some(tab) => {
                let request = ContentRequest::update_state(&self.current);
                match self.messenger.send(&tab, request).await {
                    Ok(Some(response)) if response.success => {
                        info!(tab = tab.id, host = %tab.hostname, "settings applied to active tab");
                        StatusMessage::success(status::APPLIED)
                    }
                    Ok(Some(_)) => {
                        warn!(tab = tab.id, "content script did not accept the update");
                        StatusMessage::success(status::SAVED_NOT_APPLIED)
                    }
                    Ok(None) => {
                        info!(tab = tab.id, host = %tab.hostname, "no content script in active tab");
                        StatusMessage::success(status::SAVED_NOT_APPLIED)
                    }
                    Err(e) => {
                        warn!(error = ?e, tab = tab.id, "failed to message active tab");
                        StatusMessage::success(status::SAVED_NOT_APPLIED)
                    }
                }
            }
        };
        self.status = Some(status);
        self.status.as_ref()
    }
}
