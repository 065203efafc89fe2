//! Apply/revert orchestration over a single document
//!
//! [`RewriteEngine`] owns the document, the cached settings for this page,
//! the mutation watcher, and the re-entrancy flags. Apply and revert never
//! overlap: each raises its flag through a guard that lowers it on every
//! exit path, including errors and unwinding.

mod walk;

pub use walk::walk;

use std::cell::Cell;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, StorageChange};
use crate::constants::markers::{ORIGINAL_ATTR, PROCESSED_ATTR};
use crate::convert::ConversionMode;
use crate::dom::Document;
use crate::watcher::MutationWatcher;

/// Raises a flag for the lifetime of the guard
struct FlagGuard<'a>(&'a Cell<bool>);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Cached settings plus the activation state derived from them for one hostname
#[derive(Debug, Clone)]
pub struct PageState {
    settings: Settings,
    hostname: String,
    active: bool,
}

impl PageState {
    pub fn new(settings: Settings, hostname: &str) -> Self {
        let active = settings.is_active_for(hostname);
        Self {
            settings,
            hostname: hostname.to_string(),
            active,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn mode(&self) -> ConversionMode {
        self.settings.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn replace(&mut self, settings: Settings) {
        self.settings = settings;
        self.active = self.settings.is_active_for(&self.hostname);
    }

    pub fn merge(&mut self, change: &StorageChange) {
        self.settings.apply_change(change);
        self.active = self.settings.is_active_for(&self.hostname);
    }
}

/// Counters for passes over the document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub passes: u64,
    pub conversions: u64,
    pub reverts: u64,
    pub restored: u64,
}

#[derive(Debug)]
pub struct RewriteEngine {
    document: Document,
    state: PageState,
    watcher: MutationWatcher,
    processing: Cell<bool>,
    reverting: Cell<bool>,
    /// Mode of the conversions currently on the page
    rendered: Option<ConversionMode>,
    stats: PassStats,
}

impl RewriteEngine {
    pub fn new(document: Document, settings: Settings, watcher: MutationWatcher) -> Self {
        let state = PageState::new(settings, document.hostname());
        Self {
            document,
            state,
            watcher,
            processing: Cell::new(false),
            reverting: Cell::new(false),
            rendered: None,
            stats: PassStats::default(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Page-side access to the document (page scripts, loader)
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    pub fn watcher(&self) -> &MutationWatcher {
        &self.watcher
    }

    pub fn is_processing(&self) -> bool {
        self.processing.get()
    }

    pub fn is_reverting(&self) -> bool {
        self.reverting.get()
    }

    pub fn rendered_mode(&self) -> Option<ConversionMode> {
        self.rendered
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.watcher.deadline()
    }

    /// Convert every eligible text node under the body. Returns the number of
    /// conversions made by this pass. Conversions left by a pass in the other
    /// mode are reverted first so the page never mixes modes.
    pub fn apply(&mut self, mode: ConversionMode) -> usize {
        if self.processing.get() {
            debug!("apply skipped: pass already in progress");
            return 0;
        }
        let Some(body) = self.document.body() else {
            debug!("apply skipped: document has no body yet");
            return 0;
        };
        if !self.state.is_active() {
            debug!(host = %self.state.hostname(), "apply skipped: site inactive");
            return 0;
        }

        if let Some(rendered) = self.rendered.filter(|rendered| *rendered != mode) {
            info!(from = %rendered, to = %mode, "mode changed, reverting before re-apply");
            self.revert();
        }

        let _guard = FlagGuard::raise(&self.processing);
        let mut converted = 0;
        if let Err(e) = walk(&mut self.document, body, mode, &mut converted) {
            error!(error = ?e, converted, "error applying conversion, page left partially converted");
        }
        // This pass already covered everything its own replacements touched
        let own_records = self.document.take_records();
        if converted > 0 {
            self.rendered = Some(mode);
        }

        self.stats.passes += 1;
        self.stats.conversions += converted as u64;
        debug!(mode = %mode, converted, records = own_records.len(), "apply pass finished");
        converted
    }

    /// Replace every converted element with its original text. Returns the
    /// number of elements restored.
    pub fn revert(&mut self) -> usize {
        if self.document.body().is_none() {
            return 0;
        }

        let _guard = FlagGuard::raise(&self.reverting);
        if self.watcher.cancel() {
            debug!("cancelled pending re-apply");
        }

        let mut restored = 0;
        for element in self.document.elements_with_attribute(PROCESSED_ATTR) {
            let Some(original) = self.document.get_attribute(element, ORIGINAL_ATTR).map(str::to_string) else {
                warn!(node = ?element, "converted element has no original text, leaving it");
                continue;
            };
            let text = self.document.create_text_node(&original);
            match self.document.replace_with(element, text) {
                Ok(()) => restored += 1,
                Err(e) => warn!(error = ?e, node = ?element, "failed to restore converted element"),
            }
        }

        self.rendered = None;

        // Observed while still reverting, so the watcher drops them
        let records = self.document.take_records();
        self.watcher
            .on_mutations(&records, self.reverting.get(), self.state.is_active(), Instant::now());

        self.stats.reverts += 1;
        self.stats.restored += restored as u64;
        debug!(restored, "revert finished");
        restored
    }

    /// Feed pending mutation records to the watcher. Returns whether a
    /// re-apply got scheduled.
    pub fn deliver_mutations(&mut self, now: Instant) -> bool {
        let records = self.document.take_records();
        self.watcher
            .on_mutations(&records, self.reverting.get(), self.state.is_active(), now)
    }

    /// Run the debounced re-apply if its deadline has passed
    pub fn poll_debounce(&mut self, now: Instant) -> bool {
        if !self.watcher.take_due(now) {
            return false;
        }
        if self.reverting.get() || !self.state.is_active() {
            debug!("debounced re-apply dropped: reverting or inactive");
            return false;
        }
        let converted = self.apply(self.state.mode());
        debug!(converted, "debounced re-apply ran");
        true
    }

    /// Direct settings update for this page: revert if newly inactive,
    /// revert then re-apply on a mode switch, re-apply otherwise.
    /// Both are judged against what the page shows, so a change already
    /// merged from storage still reverts.
    pub fn update_settings(&mut self, settings: Settings) {
        let was_active = self.state.is_active();
        self.state.replace(settings);

        if !self.state.is_active() {
            if was_active || self.rendered.is_some() {
                info!(host = %self.state.hostname(), "deactivated, reverting conversions");
                self.revert();
            }
            return;
        }
        self.apply(self.state.mode());
    }

    /// Passive refresh from the storage change feed. Never applies or reverts.
    pub fn refresh_settings(&mut self, change: &StorageChange) {
        self.state.merge(change);
        debug!(active = self.state.is_active(), mode = %self.state.mode(), "settings refreshed from storage");
    }
}
