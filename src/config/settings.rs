//! User settings shared by the content script and the settings surface
//!
//! Stored as camelCase JSON so the on-disk shape matches the key-value
//! layout both contexts exchange (`mode`, `globallyEnabled`,
//! `disabledSites`, `enabledSites`).

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::convert::ConversionMode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub mode: ConversionMode,

    /// Selects blacklist (true, `disabled_sites`) or whitelist (false, `enabled_sites`) semantics
    #[serde(default)]
    pub globally_enabled: bool,

    /// Opt-out hostnames, consulted when globally enabled
    #[serde(default)]
    pub disabled_sites: Vec<String>,

    /// Opt-in hostnames, consulted when globally disabled
    #[serde(default)]
    pub enabled_sites: Vec<String>,
}

/// Keys that changed in a settings write, with their new values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ConversionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globally_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_sites: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_sites: Option<Vec<String>>,
}

impl StorageChange {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.globally_enabled.is_none()
            && self.disabled_sites.is_none()
            && self.enabled_sites.is_none()
    }
}

/// Canonical form of a hostname for site lists
pub fn normalize_hostname(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl Settings {
    /// Whether conversion runs on `hostname` under the current list semantics
    pub fn is_active_for(&self, hostname: &str) -> bool {
        let host = normalize_hostname(hostname);
        if self.globally_enabled {
            !self.disabled_sites.iter().any(|site| *site == host)
        } else {
            self.enabled_sites.iter().any(|site| *site == host)
        }
    }

    /// Copy with `hostname` switched on or off, editing whichever list the
    /// current `globally_enabled` value makes authoritative
    pub fn with_site_enabled(&self, hostname: &str, enabled: bool) -> Settings {
        let host = normalize_hostname(hostname);
        let mut next = self.clone();
        let (list, present) = if self.globally_enabled {
            (&mut next.disabled_sites, !enabled)
        } else {
            (&mut next.enabled_sites, enabled)
        };
        if present {
            if !list.contains(&host) {
                list.push(host);
            }
        } else {
            list.retain(|site| *site != host);
        }
        next
    }

    /// Merge a change notification into this cached copy
    pub fn apply_change(&mut self, change: &StorageChange) {
        if let Some(mode) = change.mode {
            self.mode = mode;
        }
        if let Some(enabled) = change.globally_enabled {
            self.globally_enabled = enabled;
        }
        if let Some(sites) = &change.disabled_sites {
            self.disabled_sites = sites.clone();
        }
        if let Some(sites) = &change.enabled_sites {
            self.enabled_sites = sites.clone();
        }
    }

    /// Keys whose values differ in `newer`
    pub fn diff(&self, newer: &Settings) -> StorageChange {
        StorageChange {
            mode: (self.mode != newer.mode).then_some(newer.mode),
            globally_enabled: (self.globally_enabled != newer.globally_enabled)
                .then_some(newer.globally_enabled),
            disabled_sites: (self.disabled_sites != newer.disabled_sites)
                .then(|| newer.disabled_sites.clone()),
            enabled_sites: (self.enabled_sites != newer.enabled_sites)
                .then(|| newer.enabled_sites.clone()),
        }
    }

    /// Normalize site lists in place (trim, lower-case, drop empties and duplicates)
    /// Called after loading from disk and on direct updates
    pub fn validate(&mut self) {
        for (key, list) in [
            ("disabledSites", &mut self.disabled_sites),
            ("enabledSites", &mut self.enabled_sites),
        ] {
            let before = list.len();
            let mut cleaned: Vec<String> = Vec::with_capacity(before);
            for site in list.iter() {
                let host = normalize_hostname(site);
                if host.is_empty() {
                    warn!(key, entry = %site, "dropping empty hostname");
                    continue;
                }
                if host != *site {
                    warn!(key, entry = %site, normalized = %host, "normalizing hostname");
                }
                if !cleaned.contains(&host) {
                    cleaned.push(host);
                }
            }
            if cleaned.len() != before {
                info!(key, before, after = cleaned.len(), "cleaned site list");
            }
            *list = cleaned;
        }
    }
}
