//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// DOM markers attached to converted elements
pub mod markers {
    /// Boolean attribute identifying an element produced by a conversion
    pub const PROCESSED_ATTR: &str = "data-time-converted";

    /// Attribute holding the pre-conversion text, consumed by revert
    pub const ORIGINAL_ATTR: &str = "data-original";

    /// Tag of the inline container that replaces a converted text node
    pub const CONTAINER_TAG: &str = "SPAN";

    /// Inline style keeping the container from affecting layout
    pub const CONTAINER_STYLE: &str = "display: inline";
}

/// Traversal constants
pub mod traversal {
    /// Elements whose text is never rewritten and whose subtrees are never entered.
    /// Rewriting inside these either breaks functionality or touches non-prose content.
    pub const SKIP_TAGS: &[&str] = &[
        "SCRIPT", "STYLE", "INPUT", "TEXTAREA", "CODE", "PRE", "NOSCRIPT", "SVG",
    ];

    /// Tag of the document body, the traversal root
    pub const BODY_TAG: &str = "BODY";

    /// Tag of the document element
    pub const HTML_TAG: &str = "HTML";

    /// Tag used by the page loader for each line of input text
    pub const PARAGRAPH_TAG: &str = "P";
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Quiet period before a burst of DOM mutations triggers a re-apply
    pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(250);

    /// How long the settings surface waits for a content script to acknowledge a message
    pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(1);

    /// How long a status line stays visible in the settings surface
    pub const STATUS_DURATION: Duration = Duration::from_millis(2500);
}

/// Persisted configuration constants
pub mod config {
    /// Directory under the user config dir
    pub const APP_DIR: &str = "timeflip";

    /// Settings file name
    pub const FILENAME: &str = "settings.json";

    /// Environment variable selecting the log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

    /// Capacity of the storage change broadcast channel
    pub const CHANGE_FEED_CAPACITY: usize = 64;
}

/// User-visible status lines shown by the settings surface
pub mod status {
    pub const APPLIED: &str = "Applied successfully";
    pub const SAVED: &str = "Saved successfully";
    pub const SAVED_NOT_APPLIED: &str = "Saved (reload the page to apply)";
    pub const ERROR: &str = "Error applying settings";
}
