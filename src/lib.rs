#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod content_script;
pub mod convert;
pub mod debounce;
pub mod dom;
pub mod ipc;
pub mod rewrite;
pub mod settings_panel;
pub mod watcher;
