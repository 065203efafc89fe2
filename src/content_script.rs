//! Content script host: routes page, message, and storage events into the engine

use anyhow::Result;
use std::fmt;
use std::ops::ControlFlow;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, Settings, StorageChange};
use crate::dom::{Document, ReadyState};
use crate::ipc::{ContentRequest, ContentResponse};
use crate::rewrite::RewriteEngine;
use crate::watcher::MutationWatcher;

/// Page-script edit applied to the live document
pub type DomEdit = Box<dyn FnOnce(&mut Document) -> Result<()> + Send>;

/// Events delivered to a content script
pub enum PageEvent {
    /// Direct message from the settings surface
    Message {
        request: ContentRequest,
        reply: oneshot::Sender<ContentResponse>,
    },
    /// Parser finished; the document has its body
    DomContentLoaded,
    /// The page mutated its own DOM
    DomEdit(DomEdit),
    /// Tab closed
    Shutdown,
}

impl fmt::Debug for PageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message { request, .. } => f.debug_struct("Message").field("request", request).finish(),
            Self::DomContentLoaded => f.write_str("DomContentLoaded"),
            Self::DomEdit(_) => f.write_str("DomEdit"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

#[derive(Debug)]
pub struct ContentScript {
    engine: RewriteEngine,
}

impl ContentScript {
    /// Load settings from `store` and run the initial pass
    pub fn start(document: Document, store: &impl ConfigStore) -> Self {
        let settings = store.load().unwrap_or_else(|e| {
            error!(error = ?e, "failed to load settings, using defaults");
            Settings::default()
        });
        Self::with_settings(document, settings, MutationWatcher::default())
    }

    pub fn with_settings(document: Document, settings: Settings, watcher: MutationWatcher) -> Self {
        let mut script = Self {
            engine: RewriteEngine::new(document, settings, watcher),
        };
        let state = script.engine.state();
        info!(host = %state.hostname(), mode = %state.mode(), active = state.is_active(), "content script loaded");

        if script.engine.document().body().is_some() {
            script.engine.document_mut().observe();
        }
        if script.engine.state().is_active() {
            match script.engine.document().ready_state() {
                ReadyState::Loading => debug!("document still loading, deferring first pass"),
                ReadyState::Complete => {
                    script.engine.apply(script.engine.state().mode());
                }
            }
        }
        script
    }

    pub fn engine(&self) -> &RewriteEngine {
        &self.engine
    }

    pub fn document(&self) -> &Document {
        self.engine.document()
    }

    /// Restore every converted element (page unload, or a caller wanting the original text)
    pub fn revert(&mut self) -> usize {
        self.engine.revert()
    }

    /// Handle one event. Breaks on shutdown.
    pub fn handle_event(&mut self, event: PageEvent, now: Instant) -> ControlFlow<()> {
        match event {
            PageEvent::Message { request, reply } => {
                let response = self.handle_message(request);
                if reply.send(response).is_err() {
                    debug!("settings surface stopped waiting for the reply");
                }
            }
            PageEvent::DomContentLoaded => self.on_dom_content_loaded(),
            PageEvent::DomEdit(edit) => {
                if let Err(e) = edit(self.engine.document_mut()) {
                    warn!(error = ?e, "page edit failed");
                }
            }
            PageEvent::Shutdown => {
                info!("content script shutting down");
                return ControlFlow::Break(());
            }
        }
        self.engine.deliver_mutations(now);
        ControlFlow::Continue(())
    }

    /// Instant update from the settings surface
    pub fn handle_message(&mut self, request: ContentRequest) -> ContentResponse {
        match request {
            ContentRequest::UpdateState { .. } => {
                let mut settings = Settings::from(request);
                settings.validate();
                info!(mode = %settings.mode, globally_enabled = settings.globally_enabled, "received state update");
                self.engine.update_settings(settings);
            }
        }
        ContentResponse::ok()
    }

    /// Passive refresh from storage sync
    pub fn handle_storage_change(&mut self, change: &StorageChange) {
        self.engine.refresh_settings(change);
    }

    pub fn on_dom_content_loaded(&mut self) {
        let doc = self.engine.document_mut();
        doc.finish_loading();
        if !doc.is_observing() {
            doc.observe();
        }
        self.engine.apply(self.engine.state().mode());
    }

    /// Drive the content script until shutdown or until the event channel closes.
    /// Returns the script so callers can inspect the final page.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<PageEvent>,
        mut changes: Option<broadcast::Receiver<StorageChange>>,
    ) -> Self {
        info!(host = %self.engine.state().hostname(), "content script running");
        loop {
            let deadline = self.engine.debounce_deadline();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed");
                        break;
                    };
                    if self.handle_event(event, Instant::now()).is_break() {
                        break;
                    }
                }
                change = next_change(&mut changes) => match change {
                    Ok(change) => self.handle_storage_change(&change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "storage change feed lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("storage change feed closed");
                        changes = None;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.engine.poll_debounce(Instant::now());
                }
            }
        }
        self
    }
}

async fn next_change(changes: &mut Option<broadcast::Receiver<StorageChange>>) -> Result<StorageChange, RecvError> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::convert::ConversionMode;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    fn url() -> Url {
        Url::parse("https://shop.example.com/orders").unwrap()
    }

    fn enabled() -> Settings {
        Settings {
            globally_enabled: true,
            ..Settings::default()
        }
    }

    fn body_text(script: &ContentScript) -> String {
        let doc = script.document();
        doc.text_content(doc.body().unwrap())
    }

    fn request(settings: &Settings) -> ContentRequest {
        ContentRequest::update_state(settings)
    }

    #[test]
    fn test_start_applies_when_active() {
        let store = MemoryStore::new(enabled());
        let doc = Document::from_text(url(), "Shipped 21:15").unwrap();
        let script = ContentScript::start(doc, &store);
        assert_eq!(body_text(&script), "Shipped 9:15 PM");
        assert!(script.document().is_observing());
    }

    #[test]
    fn test_start_inactive_by_default() {
        let store = MemoryStore::default();
        let doc = Document::from_text(url(), "Shipped 21:15").unwrap();
        let script = ContentScript::start(doc, &store);
        assert_eq!(body_text(&script), "Shipped 21:15");
        assert_eq!(script.engine().stats().passes, 0);
    }

    #[test]
    fn test_loading_document_waits_for_dom_content_loaded() {
        let mut doc = Document::loading(url());
        let body = doc.ensure_body();
        doc.append_text(body, "Arrives 06:30").unwrap();

        let mut script = ContentScript::with_settings(doc, enabled(), MutationWatcher::default());
        assert_eq!(body_text(&script), "Arrives 06:30");

        let flow = script.handle_event(PageEvent::DomContentLoaded, Instant::now());
        assert!(flow.is_continue());
        assert_eq!(body_text(&script), "Arrives 6:30 AM");
        assert!(script.engine().debounce_deadline().is_none());
    }

    #[test]
    fn test_loading_without_body_starts_observing_later() {
        let doc = Document::loading(url());
        let mut script = ContentScript::with_settings(doc, enabled(), MutationWatcher::default());
        assert!(!script.document().is_observing());

        script.on_dom_content_loaded();
        assert!(script.document().is_observing());

        let edit: DomEdit = Box::new(|doc: &mut Document| -> Result<()> {
            let body = doc.ensure_body();
            doc.append_text(body, "Late 23:00")?;
            Ok(())
        });
        let now = Instant::now();
        let _ = script.handle_event(PageEvent::DomEdit(edit), now);
        assert!(script.engine().debounce_deadline().is_some());
    }

    #[test]
    fn test_message_transitions() {
        let store = MemoryStore::new(enabled());
        let doc = Document::from_text(url(), "Pickup 13:00\nDrop-off 4:00 PM").unwrap();
        let mut script = ContentScript::start(doc, &store);
        assert_eq!(body_text(&script), "Pickup 1:00 PMDrop-off 4:00 PM");

        // Mode switch: revert then re-apply
        let to_24 = Settings {
            mode: ConversionMode::To24Hour,
            ..enabled()
        };
        assert_eq!(script.handle_message(request(&to_24)), ContentResponse::ok());
        assert_eq!(body_text(&script), "Pickup 13:00Drop-off 16:00");

        // Site disabled: pure revert
        let off = Settings {
            disabled_sites: vec!["shop.example.com".to_string()],
            ..to_24.clone()
        };
        script.handle_message(request(&off));
        assert_eq!(body_text(&script), "Pickup 13:00Drop-off 4:00 PM");
        assert!(!script.engine().state().is_active());

        // Back on: apply
        script.handle_message(request(&to_24));
        assert_eq!(body_text(&script), "Pickup 13:00Drop-off 16:00");
    }

    #[test]
    fn test_message_site_lists_normalized() {
        let doc = Document::from_text(url(), "Ships 22:10").unwrap();
        let mut script = ContentScript::with_settings(doc, Settings::default(), MutationWatcher::default());

        let request = ContentRequest::UpdateState {
            mode: ConversionMode::To12Hour,
            globally_enabled: false,
            disabled_sites: Vec::new(),
            enabled_sites: vec![" Shop.Example.com. ".to_string()],
        };
        script.handle_message(request);
        assert!(script.engine().state().is_active());
        assert_eq!(script.engine().state().settings().enabled_sites, vec!["shop.example.com".to_string()]);
        assert_eq!(body_text(&script), "Ships 10:10 PM");
    }

    #[test]
    fn test_storage_change_refreshes_without_rewriting() {
        let doc = Document::from_text(url(), "Opens 10:00").unwrap();
        let mut script = ContentScript::with_settings(doc, Settings::default(), MutationWatcher::default());

        script.handle_storage_change(&StorageChange {
            globally_enabled: Some(true),
            ..StorageChange::default()
        });
        assert!(script.engine().state().is_active());
        assert_eq!(body_text(&script), "Opens 10:00");

        // A later page edit picks up the refreshed settings through the watcher
        let edit: DomEdit = Box::new(|doc: &mut Document| -> Result<()> {
            let body = doc.body().expect("body");
            doc.append_text(body, " / 11:00")?;
            Ok(())
        });
        let now = Instant::now();
        let _ = script.handle_event(PageEvent::DomEdit(edit), now);
        assert!(script.engine.poll_debounce(now + Duration::from_millis(250)));
        assert_eq!(body_text(&script), "Opens 10:00 AM / 11:00 AM");
    }

    #[test]
    fn test_failed_edit_is_logged_not_fatal() {
        let doc = Document::from_text(url(), "x").unwrap();
        let mut script = ContentScript::with_settings(doc, enabled(), MutationWatcher::default());
        let edit: DomEdit = Box::new(|_: &mut Document| -> Result<()> { anyhow::bail!("script error") });
        assert!(script.handle_event(PageEvent::DomEdit(edit), Instant::now()).is_continue());
    }

    #[test]
    fn test_shutdown_breaks() {
        let doc = Document::from_text(url(), "x").unwrap();
        let mut script = ContentScript::with_settings(doc, enabled(), MutationWatcher::default());
        assert!(script.handle_event(PageEvent::Shutdown, Instant::now()).is_break());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_debounces_dom_edits() {
        let doc = Document::from_text(url(), "Start 08:00").unwrap();
        let script = ContentScript::with_settings(doc, enabled(), MutationWatcher::default());
        let (events, receiver) = mpsc::channel(32);
        let handle = tokio::spawn(script.run(receiver, None));

        for i in 0..5 {
            let edit: DomEdit = Box::new(move |doc: &mut Document| -> Result<()> {
                let body = doc.body().expect("body");
                doc.append_text(body, &format!(" | {}:30", 10 + i))?;
                Ok(())
            });
            events.send(PageEvent::DomEdit(edit)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        events.send(PageEvent::Shutdown).await.unwrap();

        let script = handle.await.unwrap();
        assert_eq!(
            body_text(&script),
            "Start 8:00 AM | 10:30 AM | 11:30 AM | 12:30 PM | 1:30 PM | 2:30 PM"
        );
        // Initial pass + one coalesced re-apply
        assert_eq!(script.engine().stats().passes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_storage_feed() {
        let store = Arc::new(MemoryStore::default());
        let doc = Document::from_text(url(), "Due 17:00").unwrap();
        let script = ContentScript::start(doc, &store);
        let (events, receiver) = mpsc::channel(8);
        let handle = tokio::spawn(script.run(receiver, Some(store.subscribe())));

        store.save(&enabled()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Feed only refreshes state; the page edit triggers the actual pass
        let edit: DomEdit = Box::new(|doc: &mut Document| -> Result<()> {
            let body = doc.body().expect("body");
            doc.append_text(body, " (18:00)")?;
            Ok(())
        });
        events.send(PageEvent::DomEdit(edit)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        events.send(PageEvent::Shutdown).await.unwrap();

        let script = handle.await.unwrap();
        assert_eq!(body_text(&script), "Due 5:00 PM (6:00 PM)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_cancels_pending_reapply_on_disable() {
        let doc = Document::from_text(url(), "Ends 19:45").unwrap();
        let script = ContentScript::with_settings(doc, enabled(), MutationWatcher::default());
        let (events, receiver) = mpsc::channel(8);
        let handle = tokio::spawn(script.run(receiver, None));

        let edit: DomEdit = Box::new(|doc: &mut Document| -> Result<()> {
            let body = doc.body().expect("body");
            doc.append_text(body, " then 20:15")?;
            Ok(())
        });
        events.send(PageEvent::DomEdit(edit)).await.unwrap();

        let (reply, response) = oneshot::channel();
        events
            .send(PageEvent::Message {
                request: request(&Settings::default()),
                reply,
            })
            .await
            .unwrap();
        assert_eq!(response.await.unwrap(), ContentResponse::ok());

        tokio::time::sleep(Duration::from_millis(500)).await;
        events.send(PageEvent::Shutdown).await.unwrap();

        let script = handle.await.unwrap();
        assert_eq!(body_text(&script), "Ends 19:45 then 20:15");
        assert_eq!(script.engine().stats().passes, 1);
    }
}
