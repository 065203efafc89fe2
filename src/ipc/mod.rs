//! Messaging between the settings surface and content scripts
//!
//! The transport is abstracted behind [`TabMessenger`]. Delivery is best
//! effort: a tab without a listening content script answers `Ok(None)`,
//! which callers treat as "saved but not applied" rather than an error.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

mod messages;
pub use messages::{ContentRequest, ContentResponse};

use crate::constants::timing::MESSAGE_TIMEOUT;
use crate::content_script::PageEvent;

/// Addressable browser tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: u32,
    pub hostname: String,
}

#[allow(async_fn_in_trait)]
pub trait TabMessenger {
    /// Currently active tab, if one can be addressed
    fn active_tab(&self) -> Option<TabInfo>;

    /// Send a request to the tab's content script. `Ok(None)` when no
    /// content script answered.
    async fn send(&self, tab: &TabInfo, request: ContentRequest) -> Result<Option<ContentResponse>>;
}

/// No addressable tab (internal browser pages, command line)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActiveTab;

impl TabMessenger for NoActiveTab {
    fn active_tab(&self) -> Option<TabInfo> {
        None
    }

    async fn send(&self, _tab: &TabInfo, _request: ContentRequest) -> Result<Option<ContentResponse>> {
        Ok(None)
    }
}

/// Messenger for a single in-process tab whose content script reads a [`PageEvent`] channel
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tab: TabInfo,
    sender: mpsc::Sender<PageEvent>,
    timeout: Duration,
}

impl ChannelMessenger {
    pub fn new(tab: TabInfo, sender: mpsc::Sender<PageEvent>) -> Self {
        Self {
            tab,
            sender,
            timeout: MESSAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl TabMessenger for ChannelMessenger {
    fn active_tab(&self) -> Option<TabInfo> {
        Some(self.tab.clone())
    }

    async fn send(&self, tab: &TabInfo, request: ContentRequest) -> Result<Option<ContentResponse>> {
        if *tab != self.tab {
            debug!(tab = tab.id, "no channel to tab");
            return Ok(None);
        }

        let (reply, response) = oneshot::channel();
        if self.sender.send(PageEvent::Message { request, reply }).await.is_err() {
            debug!(tab = tab.id, "content script gone");
            return Ok(None);
        }

        match timeout(self.timeout, response).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => {
                debug!(tab = tab.id, "content script dropped the reply");
                Ok(None)
            }
            Err(_) => {
                warn!(tab = tab.id, timeout = ?self.timeout, "no response from content script");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn tab() -> TabInfo {
        TabInfo {
            id: 7,
            hostname: "example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_no_active_tab() {
        let messenger = NoActiveTab;
        assert!(messenger.active_tab().is_none());
        let response = messenger
            .send(&tab(), ContentRequest::update_state(&Settings::default()))
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (sender, mut receiver) = mpsc::channel(4);
        let messenger = ChannelMessenger::new(tab(), sender);

        let responder = tokio::spawn(async move {
            if let Some(PageEvent::Message { reply, .. }) = receiver.recv().await {
                reply.send(ContentResponse::ok()).unwrap();
            }
        });

        let response = messenger
            .send(&tab(), ContentRequest::update_state(&Settings::default()))
            .await
            .unwrap();
        assert_eq!(response, Some(ContentResponse::ok()));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_is_soft_failure() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let messenger = ChannelMessenger::new(tab(), sender);

        let response = messenger
            .send(&tab(), ContentRequest::update_state(&Settings::default()))
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_content_script_times_out() {
        let (sender, mut receiver) = mpsc::channel(1);
        let messenger = ChannelMessenger::new(tab(), sender).with_timeout(Duration::from_millis(100));

        // Keep the request (and its reply sender) alive without answering
        let holder = tokio::spawn(async move {
            let event = receiver.recv().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(event);
        });

        let response = messenger
            .send(&tab(), ContentRequest::update_state(&Settings::default()))
            .await
            .unwrap();
        assert!(response.is_none());
        holder.abort();
    }

    #[tokio::test]
    async fn test_other_tab_not_addressable() {
        let (sender, _receiver) = mpsc::channel(1);
        let messenger = ChannelMessenger::new(tab(), sender);
        let other = TabInfo {
            id: 8,
            hostname: "other.org".to_string(),
        };
        let response = messenger
            .send(&other, ContentRequest::update_state(&Settings::default()))
            .await
            .unwrap();
        assert!(response.is_none());
    }
}
