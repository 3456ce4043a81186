//! The narrow `Page` capability trait (spec §6 "External Interfaces"): the
//! headless browser itself is an out-of-scope external collaborator, but
//! the capture engines (C9) need *something* to pull request/response
//! events and response bodies from. This trait is that seam — independent
//! of any concrete browser so the interceptor/capturer logic (api.rs,
//! static_capture.rs) can be driven by an in-memory fake in tests.

use async_trait::async_trait;

use crate::error::ReconError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Script,
    Image,
    Font,
    Media,
    Xhr,
    Fetch,
    Other,
}

impl ResourceKind {
    pub fn is_static_asset(self) -> bool {
        matches!(self, Self::Document | Self::Stylesheet | Self::Script | Self::Image | Self::Font | Self::Media)
    }
}

#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub resource_kind: ResourceKind,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub ok: bool,
    pub resource_kind: ResourceKind,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NavigationEvent {
    pub url: String,
}

/// The three event kinds spec §6 names: `request`, `response`,
/// `framenavigated`.
#[derive(Debug, Clone)]
pub enum PageEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Navigated(NavigationEvent),
}

/// Narrow capability a capture engine needs from a live page: its current
/// URL, the final rendered HTML, a pull-based event stream, and a way to
/// fetch a captured response's body by request id.
#[async_trait]
pub trait Page: Send + Sync {
    fn url(&self) -> String;

    /// Navigates to `url`, waiting for the page to settle.
    async fn goto(&self, url: &str) -> Result<(), ReconError>;

    /// The final rendered DOM, captured separately from the entrypoint
    /// document response (spec §4.9).
    async fn content(&self) -> Result<String, ReconError>;

    /// Pulls the next buffered event, or `None` once the page is closed and
    /// drained. Implementations buffer events internally so no event is
    /// lost between calls.
    async fn next_event(&self) -> Option<PageEvent>;

    /// Fetches a response body already observed via a `Response` event.
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>, ReconError>;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `Page` fake used by capture-engine unit tests, so the
    //! interceptor/capturer logic is exercised without a real browser.
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    pub struct FakePage {
        url: String,
        events: Mutex<Vec<PageEvent>>,
        bodies: HashMap<String, Vec<u8>>,
        content: String,
    }

    impl FakePage {
        pub fn new(url: &str, content: &str) -> Self {
            Self {
                url: url.to_string(),
                events: Mutex::new(Vec::new()),
                bodies: HashMap::new(),
                content: content.to_string(),
            }
        }

        pub fn with_event(mut self, event: PageEvent) -> Self {
            self.events.get_mut().push(event);
            self
        }

        pub fn with_body(mut self, request_id: &str, body: Vec<u8>) -> Self {
            self.bodies.insert(request_id.to_string(), body);
            self
        }
    }

    #[async_trait]
    impl Page for FakePage {
        fn url(&self) -> String {
            self.url.clone()
        }

        async fn goto(&self, _url: &str) -> Result<(), ReconError> {
            Ok(())
        }

        async fn content(&self) -> Result<String, ReconError> {
            Ok(self.content.clone())
        }

        async fn next_event(&self) -> Option<PageEvent> {
            let mut events = self.events.lock().await;
            if events.is_empty() {
                None
            } else {
                Some(events.remove(0))
            }
        }

        async fn response_body(&self, request_id: &str) -> Result<Vec<u8>, ReconError> {
            self.bodies
                .get(request_id)
                .cloned()
                .ok_or_else(|| ReconError::Config(format!("no body recorded for request {request_id}")))
        }
    }
}
