//! `chromiumoxide`-backed `Page` implementation (C9). Grounded in
//! `discovery/browser_capture.rs`'s launch/event-listener/restart patterns,
//! adapted to the narrow `Page` trait instead of a JS-file-specific capture
//! loop.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::capture::page::{NavigationEvent, Page, PageEvent, RequestEvent, ResourceKind, ResponseEvent};
use crate::error::{ReconError, Result};

fn resource_kind_of(kind: &ResourceType) -> ResourceKind {
    match kind {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Script => ResourceKind::Script,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::Media => ResourceKind::Media,
        ResourceType::Xhr => ResourceKind::Xhr,
        ResourceType::Fetch => ResourceKind::Fetch,
        _ => ResourceKind::Other,
    }
}

/// Builds a headless `BrowserConfig` rooted at `user_data_dir`, using
/// `chrome_executable` when resolved (explicit path, or a previously
/// downloaded managed Chrome).
fn build_browser_config(user_data_dir: &Path, chrome_executable: Option<&Path>) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder().user_data_dir(user_data_dir).no_sandbox().viewport(None);
    if let Some(exe) = chrome_executable {
        builder = builder.chrome_executable(exe);
    }
    builder.build().map_err(|e| ReconError::Config(format!("failed to build browser config: {e}")))
}

/// Launches a browser, falling back to an automatic Chromium download when
/// no Chrome executable can be found at all. `chrome_override` takes
/// precedence over auto-detection when given (`--chrome-path`).
async fn launch_browser(user_data_dir: &Path, chrome_override: Option<&Path>) -> Result<Browser> {
    let chrome_exe = chrome_override.map(|p| p.to_path_buf()).or_else(crate::browser::resolve_chrome_executable);
    let config = build_browser_config(user_data_dir, chrome_exe.as_deref())?;

    match Browser::launch(config).await {
        Ok((browser, mut handler)) => {
            tokio::spawn(async move { while handler.next().await.is_some() {} });
            Ok(browser)
        }
        Err(e) if chrome_exe.is_some() => {
            Err(ReconError::Config(format!("failed to launch browser with Chrome at {chrome_exe:?}: {e}")))
        }
        Err(_) => {
            warn!("Chrome not found, downloading Chromium automatically");
            let exe = crate::browser::download_chrome(false).await?;
            let config = build_browser_config(user_data_dir, Some(&exe))?;
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| ReconError::Config(format!("failed to launch browser even after downloading Chromium: {e}")))?;
            tokio::spawn(async move { while handler.next().await.is_some() {} });
            Ok(browser)
        }
    }
}

/// A live Chrome tab plus its own bounded event queue, fed by three CDP
/// listener tasks (request, response, frame-navigated) spawned once at
/// construction. `next_event` drains that queue; nothing is lost between
/// calls because the listeners keep running independently of the caller.
pub struct ChromiumPage {
    page: CdpPage,
    events: Arc<Mutex<std::collections::VecDeque<PageEvent>>>,
    _listener_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ChromiumPage {
    /// Opens a new blank tab on `browser` and wires up its CDP listeners.
    pub async fn new(browser: &Browser) -> Result<Self> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ReconError::Config(format!("failed to create page: {e}")))?;

        let events = Arc::new(Mutex::new(std::collections::VecDeque::new()));
        let mut tasks = Vec::new();

        {
            let events = events.clone();
            let mut stream = page
                .event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(|e| ReconError::Config(format!("failed to listen for requests: {e}")))?;
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let request = &event.request;
                    let kind = event.r#type.as_ref().map(resource_kind_of).unwrap_or(ResourceKind::Other);
                    let headers = request
                        .headers
                        .inner()
                        .as_object()
                        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
                        .unwrap_or_default();
                    events.lock().await.push_back(PageEvent::Request(RequestEvent {
                        request_id: event.request_id.inner().to_string(),
                        url: request.url.clone(),
                        method: request.method.clone(),
                        resource_kind: kind,
                        headers,
                    }));
                }
            }));
        }

        {
            let events = events.clone();
            let mut stream = page
                .event_listener::<EventResponseReceived>()
                .await
                .map_err(|e| ReconError::Config(format!("failed to listen for responses: {e}")))?;
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let response = &event.response;
                    let kind = resource_kind_of(&event.r#type);
                    let headers: Vec<(String, String)> = response
                        .headers
                        .inner()
                        .as_object()
                        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
                        .unwrap_or_default();
                    let content_type = Some(response.mime_type.clone()).filter(|s| !s.is_empty());
                    events.lock().await.push_back(PageEvent::Response(ResponseEvent {
                        request_id: event.request_id.inner().to_string(),
                        url: response.url.clone(),
                        status: response.status as u16,
                        ok: (200..400).contains(&response.status),
                        resource_kind: kind,
                        headers,
                        content_type,
                    }));
                }
            }));
        }

        {
            let events = events.clone();
            let mut stream = page
                .event_listener::<EventFrameNavigated>()
                .await
                .map_err(|e| ReconError::Config(format!("failed to listen for navigation: {e}")))?;
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    events.lock().await.push_back(PageEvent::Navigated(NavigationEvent { url: event.frame.url.clone() }));
                }
            }));
        }

        Ok(Self { page, events, _listener_tasks: tasks })
    }
}

/// `PageFactory` backed by a single long-lived `chromiumoxide` browser
/// process, handing out a fresh tab (and its own CDP listener set) per
/// crawled URL. Grounded in `discovery/browser_capture.rs`'s one-browser,
/// many-tabs lifecycle.
pub struct ChromiumPageFactory {
    browser: Browser,
}

impl ChromiumPageFactory {
    /// Launches the managed or auto-downloaded Chrome under `user_data_dir`.
    /// `chrome_override` forces a specific executable (`--chrome-path`)
    /// instead of auto-detection.
    pub async fn launch(user_data_dir: &Path, chrome_override: Option<&Path>) -> Result<Self> {
        let browser = launch_browser(user_data_dir, chrome_override).await?;
        Ok(Self { browser })
    }
}

#[async_trait]
impl crate::orchestrator::PageFactory for ChromiumPageFactory {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let page = ChromiumPage::new(&self.browser).await?;
        Ok(Arc::new(page))
    }
}

#[async_trait]
impl Page for ChromiumPage {
    fn url(&self) -> String {
        self.page.url().map(|u| u.unwrap_or_default()).unwrap_or_default()
    }

    async fn goto(&self, url: &str) -> Result<(), ReconError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ReconError::Config(format!("navigation to {url} failed: {e}")))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| ReconError::Config(format!("waiting for navigation to {url} failed: {e}")))?;
        Ok(())
    }

    async fn content(&self) -> Result<String, ReconError> {
        self.page.content().await.map_err(|e| ReconError::Config(format!("failed to read page content: {e}")))
    }

    async fn next_event(&self) -> Option<PageEvent> {
        self.events.lock().await.pop_front()
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>, ReconError> {
        let body = self
            .page
            .execute(GetResponseBodyParams::new(chromiumoxide::cdp::browser_protocol::network::RequestId::from(
                request_id.to_string(),
            )))
            .await
            .map_err(|e| ReconError::Config(format!("failed to fetch response body for {request_id}: {e}")))?;

        if body.base64_encoded {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&body.body)
                .map_err(|e| ReconError::Config(format!("invalid base64 response body for {request_id}: {e}")))
        } else {
            Ok(body.body.clone().into_bytes())
        }
    }
}
