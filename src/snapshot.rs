//! Host-page adapter over static HTML snapshots.
//!
//! Implements the collaborator traits against a scriptable in-memory
//! page: the snapshot markup is probed with real CSS selectors, while
//! playback, activity and mutation feeds are driven programmatically.
//! Powers the simulator binary and the integration tests.

use scraper::{Html, Selector};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SelectorConfig;
use crate::error::{OverlayError, Result};
use crate::host::{
    ActivityEvent, ActivitySource, ChangeNotifier, CredentialStorage, OverlaySurface,
    PageMutation, PageProbe, PlaybackEvent, TransitionSignal, TransitionTicket, VideoElement,
    VideoId,
};
use crate::metadata::ItemMetadata;
use crate::overlay::OverlayContent;

/// In-memory key-value store standing in for the host client's
/// persisted storage
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Seed a credential blob in the shape the host client persists
    pub fn with_credentials(key: &str, token: &str, user_id: &str) -> Arc<Self> {
        let storage = Self::new();
        let blob = json!({ "Servers": [{ "AccessToken": token, "UserId": user_id }] });
        storage.insert(key, blob.to_string());
        Arc::new(storage)
    }
}

impl CredentialStorage for MemoryStorage {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }
}

/// Scriptable stand-in for the tracked media element
pub struct ScriptedVideo {
    id: VideoId,
    paused: AtomicBool,
    ended: AtomicBool,
    play_requests: AtomicU32,
    events: broadcast::Sender<PlaybackEvent>,
}

impl ScriptedVideo {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            id: VideoId::next(),
            paused: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            play_requests: AtomicU32::new(0),
            events,
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.events.send(PlaybackEvent::Paused);
    }

    pub fn play(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.events.send(PlaybackEvent::Played);
    }

    /// Reach the end of the stream; players raise a pause around this
    /// that the controller must ignore
    pub fn finish(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.events.send(PlaybackEvent::Ended);
        let _ = self.events.send(PlaybackEvent::Paused);
    }

    pub fn play_request_count(&self) -> u32 {
        self.play_requests.load(Ordering::SeqCst)
    }
}

impl VideoElement for ScriptedVideo {
    fn id(&self) -> VideoId {
        self.id
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn request_play(&self) {
        self.play_requests.fetch_add(1, Ordering::SeqCst);
        self.play();
    }

    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }
}

/// Host page over an HTML snapshot.
///
/// `navigate` swaps the snapshot and raises a mutation notification,
/// mirroring how the real document reports structural changes; the
/// probe answers come from selector queries against the current markup.
pub struct SnapshotPage {
    selectors: SelectorConfig,
    html: Mutex<String>,
    video: Mutex<Option<Arc<ScriptedVideo>>>,
    mutation_tx: Mutex<Option<mpsc::Sender<PageMutation>>>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    subscribe_failures: AtomicU32,
}

impl SnapshotPage {
    pub fn new(selectors: SelectorConfig) -> Arc<Self> {
        let (activity_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            selectors,
            html: Mutex::new(String::new()),
            video: Mutex::new(None),
            mutation_tx: Mutex::new(None),
            activity_tx,
            subscribe_failures: AtomicU32::new(0),
        })
    }

    /// Make the next `count` subscription attempts fail, as if the
    /// observed root were not attached yet
    pub fn fail_next_subscribes(&self, count: u32) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Replace the page snapshot and notify subscribers.
    ///
    /// A player element appearing mounts a fresh scripted video; the
    /// element disappearing unmounts it; markup changes around a
    /// persistent player keep the same identity.
    pub fn navigate(&self, html: &str) {
        let had_video = self.matches_video(&self.current_html());
        let has_video = self.matches_video(html);

        *self.html.lock().unwrap_or_else(PoisonError::into_inner) = html.to_string();

        let mut video = self.video.lock().unwrap_or_else(PoisonError::into_inner);
        match (had_video, has_video) {
            (false, true) => *video = Some(ScriptedVideo::new()),
            (true, false) => *video = None,
            _ => {}
        }
        drop(video);

        self.notify();
    }

    /// Swap the mounted player for a new element with the same markup,
    /// the identity-change case a page transition produces
    pub fn remount_player(&self) {
        let mut video = self.video.lock().unwrap_or_else(PoisonError::into_inner);
        if video.is_some() {
            *video = Some(ScriptedVideo::new());
        }
        drop(video);
        self.notify();
    }

    /// Currently mounted scripted video, for driving playback events
    pub fn video(&self) -> Option<Arc<ScriptedVideo>> {
        self.video.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn pointer_move(&self) {
        let _ = self.activity_tx.send(ActivityEvent::PointerMove);
    }

    pub fn touch_move(&self) {
        let _ = self.activity_tx.send(ActivityEvent::TouchMove);
    }

    fn current_html(&self) -> String {
        self.html.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn matches_video(&self, html: &str) -> bool {
        let selector = match Selector::parse(&self.selectors.video) {
            Ok(selector) => selector,
            Err(_) => {
                warn!("Invalid video selector {:?}", self.selectors.video);
                return false;
            }
        };
        let document = Html::parse_document(html);
        document.select(&selector).next().is_some()
    }

    fn notify(&self) {
        let tx = self.mutation_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            if tx.try_send(PageMutation).is_err() {
                debug!("Mutation notification dropped (feed full or closed)");
            }
        }
    }
}

#[async_trait::async_trait]
impl ChangeNotifier for SnapshotPage {
    async fn subscribe(&self) -> Result<mpsc::Receiver<PageMutation>> {
        if self.subscribe_failures.load(Ordering::SeqCst) > 0 {
            self.subscribe_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(OverlayError::ObserverSetupFailed(
                "observed root not attached".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(32);
        *self.mutation_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }
}

impl PageProbe for SnapshotPage {
    fn current_video(&self) -> Option<Arc<dyn VideoElement>> {
        if !self.matches_video(&self.current_html()) {
            return None;
        }
        self.video
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|v| v as Arc<dyn VideoElement>)
    }

    fn extract_item_id(&self) -> Option<String> {
        let document = Html::parse_document(&self.current_html());

        for raw in &self.selectors.item_id {
            let selector = match Selector::parse(raw) {
                Ok(selector) => selector,
                Err(_) => {
                    warn!("Invalid item id selector {:?}", raw);
                    continue;
                }
            };

            for element in document.select(&selector) {
                if let Some(id) = element
                    .value()
                    .attr(&self.selectors.item_id_attribute)
                    .or_else(|| element.value().attr("data-itemid"))
                {
                    if !id.is_empty() {
                        return Some(id.to_string());
                    }
                }
            }
        }
        None
    }
}

impl ActivitySource for SnapshotPage {
    fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }
}

/// How the recording surface resolves transition tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionMode {
    /// Complete every transition as soon as it starts
    Immediate,
    /// Hold completion signals until `complete_all` (or starve them to
    /// exercise the ceiling)
    Manual,
}

/// What happened on the render sink, in order
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Applied(OverlayContent),
    Cleared,
    ShowStarted,
    HideStarted,
}

/// Render sink that records every command for inspection
pub struct RecordingSurface {
    mode: TransitionMode,
    events: Mutex<Vec<SurfaceEvent>>,
    pending: Mutex<Vec<TransitionSignal>>,
}

impl RecordingSurface {
    pub fn new(mode: TransitionMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            events: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_applied(&self) -> Option<OverlayContent> {
        self.events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                SurfaceEvent::Applied(content) => Some(content),
                _ => None,
            })
    }

    pub fn show_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SurfaceEvent::ShowStarted))
            .count()
    }

    pub fn hide_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SurfaceEvent::HideStarted))
            .count()
    }

    /// Complete all held transition signals (Manual mode)
    pub fn complete_all(&self) {
        for signal in self.pending.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            signal.complete();
        }
    }

    fn record(&self, event: SurfaceEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    fn ticket(&self) -> TransitionTicket {
        let (signal, ticket) = TransitionTicket::pair();
        match self.mode {
            TransitionMode::Immediate => signal.complete(),
            TransitionMode::Manual => self.pending.lock().unwrap_or_else(PoisonError::into_inner).push(signal),
        }
        ticket
    }
}

impl OverlaySurface for RecordingSurface {
    fn apply(&self, content: &OverlayContent) {
        self.record(SurfaceEvent::Applied(content.clone()));
    }

    fn clear(&self) {
        self.record(SurfaceEvent::Cleared);
    }

    fn begin_show(&self) -> TransitionTicket {
        self.record(SurfaceEvent::ShowStarted);
        self.ticket()
    }

    fn begin_hide(&self) -> TransitionTicket {
        self.record(SurfaceEvent::HideStarted);
        self.ticket()
    }
}

/// Behaviour script for the local metadata endpoint
#[derive(Debug, Clone, Default)]
pub struct EndpointScript {
    /// Item records served under `/Items/{id}`
    pub items: HashMap<String, ItemMetadata>,

    /// Respond 500 to this many requests before serving normally
    pub fail_first: u32,

    /// Fixed delay before every response
    pub delay: Duration,
}

impl EndpointScript {
    pub fn with_item(mut self, id: impl Into<String>, item: ItemMetadata) -> Self {
        self.items.insert(id.into(), item);
        self
    }
}

/// Minimal local HTTP listener standing in for the remote metadata
/// endpoint. Serves `/Items/{id}` from the script; everything else is
/// a 404.
pub struct ScriptedEndpoint {
    addr: SocketAddr,
    requests: Arc<AtomicU32>,
    handle: JoinHandle<()>,
}

impl ScriptedEndpoint {
    pub async fn spawn(script: EndpointScript) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicU32::new(0));

        let counter = requests.clone();
        let remaining_failures = Arc::new(AtomicU32::new(script.fail_first));
        let items = Arc::new(script.items);
        let delay = script.delay;

        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let counter = counter.clone();
                let remaining_failures = remaining_failures.clone();
                let items = items.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, counter, remaining_failures, items, delay)
                        .await;
                });
            }
        });

        Ok(Self {
            addr,
            requests,
            handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Total requests observed, including failed ones
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    requests: Arc<AtomicU32>,
    remaining_failures: Arc<AtomicU32>,
    items: Arc<HashMap<String, ItemMetadata>>,
    delay: Duration,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 64 * 1024 {
            return Ok(());
        }
    }

    requests.fetch_add(1, Ordering::SeqCst);

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let request_line = String::from_utf8_lossy(&buf);
    let path = request_line
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let response = if remaining_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        http_response(500, "{\"error\":\"scripted failure\"}")
    } else if let Some(item) = path
        .strip_prefix("/Items/")
        .and_then(|id| items.get(id))
    {
        match serde_json::to_string(item) {
            Ok(body) => http_response(200, &body),
            Err(_) => http_response(500, "{}"),
        }
    } else {
        http_response(404, "{\"error\":\"unknown item\"}")
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn http_response(status: u16, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

/// Snapshot of the host page with a mounted player showing `item_id`
pub fn player_page(item_id: &str) -> String {
    format!(
        r#"<html><body>
          <div class="videoPlayerContainer"><video></video></div>
          <div class="videoOsdBottom">
            <button class="btnUserRating" data-id="{}"></button>
          </div>
        </body></html>"#,
        item_id
    )
}

/// Snapshot of the host page outside playback
pub fn idle_page() -> String {
    r#"<html><body><div class="homePage"></div></body></html>"#.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::PageProbe;
    use crate::metadata::ItemKind;

    fn page() -> Arc<SnapshotPage> {
        SnapshotPage::new(Config::default().selectors)
    }

    #[test]
    fn test_probe_finds_video_and_item_id() {
        let page = page();
        page.navigate(&player_page("f1b2c3d4"));

        assert!(page.current_video().is_some());
        assert_eq!(page.extract_item_id().as_deref(), Some("f1b2c3d4"));
    }

    #[test]
    fn test_probe_on_idle_page() {
        let page = page();
        page.navigate(&idle_page());

        assert!(page.current_video().is_none());
        assert!(page.extract_item_id().is_none());
    }

    #[test]
    fn test_navigation_preserves_identity_without_remount() {
        let page = page();
        page.navigate(&player_page("a1"));
        let first = page.video().expect("video mounted").id();

        page.navigate(&player_page("b2"));
        assert_eq!(page.video().expect("video still mounted").id(), first);

        page.remount_player();
        assert_ne!(page.video().expect("video remounted").id(), first);
    }

    #[tokio::test]
    async fn test_subscribe_failures_are_scripted() {
        let page = page();
        page.fail_next_subscribes(1);
        assert!(ChangeNotifier::subscribe(page.as_ref()).await.is_err());
        assert!(ChangeNotifier::subscribe(page.as_ref()).await.is_ok());
    }

    #[tokio::test]
    async fn test_endpoint_serves_scripted_item() {
        let item = ItemMetadata {
            kind: ItemKind::Movie,
            name: Some("X".to_string()),
            ..Default::default()
        };
        let endpoint = ScriptedEndpoint::spawn(EndpointScript::default().with_item("42", item))
            .await
            .unwrap();

        let body = reqwest::get(format!("{}Items/42", endpoint.base_url()))
            .await
            .unwrap()
            .json::<ItemMetadata>()
            .await
            .unwrap();
        assert_eq!(body.name.as_deref(), Some("X"));
        assert_eq!(endpoint.request_count(), 1);
    }

    #[tokio::test]
    async fn test_endpoint_unknown_item_is_404() {
        let endpoint = ScriptedEndpoint::spawn(EndpointScript::default())
            .await
            .unwrap();
        let status = reqwest::get(format!("{}Items/42", endpoint.base_url()))
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 404);
    }
}
