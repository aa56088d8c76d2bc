use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::Result;
use crate::overlay::OverlayContent;

/// Stable identity for a tracked video element.
///
/// The controller compares sessions by identity, never by position or
/// markup, so a replaced player is seen as detach-then-attach even when
/// the new element renders identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoId(u64);

static NEXT_VIDEO_ID: AtomicU64 = AtomicU64::new(1);

impl VideoId {
    pub fn next() -> Self {
        Self(NEXT_VIDEO_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A structural change reported by the host document
#[derive(Debug, Clone, Default)]
pub struct PageMutation;

/// Lifecycle notifications from the tracked media element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Paused,
    Played,
    Ended,
}

/// Raw viewer-activity notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    PointerMove,
    TouchMove,
}

/// Persisted key-value credential storage of the host client
pub trait CredentialStorage: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
}

/// Subscription to structural change notifications under the host
/// document root. Setup may fail while the page is still loading; the
/// controller retries it through the recovery policy.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<PageMutation>>;
}

/// The currently tracked media element
pub trait VideoElement: Send + Sync {
    fn id(&self) -> VideoId;
    fn is_paused(&self) -> bool;
    fn has_ended(&self) -> bool;

    /// Ask the host player to resume playback (overlay dismissal)
    fn request_play(&self);

    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent>;
}

/// Best-effort scrape of the rendered page state
pub trait PageProbe: Send + Sync {
    /// The video element matching the tracked selector, if any
    fn current_video(&self) -> Option<Arc<dyn VideoElement>>;

    /// The active item id from rendered controls; `None` is tolerated
    /// and retried on the next pause/activity cycle
    fn extract_item_id(&self) -> Option<String>;
}

/// Pointer/touch movement feed from the document or player container
pub trait ActivitySource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ActivityEvent>;
}

/// Completion signal for a visual show/hide transition.
///
/// The surface resolves the ticket when its transition finishes; it may
/// also never resolve it, which the controller covers with a timeout
/// ceiling so the transition guard cannot lock up.
#[derive(Debug)]
pub struct TransitionTicket {
    pub(crate) rx: oneshot::Receiver<()>,
}

/// Sender half handed to the surface implementation
#[derive(Debug)]
pub struct TransitionSignal {
    tx: oneshot::Sender<()>,
}

impl TransitionTicket {
    pub fn pair() -> (TransitionSignal, TransitionTicket) {
        let (tx, rx) = oneshot::channel();
        (TransitionSignal { tx }, TransitionTicket { rx })
    }
}

impl TransitionSignal {
    /// Mark the visual transition as complete
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

/// Render sink for the single overlay node. Exclusively mutated by the
/// controller; no other component writes to it.
pub trait OverlaySurface: Send + Sync {
    /// Replace the rendered overlay content
    fn apply(&self, content: &OverlayContent);

    /// Drop any rendered content
    fn clear(&self);

    /// Start the show transition and return its completion ticket
    fn begin_show(&self) -> TransitionTicket;

    /// Start the hide transition and return its completion ticket
    fn begin_hide(&self) -> TransitionTicket;
}
