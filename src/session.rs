use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{OverlayError, Result};
use crate::host::{ChangeNotifier, PageMutation, PageProbe, VideoElement, VideoId};
use crate::recovery::{self, RetryPolicy};

/// The period during which a single tracked video element is attached
/// to the page. Owned exclusively by the controller; destroyed together
/// with every derived timer and listener on detach or replacement.
pub struct PlaybackSession {
    pub video: Arc<dyn VideoElement>,
    pub item_id: Option<String>,
    pub attached_at: DateTime<Utc>,
}

impl PlaybackSession {
    pub fn new(video: Arc<dyn VideoElement>) -> Self {
        Self {
            video,
            item_id: None,
            attached_at: Utc::now(),
        }
    }
}

/// Identity change observed between two scans of the page
pub enum SessionChange {
    /// No previous handle, new element present
    Attached(Arc<dyn VideoElement>),
    /// Previous handle present, element now absent
    Detached,
    /// Element present but with a different identity; an atomic
    /// replace with no intermediate state observable to the controller
    Replaced(Arc<dyn VideoElement>),
}

impl std::fmt::Debug for SessionChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionChange::Attached(v) => write!(f, "Attached({:?})", v.id()),
            SessionChange::Detached => write!(f, "Detached"),
            SessionChange::Replaced(v) => write!(f, "Replaced({:?})", v.id()),
        }
    }
}

/// Watches the host document for the appearance, replacement and
/// removal of the tracked video element.
///
/// The watcher holds only the identity of the last reported handle;
/// probing and subscription mechanics live behind the injected
/// collaborator traits.
pub struct SessionWatcher {
    last_reported: Option<VideoId>,
    subscribed: bool,
}

impl SessionWatcher {
    pub fn new() -> Self {
        Self {
            last_reported: None,
            subscribed: false,
        }
    }

    /// Subscribe to the host mutation feed, retrying through the
    /// recovery policy while the observed root is not yet attached
    pub async fn start(
        &mut self,
        notifier: &dyn ChangeNotifier,
        policy: &RetryPolicy,
    ) -> Result<mpsc::Receiver<PageMutation>> {
        let feed = recovery::retry(policy, |attempt| async move {
            notifier.subscribe().await.map_err(|e| {
                debug!("Mutation feed subscription attempt {} failed: {}", attempt, e);
                OverlayError::ObserverSetupFailed(e.to_string())
            })
        })
        .await?;

        self.subscribed = true;
        info!("👀 Session watcher subscribed to host mutation feed");
        Ok(feed)
    }

    /// Compare the probed page state against the last reported handle.
    ///
    /// Returns `None` when nothing changed identity-wise; re-entrant
    /// notifications without an identity change are no-ops.
    pub fn scan(&mut self, probe: &dyn PageProbe) -> Option<SessionChange> {
        let current = probe.current_video();

        match (self.last_reported, current) {
            (None, Some(video)) => {
                self.last_reported = Some(video.id());
                Some(SessionChange::Attached(video))
            }
            (Some(_), None) => {
                self.last_reported = None;
                Some(SessionChange::Detached)
            }
            (Some(last), Some(video)) if video.id() != last => {
                self.last_reported = Some(video.id());
                Some(SessionChange::Replaced(video))
            }
            _ => None,
        }
    }

    /// Release the subscription state. Idempotent; the feed receiver
    /// itself is dropped by the owner of the event loop.
    pub fn stop(&mut self) {
        if self.subscribed {
            debug!("Session watcher stopped");
        }
        self.subscribed = false;
        self.last_reported = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

impl Default for SessionWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PlaybackEvent;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    struct FakeVideo {
        id: VideoId,
        events: broadcast::Sender<PlaybackEvent>,
    }

    impl FakeVideo {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(8);
            Arc::new(Self {
                id: VideoId::next(),
                events,
            })
        }
    }

    impl VideoElement for FakeVideo {
        fn id(&self) -> VideoId {
            self.id
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn has_ended(&self) -> bool {
            false
        }
        fn request_play(&self) {}
        fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
            self.events.subscribe()
        }
    }

    struct FakeProbe {
        video: Mutex<Option<Arc<FakeVideo>>>,
    }

    impl FakeProbe {
        fn new() -> Self {
            Self {
                video: Mutex::new(None),
            }
        }
        fn set(&self, video: Option<Arc<FakeVideo>>) {
            *self.video.lock().unwrap() = video;
        }
    }

    impl PageProbe for FakeProbe {
        fn current_video(&self) -> Option<Arc<dyn VideoElement>> {
            self.video
                .lock()
                .unwrap()
                .clone()
                .map(|v| v as Arc<dyn VideoElement>)
        }
        fn extract_item_id(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_attach_detach_cycle() {
        let mut watcher = SessionWatcher::new();
        let probe = FakeProbe::new();

        assert!(watcher.scan(&probe).is_none());

        let video = FakeVideo::new();
        probe.set(Some(video.clone()));
        assert!(matches!(
            watcher.scan(&probe),
            Some(SessionChange::Attached(_))
        ));

        // Re-entrant notification without identity change is a no-op
        assert!(watcher.scan(&probe).is_none());

        probe.set(None);
        assert!(matches!(watcher.scan(&probe), Some(SessionChange::Detached)));
        assert!(watcher.scan(&probe).is_none());
    }

    #[test]
    fn test_identity_change_is_atomic_replace() {
        let mut watcher = SessionWatcher::new();
        let probe = FakeProbe::new();

        let first = FakeVideo::new();
        probe.set(Some(first));
        watcher.scan(&probe);

        let second = FakeVideo::new();
        let second_id = second.id;
        probe.set(Some(second));

        match watcher.scan(&probe) {
            Some(SessionChange::Replaced(video)) => assert_eq!(video.id(), second_id),
            other => panic!("expected Replaced, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut watcher = SessionWatcher::new();
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_subscribed());
    }
}
