use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activity::ActivityTracker;
use crate::config::{Config, FetchFallback};
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{OverlayError, Result};
use crate::host::{
    ActivityEvent, ActivitySource, ChangeNotifier, CredentialStorage, OverlaySurface,
    PageMutation, PageProbe, PlaybackEvent, TransitionTicket, VideoElement,
};
use crate::metadata::{ItemMetadata, MetadataClient};
use crate::overlay::{OverlayContent, OverlayStateMachine, Visibility};
use crate::recovery;
use crate::session::{PlaybackSession, SessionChange, SessionWatcher};

/// Embedder commands accepted while the controller runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Hide the overlay and ask the player to resume (overlay click,
    /// Escape)
    Dismiss,
    /// Tear everything down and stop the event loop
    Shutdown,
}

/// Internal events; every state mutation flows through
/// `Controller::dispatch` with one of these
#[derive(Debug)]
pub(crate) enum Event {
    Mutation,
    Playback(PlaybackEvent),
    Activity(ActivityEvent),
    InactivityElapsed,
    FetchResolved {
        item_id: String,
        outcome: Result<ItemMetadata>,
    },
    TransitionComplete,
    LivenessTick,
    Command(Command),
}

struct InFlightFetch {
    item_id: String,
    handle: JoinHandle<Result<ItemMetadata>>,
}

impl Drop for InFlightFetch {
    fn drop(&mut self) {
        // Dropping the flight logically cancels the fetch
        self.handle.abort();
    }
}

/// The playback-session lifecycle controller.
///
/// Runs as a single task; every state mutation happens inside its
/// `select!` loop, so invariants within a dispatch never need locking.
/// All timers and the in-flight fetch are owned by the loop, and every
/// teardown path (play, detach, replace, shutdown) drops them, so no
/// callback can fire against a stale session.
pub struct Controller {
    config: Config,
    credentials: Credentials,
    client: MetadataClient,

    probe: Arc<dyn PageProbe>,
    surface: Arc<dyn OverlaySurface>,

    watcher: SessionWatcher,
    tracker: ActivityTracker,
    overlay: OverlayStateMachine,

    mutations: mpsc::Receiver<PageMutation>,
    activity_rx: broadcast::Receiver<ActivityEvent>,
    playback_rx: Option<broadcast::Receiver<PlaybackEvent>>,

    session: Option<PlaybackSession>,
    cached: Option<(String, ItemMetadata)>,
    in_flight: Option<InFlightFetch>,
    failed_item: Option<String>,
    reveal_pending: bool,

    transition: Option<TransitionTicket>,
    transition_deadline: Option<Instant>,
}

impl Controller {
    /// Discover credentials and subscribe to the host mutation feed,
    /// both through the configured recovery policies.
    ///
    /// Repeatedly missing credentials surface as
    /// `CredentialsUnavailable`; the embedder is expected to leave the
    /// controller inert for the page lifetime in that case.
    pub async fn initialize(
        config: Config,
        storage: Arc<dyn CredentialStorage>,
        notifier: Arc<dyn ChangeNotifier>,
        probe: Arc<dyn PageProbe>,
        activity: Arc<dyn ActivitySource>,
        surface: Arc<dyn OverlaySurface>,
    ) -> Result<Self> {
        let store = CredentialStore::new(storage, config.server.storage_key.clone());
        let credentials_policy = config.recovery.credentials.policy();
        let credentials = recovery::retry(&credentials_policy, |attempt| {
            let store = &store;
            async move {
                store
                    .load()
                    .ok_or(OverlayError::CredentialsUnavailable { attempts: attempt })
            }
        })
        .await?;
        info!("🔑 Credentials discovered for user {}", credentials.user_id);

        let client = MetadataClient::new(&config.server, &config.fetch)?;

        let mut watcher = SessionWatcher::new();
        let observer_policy = config.recovery.observer.policy();
        let mutations = watcher.start(notifier.as_ref(), &observer_policy).await?;

        let activity_rx = activity.subscribe();
        let tracker = ActivityTracker::new(
            config.timing.inactivity_threshold(),
            config.timing.activity_debounce(),
        );

        Ok(Self {
            config,
            credentials,
            client,
            probe,
            surface,
            watcher,
            tracker,
            overlay: OverlayStateMachine::new(),
            mutations,
            activity_rx,
            playback_rx: None,
            session: None,
            cached: None,
            in_flight: None,
            failed_item: None,
            reveal_pending: false,
            transition: None,
            transition_deadline: None,
        })
    }

    /// Run the event loop until shutdown or loss of the command channel
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        info!("▶️  Overlay controller running");

        // A video may already be on the page
        self.dispatch(Event::Mutation);

        let mut liveness = tokio::time::interval(self.config.timing.liveness_interval());
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let inactivity_at = self.tracker.deadline();
            let ceiling_at = self.transition_deadline;

            let event = tokio::select! {
                mutation = self.mutations.recv() => match mutation {
                    Some(_) => Event::Mutation,
                    None => {
                        debug!("Mutation feed closed, shutting down");
                        Event::Command(Command::Shutdown)
                    }
                },

                playback = next_playback(&mut self.playback_rx), if self.playback_rx.is_some() => {
                    Event::Playback(playback)
                },

                activity = self.activity_rx.recv() => match activity {
                    Ok(ev) => Event::Activity(ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Activity feed lagged by {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Activity feed closed, shutting down");
                        Event::Command(Command::Shutdown)
                    }
                },

                _ = sleep_until_opt(inactivity_at), if inactivity_at.is_some() => {
                    Event::InactivityElapsed
                },

                (item_id, outcome) = join_fetch(&mut self.in_flight), if self.in_flight.is_some() => {
                    let outcome = match outcome {
                        Ok(inner) => inner,
                        Err(e) => Err(OverlayError::FetchFailed {
                            attempts: 0,
                            status: None,
                            message: format!("fetch task failed: {}", e),
                        }),
                    };
                    Event::FetchResolved { item_id, outcome }
                },

                _ = await_ticket(&mut self.transition), if self.transition.is_some() => {
                    Event::TransitionComplete
                },

                _ = sleep_until_opt(ceiling_at), if ceiling_at.is_some() => {
                    debug!("Transition completion signal missed, releasing guard at ceiling");
                    Event::TransitionComplete
                },

                _ = liveness.tick() => Event::LivenessTick,

                command = commands.recv() => match command {
                    Some(cmd) => Event::Command(cmd),
                    None => Event::Command(Command::Shutdown),
                },
            };

            if let Event::Command(Command::Shutdown) = event {
                self.teardown_session();
                self.watcher.stop();
                info!("⏹️  Overlay controller stopped");
                return Ok(());
            }

            self.dispatch(event);
        }
    }

    /// Single mutation entry point: all controller state changes happen
    /// here, event by event
    pub(crate) fn dispatch(&mut self, event: Event) {
        match event {
            Event::Mutation | Event::LivenessTick => {
                if let Some(change) = self.watcher.scan(self.probe.as_ref()) {
                    self.on_session_change(change);
                }
            }
            Event::Playback(PlaybackEvent::Paused) => self.on_pause(),
            Event::Playback(PlaybackEvent::Played) => self.on_play(),
            Event::Playback(PlaybackEvent::Ended) => {
                debug!("Playback ended; later pause events will be ignored");
            }
            Event::Activity(_) => self.on_activity(),
            Event::InactivityElapsed => self.on_inactivity(),
            Event::FetchResolved { item_id, outcome } => self.on_fetch_resolved(item_id, outcome),
            Event::TransitionComplete => self.on_transition_complete(),
            Event::Command(Command::Dismiss) => self.on_dismiss(),
            Event::Command(Command::Shutdown) => {}
        }
    }

    fn on_session_change(&mut self, change: SessionChange) {
        match change {
            SessionChange::Attached(video) => self.attach(video),
            SessionChange::Detached => {
                info!("📴 Video detached, tearing session down");
                self.teardown_session();
            }
            SessionChange::Replaced(video) => {
                // Atomic replace: teardown and attach in one dispatch,
                // no overlay flash for the outgoing video
                info!("🔁 Video replaced, restarting session");
                self.attach(video);
            }
        }
    }

    fn attach(&mut self, video: Arc<dyn VideoElement>) {
        self.teardown_session();

        self.playback_rx = Some(video.subscribe());
        self.session = Some(PlaybackSession::new(video));
        info!("🎬 Playback session attached");
    }

    fn on_pause(&mut self) {
        let now = Instant::now();

        let (ended, attached_at) = match &self.session {
            Some(session) => (session.video.has_ended(), session.attached_at),
            None => return,
        };
        if ended {
            debug!("Pause after end of playback, ignoring");
            return;
        }

        if let Some(grace) = self.config.timing.startup_pause_grace() {
            let since_attach = (chrono::Utc::now() - attached_at)
                .to_std()
                .unwrap_or_default();
            if since_attach < grace {
                debug!(
                    "Pause within startup grace window ({:?} after attach), ignoring",
                    since_attach
                );
                return;
            }
        }

        debug!("Video paused, arming inactivity tracking");
        self.refresh_item_id();
        self.prefetch();
        self.tracker.arm(now);

        // A viewer whose last recorded movement is already older than
        // the threshold sees the overlay without a fresh wait
        if self.tracker.has_recorded_activity() && self.tracker.idle_past_threshold(now) {
            self.reveal();
        }
    }

    fn on_play(&mut self) {
        if self.session.is_none() {
            return;
        }
        debug!("Video playing, hiding overlay");
        self.set_visibility(Visibility::Hidden);
        self.tracker.disarm();
        self.in_flight = None;
        self.reveal_pending = false;
        self.surface.clear();
    }

    fn on_activity(&mut self) {
        let now = Instant::now();
        if !self.tracker.record_activity(now) {
            return;
        }

        if self.overlay.is_visible() {
            // Hide, but keep inactivity detection armed so the overlay
            // reappears after the next quiet period
            self.set_visibility(Visibility::Hidden);
        }
    }

    fn on_inactivity(&mut self) {
        let now = Instant::now();
        if !self.tracker.fire_if_due(now) {
            return;
        }

        if self.session_paused() {
            self.reveal();
        }
    }

    /// Show the overlay for the session's current item, fetching or
    /// degrading as the metadata state dictates
    fn reveal(&mut self) {
        if self.session.is_none() {
            return;
        }

        // OSD controls can render after the pause; re-probe so an item
        // id that appeared late is still picked up
        self.refresh_item_id();

        let item_id = match self.current_item_id() {
            Some(id) => id,
            None => {
                // Tolerated; retried on the next pause/activity cycle
                warn!("Item ID not found, cannot update overlay");
                return;
            }
        };

        let cached_content = match &self.cached {
            Some((cached_id, item)) if *cached_id == item_id => {
                Some(OverlayContent::from_item(item))
            }
            _ => None,
        };
        if let Some(content) = cached_content {
            self.surface.apply(&content);
            self.set_visibility(Visibility::Visible);
            return;
        }

        if self.fetch_in_flight_for(&item_id) {
            // Reveal once the result arrives, provided pause and
            // inactivity still hold
            self.reveal_pending = true;
            return;
        }

        if self.failed_item.as_deref() == Some(item_id.as_str()) {
            self.degrade();
            return;
        }

        self.spawn_fetch(item_id);
        self.reveal_pending = true;
    }

    fn degrade(&mut self) {
        match self.config.fetch.fallback {
            FetchFallback::Degraded => {
                self.surface.apply(&OverlayContent::unavailable());
                self.set_visibility(Visibility::Visible);
            }
            FetchFallback::Suppress => {
                debug!("Metadata unavailable and fallback is suppress; overlay stays hidden");
            }
        }
    }

    /// Extract the item id from page state and reconcile it with the
    /// session. A new id supersedes any in-flight fetch for the old one.
    fn refresh_item_id(&mut self) {
        let extracted = self.probe.extract_item_id();

        let session = match &mut self.session {
            Some(session) => session,
            None => return,
        };

        match extracted {
            Some(id) => {
                if session.item_id.as_deref() != Some(id.as_str()) {
                    debug!("Active item changed to {}", id);
                    session.item_id = Some(id);
                    // Anything in flight for the previous id is now
                    // superseded
                    self.in_flight = None;
                    self.failed_item = None;
                    self.reveal_pending = false;
                }
            }
            None => {
                debug!("No item id extractable from page state yet");
            }
        }
    }

    /// Start a fetch for the session's item unless one is cached,
    /// running, or known-failed
    fn prefetch(&mut self) {
        let item_id = match self.current_item_id() {
            Some(id) => id,
            None => return,
        };

        let cached = self
            .cached
            .as_ref()
            .map(|(id, _)| *id == item_id)
            .unwrap_or(false);
        let failed = self.failed_item.as_deref() == Some(item_id.as_str());

        if !cached && !failed && !self.fetch_in_flight_for(&item_id) {
            self.spawn_fetch(item_id);
        }
    }

    fn current_item_id(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.item_id.clone())
    }

    fn session_paused(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.video.is_paused())
            .unwrap_or(false)
    }

    fn fetch_in_flight_for(&self, item_id: &str) -> bool {
        self.in_flight
            .as_ref()
            .map(|f| f.item_id == item_id)
            .unwrap_or(false)
    }

    fn spawn_fetch(&mut self, item_id: String) {
        let client = self.client.clone();
        let credentials = self.credentials.clone();
        let id = item_id.clone();

        debug!("Fetching metadata for item {}", id);
        let handle = tokio::spawn(async move { client.fetch_item(&id, &credentials).await });
        self.in_flight = Some(InFlightFetch { item_id, handle });
    }

    fn on_fetch_resolved(&mut self, item_id: String, outcome: Result<ItemMetadata>) {
        if self.fetch_in_flight_for(&item_id) {
            self.in_flight = None;
        }

        // Re-check identity before rendering: a result whose item id no
        // longer matches the session is superseded and discarded
        if self.current_item_id().as_deref() != Some(item_id.as_str()) {
            debug!("Discarding superseded fetch result for item {}", item_id);
            return;
        }

        let deferred = std::mem::take(&mut self.reveal_pending);

        match outcome {
            Ok(item) => {
                debug!("Metadata resolved for item {}", item_id);
                self.cached = Some((item_id, item));
                self.failed_item = None;
                if deferred && self.still_revealable() {
                    self.reveal();
                }
            }
            Err(e) => {
                warn!("Metadata fetch for item {} failed: {}", item_id, e);
                self.failed_item = Some(item_id);
                if deferred && self.still_revealable() {
                    self.degrade();
                }
            }
        }
    }

    /// Pause and sustained inactivity must still hold for a deferred
    /// reveal to go through
    fn still_revealable(&self) -> bool {
        self.session_paused() && self.tracker.idle_past_threshold(Instant::now())
    }

    fn on_transition_complete(&mut self) {
        self.transition = None;
        self.transition_deadline = None;

        if let Some(next) = self.overlay.transition_complete() {
            self.start_transition(next);
        }
    }

    fn on_dismiss(&mut self) {
        debug!("Overlay dismissed by viewer");
        self.set_visibility(Visibility::Hidden);
        self.tracker.disarm();
        self.reveal_pending = false;

        if let Some(session) = &self.session {
            if session.video.is_paused() {
                session.video.request_play();
            }
        }
    }

    fn set_visibility(&mut self, target: Visibility) {
        if let Some(start) = self.overlay.request(target) {
            self.start_transition(start);
        }
    }

    fn start_transition(&mut self, target: Visibility) {
        let ticket = match target {
            Visibility::Visible => self.surface.begin_show(),
            Visibility::Hidden => self.surface.begin_hide(),
        };
        self.transition = Some(ticket);
        self.transition_deadline =
            Some(Instant::now() + self.config.timing.transition_ceiling());
    }

    /// Full teardown: disarm the tracker, drop the in-flight fetch,
    /// clear rendered content and release video-specific listeners.
    /// Every path back to `Idle` goes through here.
    fn teardown_session(&mut self) {
        if self.session.is_none() {
            return;
        }

        self.tracker.disarm();
        self.in_flight = None;
        self.reveal_pending = false;
        self.cached = None;
        self.failed_item = None;
        self.playback_rx = None;
        self.session = None;

        self.overlay.reset();
        self.transition = None;
        self.transition_deadline = None;
        self.surface.clear();
    }

    #[cfg(test)]
    pub(crate) fn session_video_id(&self) -> Option<crate::host::VideoId> {
        self.session.as_ref().map(|s| s.video.id())
    }

    #[cfg(test)]
    pub(crate) fn overlay_visible(&self) -> bool {
        self.overlay.is_visible()
    }

    #[cfg(test)]
    pub(crate) fn has_in_flight_fetch(&self) -> bool {
        self.in_flight.is_some()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Await the playback feed, skipping lag and pending forever when no
/// session is attached or the sender is gone (the watcher reports the
/// detach separately)
async fn next_playback(rx: &mut Option<broadcast::Receiver<PlaybackEvent>>) -> PlaybackEvent {
    let rx = match rx {
        Some(rx) => rx,
        None => return std::future::pending().await,
    };
    loop {
        match rx.recv().await {
            Ok(ev) => return ev,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

async fn join_fetch(
    in_flight: &mut Option<InFlightFetch>,
) -> (
    String,
    std::result::Result<Result<ItemMetadata>, tokio::task::JoinError>,
) {
    match in_flight {
        Some(flight) => {
            let item_id = flight.item_id.clone();
            let outcome = (&mut flight.handle).await;
            (item_id, outcome)
        }
        None => std::future::pending().await,
    }
}

async fn await_ticket(ticket: &mut Option<TransitionTicket>) {
    match ticket {
        Some(ticket) => {
            let _ = (&mut ticket.rx).await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::metadata::{ItemKind, ItemMetadata};
    use crate::snapshot::{
        idle_page, player_page, MemoryStorage, RecordingSurface, SnapshotPage, SurfaceEvent,
        TransitionMode,
    };
    use std::time::Duration;

    fn movie(name: &str) -> ItemMetadata {
        ItemMetadata {
            kind: ItemKind::Movie,
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Controller wired to a snapshot page, with fetches aimed at a
    /// closed port so only injected `FetchResolved` events matter
    async fn harness(config: Config) -> (Controller, Arc<SnapshotPage>, Arc<RecordingSurface>) {
        let storage = MemoryStorage::with_credentials(
            &config.server.storage_key,
            "test-token",
            "test-user",
        );
        let page = SnapshotPage::new(config.selectors.clone());
        let surface = RecordingSurface::new(TransitionMode::Immediate);

        let controller = Controller::initialize(
            config,
            storage,
            page.clone(),
            page.clone(),
            page.clone(),
            surface.clone(),
        )
        .await
        .expect("controller init");

        (controller, page, surface)
    }

    fn test_config() -> Config {
        ConfigBuilder::new()
            .with_base_url("http://127.0.0.1:9")
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_tracks_most_recent_video() {
        let (mut controller, page, surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        let first = page.video().expect("mounted").id();
        assert_eq!(controller.session_video_id(), Some(first));

        page.remount_player();
        controller.dispatch(Event::Mutation);
        let second = page.video().expect("remounted").id();
        assert_ne!(first, second);
        assert_eq!(controller.session_video_id(), Some(second));

        page.navigate(&idle_page());
        controller.dispatch(Event::Mutation);
        assert_eq!(controller.session_video_id(), None);
        assert!(surface.events().contains(&SurfaceEvent::Cleared));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_fetch_never_overwrites_newer_state() {
        let (mut controller, page, surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        // The active item changes before the first fetch resolves
        page.navigate(&player_page("bbb"));
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);

        // The stale result for the first item arrives late
        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Ok(movie("Stale")),
        });
        assert!(surface.last_applied().is_none());
        assert!(!controller.overlay_visible());

        controller.dispatch(Event::FetchResolved {
            item_id: "bbb".to_string(),
            outcome: Ok(movie("Fresh")),
        });
        let applied = surface.last_applied().expect("rendered");
        assert_eq!(applied.heading, "Fresh");
        assert!(controller.overlay_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_hides_and_cancels_everything() {
        let (mut controller, page, surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));
        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Ok(movie("Film")),
        });

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);
        assert!(controller.overlay_visible());

        page.video().expect("mounted").play();
        controller.dispatch(Event::Playback(PlaybackEvent::Played));

        assert!(!controller.overlay_visible());
        assert!(controller.tracker.deadline().is_none());
        assert!(!controller.has_in_flight_fetch());
        assert_eq!(surface.events().last(), Some(&SurfaceEvent::Cleared));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_item_id_is_picked_up_on_next_firing() {
        let (mut controller, page, surface) = harness(test_config()).await;

        // Player mounts before the OSD controls carrying the item id
        page.navigate(
            r#"<html><body><div class="videoPlayerContainer"><video></video></div></body></html>"#,
        );
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        // First firing finds no extractable id and is tolerated
        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);
        assert!(!controller.overlay_visible());

        // OSD renders late: same video element, id now present
        page.navigate(&player_page("f00d"));
        controller.dispatch(Event::Mutation);

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);
        controller.dispatch(Event::FetchResolved {
            item_id: "f00d".to_string(),
            outcome: Ok(movie("Heat")),
        });

        assert!(controller.overlay_visible());
        assert_eq!(surface.last_applied().expect("rendered").heading, "Heat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_tick_detects_silently_vanished_video() {
        let (mut controller, page, surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        assert!(controller.session_video_id().is_some());

        // The page changed but the mutation notification was never
        // consumed; the periodic re-scan still notices the detach
        page.navigate(&idle_page());
        controller.dispatch(Event::LivenessTick);

        assert_eq!(controller.session_video_id(), None);
        assert!(surface.events().contains(&SurfaceEvent::Cleared));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_after_ended_is_ignored() {
        let (mut controller, page, _surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").finish();
        controller.dispatch(Event::Playback(PlaybackEvent::Ended));
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        assert!(controller.tracker.deadline().is_none());
        assert!(!controller.has_in_flight_fetch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_grace_swallows_first_pause() {
        let config = ConfigBuilder::new()
            .with_base_url("http://127.0.0.1:9")
            .with_startup_pause_grace(Some(Duration::from_secs(60)))
            .build();
        let (mut controller, page, _surface) = harness(config).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        assert!(controller.tracker.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_hides_visible_overlay_and_rearms() {
        let (mut controller, page, _surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));
        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Ok(movie("Film")),
        });

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);
        assert!(controller.overlay_visible());

        controller.dispatch(Event::Activity(ActivityEvent::PointerMove));
        assert!(!controller.overlay_visible());
        // Inactivity detection stays armed for the next quiet period
        assert!(controller.tracker.deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_renders_degraded_content() {
        let (mut controller, page, surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);

        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Err(OverlayError::FetchFailed {
                attempts: 3,
                status: Some(500),
                message: "HTTP 500".to_string(),
            }),
        });

        let applied = surface.last_applied().expect("degraded content");
        assert_eq!(applied, OverlayContent::unavailable());
        assert!(controller.overlay_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppress_fallback_renders_nothing() {
        let config = ConfigBuilder::new()
            .with_base_url("http://127.0.0.1:9")
            .with_fallback(FetchFallback::Suppress)
            .build();
        let (mut controller, page, surface) = harness(config).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);
        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Err(OverlayError::FetchFailed {
                attempts: 3,
                status: Some(500),
                message: "HTTP 500".to_string(),
            }),
        });

        assert!(surface.last_applied().is_none());
        assert!(!controller.overlay_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_hides_and_requests_resume() {
        let (mut controller, page, _surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);
        let video = page.video().expect("mounted");
        video.pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));
        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Ok(movie("Film")),
        });

        tokio::time::advance(Duration::from_millis(10_000)).await;
        controller.dispatch(Event::InactivityElapsed);
        assert!(controller.overlay_visible());

        controller.dispatch(Event::Command(Command::Dismiss));
        assert!(!controller.overlay_visible());
        assert_eq!(video.play_request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_while_long_idle_reveals_without_second_wait() {
        let (mut controller, page, _surface) = harness(test_config()).await;

        page.navigate(&player_page("aaa"));
        controller.dispatch(Event::Mutation);

        // The viewer moved once, long ago
        controller.dispatch(Event::Activity(ActivityEvent::PointerMove));
        tokio::time::advance(Duration::from_millis(15_000)).await;

        page.video().expect("mounted").pause();
        controller.dispatch(Event::Playback(PlaybackEvent::Paused));
        controller.dispatch(Event::FetchResolved {
            item_id: "aaa".to_string(),
            outcome: Ok(movie("Film")),
        });

        // Visible without waiting for another inactivity firing
        assert!(controller.overlay_visible());
    }
}
