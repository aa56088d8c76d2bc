//! Pause overlay controller for a media web client.
//!
//! Watches the host page for the tracked video element and, while
//! playback is paused and the viewer is inactive, drives an information
//! overlay rendered from remote item metadata. The host document,
//! player element and render surface are injected collaborators; this
//! crate owns the session lifecycle, the timers and the fetch
//! bookkeeping.

pub mod activity;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod host;
pub mod metadata;
pub mod overlay;
pub mod recovery;
pub mod session;
pub mod snapshot;

// Re-export main types for easy access
pub use crate::activity::ActivityTracker;
pub use crate::config::{Config, ConfigBuilder, FetchFallback};
pub use crate::controller::{Command, Controller};
pub use crate::credentials::{CredentialStore, Credentials};
pub use crate::error::{OverlayError, Result};
pub use crate::host::{
    ActivityEvent, ActivitySource, ChangeNotifier, CredentialStorage, OverlaySurface, PageMutation,
    PageProbe, PlaybackEvent, TransitionSignal, TransitionTicket, VideoElement, VideoId,
};
pub use crate::metadata::{ItemKind, ItemMetadata, MetadataClient};
pub use crate::overlay::{OverlayContent, OverlayStateMachine, OverlayVisualState, Visibility};
pub use crate::recovery::{Backoff, RecoveryState, RetryPolicy};
pub use crate::session::{PlaybackSession, SessionChange, SessionWatcher};
