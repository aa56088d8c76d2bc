use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::{ItemKind, ItemMetadata};

/// Logical visibility target of the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Visual state of the single overlay node.
///
/// `Transitioning` is a short-lived guard preventing re-entrant
/// show/hide calls while a visual transition is conceptually in
/// flight; a target requested meanwhile is queued and applied when the
/// guard releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayVisualState {
    Settled(Visibility),
    Transitioning {
        target: Visibility,
        queued: Option<Visibility>,
    },
}

/// Owns the visible/hidden/transitioning state and the re-entrancy
/// rules. Pure logic; starting the actual surface transition is the
/// controller's job.
#[derive(Debug)]
pub struct OverlayStateMachine {
    state: OverlayVisualState,
}

impl OverlayStateMachine {
    pub fn new() -> Self {
        Self {
            state: OverlayVisualState::Settled(Visibility::Hidden),
        }
    }

    pub fn state(&self) -> OverlayVisualState {
        self.state
    }

    /// Logical visibility: the settled value, or the transition target
    /// while one is in flight
    pub fn is_visible(&self) -> bool {
        match self.state {
            OverlayVisualState::Settled(v) => v == Visibility::Visible,
            OverlayVisualState::Transitioning { target, queued } => {
                queued.unwrap_or(target) == Visibility::Visible
            }
        }
    }

    /// Request a visibility change.
    ///
    /// Returns `Some(target)` when a surface transition should start
    /// now; `None` when the overlay is already headed there or the
    /// request was queued behind an in-flight transition.
    pub fn request(&mut self, want: Visibility) -> Option<Visibility> {
        match &mut self.state {
            OverlayVisualState::Settled(current) if *current == want => None,
            OverlayVisualState::Settled(_) => {
                self.state = OverlayVisualState::Transitioning {
                    target: want,
                    queued: None,
                };
                Some(want)
            }
            OverlayVisualState::Transitioning { target, queued } => {
                if *target == want {
                    *queued = None;
                } else {
                    debug!("Queueing {:?} behind in-flight transition", want);
                    *queued = Some(want);
                }
                None
            }
        }
    }

    /// Release the transition guard, either from the surface's
    /// completion signal or from the timeout ceiling.
    ///
    /// Returns the queued target to start next, if any.
    pub fn transition_complete(&mut self) -> Option<Visibility> {
        match self.state {
            OverlayVisualState::Transitioning { target, queued } => match queued {
                Some(next) if next != target => {
                    self.state = OverlayVisualState::Transitioning {
                        target: next,
                        queued: None,
                    };
                    Some(next)
                }
                _ => {
                    self.state = OverlayVisualState::Settled(target);
                    None
                }
            },
            OverlayVisualState::Settled(_) => None,
        }
    }

    /// Force the hidden settled state, dropping any in-flight
    /// transition bookkeeping. Used on teardown paths.
    pub fn reset(&mut self) {
        self.state = OverlayVisualState::Settled(Visibility::Hidden);
    }
}

impl Default for OverlayStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Render payload for the overlay surface, derived from an item record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayContent {
    /// Small lead-in line ("You're watching")
    pub kicker: Option<String>,

    /// Main heading: series name for episodes, title for movies
    pub heading: String,

    /// Season line, episodes only
    pub season: Option<String>,

    /// Detail line: episode title and index, or year/rating/runtime
    pub detail: Option<String>,

    /// Item synopsis
    pub synopsis: String,
}

impl OverlayContent {
    /// Build render content from a fetched item record
    pub fn from_item(item: &ItemMetadata) -> Self {
        match item.kind {
            ItemKind::Episode => Self {
                kicker: Some("You're watching".to_string()),
                heading: item
                    .series_name
                    .clone()
                    .unwrap_or_else(|| "Unknown Series".to_string()),
                season: item.season_name.clone(),
                detail: Some(format!(
                    "{} (Ep. {})",
                    item.name.as_deref().unwrap_or("Unknown Episode"),
                    item.index_number
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "?".to_string())
                )),
                synopsis: item
                    .overview
                    .clone()
                    .unwrap_or_else(|| "No description available.".to_string()),
            },
            ItemKind::Movie => {
                let mut parts = Vec::new();
                if let Some(year) = item.production_year {
                    parts.push(year.to_string());
                }
                if let Some(rating) = &item.official_rating {
                    parts.push(rating.clone());
                }
                if let Some(runtime) = item.run_time_ticks.and_then(format_runtime) {
                    parts.push(runtime);
                }

                Self {
                    kicker: Some("You're watching".to_string()),
                    heading: item
                        .name
                        .clone()
                        .unwrap_or_else(|| "Unknown Movie".to_string()),
                    season: None,
                    detail: if parts.is_empty() {
                        None
                    } else {
                        Some(parts.join(" · "))
                    },
                    synopsis: item
                        .overview
                        .clone()
                        .unwrap_or_else(|| "No description available.".to_string()),
                }
            }
            ItemKind::Other => Self {
                kicker: Some("You're watching".to_string()),
                heading: item.name.clone().unwrap_or_else(|| "Unknown".to_string()),
                season: None,
                detail: None,
                synopsis: item
                    .overview
                    .clone()
                    .unwrap_or_else(|| "No description available.".to_string()),
            },
        }
    }

    /// Degraded content rendered when metadata could not be fetched
    pub fn unavailable() -> Self {
        Self {
            kicker: None,
            heading: "Information unavailable".to_string(),
            season: None,
            detail: None,
            synopsis: "Details for this title could not be loaded.".to_string(),
        }
    }
}

/// Format a runtime in 100ns ticks as "1h 23m" / "45m"
pub fn format_runtime(ticks: u64) -> Option<String> {
    if ticks == 0 {
        return None;
    }

    // 600,000,000 ticks per minute
    let total_minutes = ticks / 600_000_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    Some(if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_show_from_hidden_starts_transition() {
        let mut sm = OverlayStateMachine::new();
        assert_eq!(sm.request(Visibility::Visible), Some(Visibility::Visible));
        assert!(sm.is_visible());
        // Re-entrant request for the same target is absorbed
        assert_eq!(sm.request(Visibility::Visible), None);
    }

    #[test]
    fn test_opposite_request_queued_during_transition() {
        let mut sm = OverlayStateMachine::new();
        sm.request(Visibility::Visible);
        assert_eq!(sm.request(Visibility::Hidden), None);
        assert!(!sm.is_visible());

        // Guard release starts the queued hide
        assert_eq!(sm.transition_complete(), Some(Visibility::Hidden));
        assert_eq!(sm.transition_complete(), None);
        assert_eq!(
            sm.state(),
            OverlayVisualState::Settled(Visibility::Hidden)
        );
    }

    #[test]
    fn test_queued_target_cancelled_by_matching_request() {
        let mut sm = OverlayStateMachine::new();
        sm.request(Visibility::Visible);
        sm.request(Visibility::Hidden);
        // Viewer changed their mind back before the guard released
        sm.request(Visibility::Visible);
        assert_eq!(sm.transition_complete(), None);
        assert_eq!(
            sm.state(),
            OverlayVisualState::Settled(Visibility::Visible)
        );
    }

    #[test]
    fn test_reset_clears_transition() {
        let mut sm = OverlayStateMachine::new();
        sm.request(Visibility::Visible);
        sm.reset();
        assert_eq!(sm.state(), OverlayVisualState::Settled(Visibility::Hidden));
    }

    #[test]
    fn test_episode_content() {
        let item = ItemMetadata {
            kind: ItemKind::Episode,
            name: Some("Pilot".to_string()),
            series_name: Some("The Show".to_string()),
            season_name: Some("Season 1".to_string()),
            index_number: Some(1),
            overview: Some("It begins.".to_string()),
            ..Default::default()
        };
        let content = OverlayContent::from_item(&item);
        assert_eq!(content.heading, "The Show");
        assert_eq!(content.season.as_deref(), Some("Season 1"));
        assert_eq!(content.detail.as_deref(), Some("Pilot (Ep. 1)"));
        assert_eq!(content.synopsis, "It begins.");
    }

    #[test]
    fn test_movie_content_detail_line() {
        let item = ItemMetadata {
            kind: ItemKind::Movie,
            name: Some("Heat".to_string()),
            official_rating: Some("R".to_string()),
            production_year: Some(1995),
            run_time_ticks: Some(102 * 600_000_000),
            ..Default::default()
        };
        let content = OverlayContent::from_item(&item);
        assert_eq!(content.heading, "Heat");
        assert_eq!(content.detail.as_deref(), Some("1995 · R · 1h 42m"));
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let item = ItemMetadata {
            kind: ItemKind::Episode,
            ..Default::default()
        };
        let content = OverlayContent::from_item(&item);
        assert_eq!(content.heading, "Unknown Series");
        assert_eq!(content.detail.as_deref(), Some("Unknown Episode (Ep. ?)"));
        assert_eq!(content.synopsis, "No description available.");
    }

    #[test]
    fn test_format_runtime() {
        assert_eq!(format_runtime(0), None);
        assert_eq!(format_runtime(45 * 600_000_000).as_deref(), Some("45m"));
        assert_eq!(format_runtime(83 * 600_000_000).as_deref(), Some("1h 23m"));
    }
}
