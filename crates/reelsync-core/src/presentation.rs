//! Boundary with input and rendering.
//!
//! The core receives discrete [`InputEvent`]s for the local participant and
//! pushes one-way notifications into a [`PresentationSink`]. It never
//! queries the sink.

use std::sync::Mutex;

use glam::Vec3;

use crate::identity::PlayerId;
use crate::protocol::{ObserverCall, ObserverRpc};

/// Prompt shown to the owner when a fish bites.
pub const REEL_IN_PROMPT: &str = "Press R to Reel In!";

/// Prompt shown to the owner during the tap minigame.
pub fn taps_prompt(remaining: u32) -> String {
    format!("Press Space {remaining} more times to catch the fish!")
}

/// Discrete action of the locally controlled participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Throw the bobber.
    CastRequested,
    /// Try to hook a biting fish.
    CatchAttemptRequested,
    /// One tap of the minigame.
    TapRegistered,
}

/// Receives rendering notifications.
pub trait PresentationSink: Send + Sync {
    /// Show `text` to the local participant.
    fn show_prompt(&self, text: &str);

    /// Hide any prompt.
    fn clear_prompt(&self);

    /// Show the caught fish of `owner` for `duration_secs`.
    fn show_caught_effect(&self, owner: PlayerId, duration_secs: f32);

    /// Redraw the fishing line of `owner`.
    fn update_line_positions(&self, owner: PlayerId, rod_tip: Vec3, bobber: Vec3);

    /// Remove the fishing line of `owner`.
    fn clear_line(&self, _owner: PlayerId) {}
}

/// Runs an observer call against a view of `local`.
///
/// Prompts are owner-only; the caught effect is shown to everyone.
pub fn present_observer_call(
    call: &ObserverCall,
    local: Option<PlayerId>,
    sink: &dyn PresentationSink,
) {
    let own = local == Some(call.owner);
    match call.rpc {
        ObserverRpc::ShowReelInPrompt if own => sink.show_prompt(REEL_IN_PROMPT),
        ObserverRpc::StartCatchingMinigame { required_taps } if own => {
            sink.show_prompt(&taps_prompt(required_taps))
        }
        ObserverRpc::ShowCaughtFish { duration_secs } => {
            if own {
                sink.clear_prompt();
            }
            sink.show_caught_effect(call.owner, duration_secs);
        }
        ObserverRpc::ClearPrompt if own => sink.clear_prompt(),
        _ => {}
    }
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    /// [`PresentationSink::show_prompt`].
    Prompt(String),
    /// [`PresentationSink::clear_prompt`].
    ClearPrompt,
    /// [`PresentationSink::show_caught_effect`].
    CaughtEffect {
        /// Whose fish.
        owner: PlayerId,
        /// Display time.
        duration_secs: f32,
    },
    /// [`PresentationSink::update_line_positions`].
    Line {
        /// Whose line.
        owner: PlayerId,
        /// Line start.
        rod_tip: Vec3,
        /// Line end.
        bobber: Vec3,
    },
    /// [`PresentationSink::clear_line`].
    ClearLine(PlayerId),
}

/// Sink that stores every notification, for headless runs and tests.
#[derive(Debug, Default)]
pub struct RecordingPresentation {
    events: Mutex<Vec<PresentationEvent>>,
}

impl RecordingPresentation {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: PresentationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<PresentationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<PresentationEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Prompt texts in the order they were shown.
    pub fn prompts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PresentationEvent::Prompt(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl PresentationSink for RecordingPresentation {
    fn show_prompt(&self, text: &str) {
        self.record(PresentationEvent::Prompt(text.to_string()));
    }

    fn clear_prompt(&self) {
        self.record(PresentationEvent::ClearPrompt);
    }

    fn show_caught_effect(&self, owner: PlayerId, duration_secs: f32) {
        self.record(PresentationEvent::CaughtEffect {
            owner,
            duration_secs,
        });
    }

    fn update_line_positions(&self, owner: PlayerId, rod_tip: Vec3, bobber: Vec3) {
        self.record(PresentationEvent::Line {
            owner,
            rod_tip,
            bobber,
        });
    }

    fn clear_line(&self, owner: PlayerId) {
        self.record(PresentationEvent::ClearLine(owner));
    }
}

/// Sink that only logs. Line updates go to `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresentation;

impl PresentationSink for TracingPresentation {
    fn show_prompt(&self, text: &str) {
        tracing::info!(prompt = text, "show prompt");
    }

    fn clear_prompt(&self) {
        tracing::info!("clear prompt");
    }

    fn show_caught_effect(&self, owner: PlayerId, duration_secs: f32) {
        tracing::info!(%owner, duration_secs, "caught a fish");
    }

    fn update_line_positions(&self, owner: PlayerId, rod_tip: Vec3, bobber: Vec3) {
        tracing::trace!(%owner, ?rod_tip, ?bobber, "line");
    }
}
