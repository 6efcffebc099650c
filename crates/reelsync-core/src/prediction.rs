//! Owner-side prediction of the avatar position.
//!
//! The owning participant moves its avatar immediately, submits the result
//! to the authority and remembers it as pending. The authority echoes one
//! position write per submission, in order: the submitted position when
//! accepted, the canonical one when refused. Reconciling an echo against
//! the oldest pending submission either confirms it or snaps the
//! prediction back to the authoritative value.

use std::collections::VecDeque;

use glam::Vec3;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of unconfirmed submissions kept (~2 s at 60 Hz).
pub const DEFAULT_PENDING_CAP: usize = 128;

/// Positions closer than this are considered equal.
pub const POSITION_EPSILON: f32 = 1e-4;

// ---------------------------------------------------------------------------
// OwnerPrediction
// ---------------------------------------------------------------------------

/// Outcome of reconciling one authoritative echo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// The echo matched the prediction.
    Confirmed,
    /// The authority disagreed; the prediction was replaced.
    Corrected {
        /// Position predicted before the correction.
        from: Vec3,
        /// Authoritative position now in force.
        to: Vec3,
    },
}

/// Locally predicted position plus the submissions awaiting an echo.
#[derive(Debug, Clone)]
pub struct OwnerPrediction {
    predicted: Vec3,
    pending: VecDeque<Vec3>,
    cap: usize,
}

impl OwnerPrediction {
    /// Prediction starting at `position` with the default buffer size.
    pub fn new(position: Vec3) -> Self {
        Self::with_capacity(position, DEFAULT_PENDING_CAP)
    }

    /// Prediction keeping at most `cap` unconfirmed submissions.
    pub fn with_capacity(position: Vec3, cap: usize) -> Self {
        Self {
            predicted: position,
            pending: VecDeque::with_capacity(cap),
            cap: cap.max(1),
        }
    }

    /// Forgets every pending submission and jumps to `position`.
    pub fn reset(&mut self, position: Vec3) {
        self.predicted = position;
        self.pending.clear();
    }

    /// Applies a local move and records it as pending. Returns the new
    /// predicted position, which is what gets submitted.
    pub fn apply_local(&mut self, delta: Vec3) -> Vec3 {
        self.predicted += delta;
        if self.pending.len() == self.cap {
            self.pending.pop_front();
        }
        self.pending.push_back(self.predicted);
        self.predicted
    }

    /// Reconciles one authoritative position echo.
    pub fn reconcile(&mut self, authoritative: Vec3) -> Reconciliation {
        match self.pending.pop_front() {
            Some(expected) if expected.abs_diff_eq(authoritative, POSITION_EPSILON) => {
                Reconciliation::Confirmed
            }
            None if self.predicted.abs_diff_eq(authoritative, POSITION_EPSILON) => {
                Reconciliation::Confirmed
            }
            _ => {
                let from = self.predicted;
                self.reset(authoritative);
                Reconciliation::Corrected {
                    from,
                    to: authoritative,
                }
            }
        }
    }

    /// Current predicted position.
    pub fn predicted(&self) -> Vec3 {
        self.predicted
    }

    /// Submissions not yet echoed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
