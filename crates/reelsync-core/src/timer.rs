//! Suspend-for-duration timers keyed by session generation.
//!
//! A timer never cancels itself. Instead every ticket carries the session
//! serial and the phase generation it was scheduled under; the session
//! ignores a ticket whose generation no longer matches. Tearing a session
//! down additionally purges its pending tickets.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::identity::PlayerId;

/// What a timer resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The bite delay after the bobber comes to rest.
    Bite,
    /// The window in which a bite can be answered.
    ReelWindow,
}

/// A scheduled resumption point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    /// Player whose session scheduled the timer.
    pub owner: PlayerId,
    /// Which of that player's sessions.
    pub serial: u64,
    /// Phase generation at scheduling time.
    pub generation: u64,
    /// What to resume.
    pub kind: TimerKind,
}

/// Pending timers ordered by due time, then by scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    pending: BTreeMap<(Duration, u64), TimerTicket>,
    next_order: u64,
}

impl TimerQueue {
    /// Schedules `ticket` to fire at `due`.
    pub fn schedule(&mut self, due: Duration, ticket: TimerTicket) {
        let order = self.next_order;
        self.next_order += 1;
        self.pending.insert((due, order), ticket);
    }

    /// Removes the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, TimerTicket)> {
        let entry = self.pending.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        let ((due, _), ticket) = entry.remove_entry();
        Some((due, ticket))
    }

    /// Drops every timer belonging to one session. Returns how many.
    pub fn purge(&mut self, owner: PlayerId, serial: u64) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, ticket| !(ticket.owner == owner && ticket.serial == serial));
        before - self.pending.len()
    }

    /// Due time of the earliest pending timer.
    pub fn next_due(&self) -> Option<Duration> {
        self.pending.keys().next().map(|(due, _)| *due)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(owner: u64, serial: u64, kind: TimerKind) -> TimerTicket {
        TimerTicket {
            owner: PlayerId(owner),
            serial,
            generation: 0,
            kind,
        }
    }

    #[test]
    fn test_pop_respects_due_time() {
        let mut timers = TimerQueue::default();
        timers.schedule(Duration::from_secs(5), ticket(1, 0, TimerKind::Bite));
        assert!(timers.pop_due(Duration::from_secs(4)).is_none());
        let (due, fired) = timers.pop_due(Duration::from_secs(5)).unwrap();
        assert_eq!(due, Duration::from_secs(5));
        assert_eq!(fired.kind, TimerKind::Bite);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_equal_due_times_fire_in_schedule_order() {
        let mut timers = TimerQueue::default();
        let due = Duration::from_millis(1500);
        timers.schedule(due, ticket(2, 0, TimerKind::ReelWindow));
        timers.schedule(due, ticket(1, 0, TimerKind::Bite));

        let first = timers.pop_due(due).unwrap().1;
        let second = timers.pop_due(due).unwrap().1;
        assert_eq!(first.owner, PlayerId(2));
        assert_eq!(second.owner, PlayerId(1));
    }

    #[test]
    fn test_purge_only_hits_one_session() {
        let mut timers = TimerQueue::default();
        timers.schedule(Duration::from_secs(1), ticket(1, 0, TimerKind::Bite));
        timers.schedule(Duration::from_secs(2), ticket(1, 0, TimerKind::ReelWindow));
        timers.schedule(Duration::from_secs(3), ticket(1, 1, TimerKind::Bite));
        timers.schedule(Duration::from_secs(4), ticket(2, 0, TimerKind::Bite));

        assert_eq!(timers.purge(PlayerId(1), 0), 2);
        assert_eq!(timers.len(), 2);
        assert_eq!(timers.next_due(), Some(Duration::from_secs(3)));
    }
}
