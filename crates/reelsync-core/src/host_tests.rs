use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use proptest::prelude::*;

use reelsync_config::{FishingConfig, ReelTimeoutPolicy};

use super::*;
use crate::bobber::{Phase, Resolution};
use crate::error::FishingError;
use crate::identity::PlayerId;
use crate::presentation::{
    InputEvent, PresentationEvent, REEL_IN_PROMPT, RecordingPresentation, taps_prompt,
};
use crate::protocol::{AuthorityCall, AuthorityRpc, Delivery, Envelope, ObserverCall, ObserverRpc};
use crate::replica::FishingReplica;
use crate::replicated::VarKey;
use crate::scoreboard::Scoreboard;

const A: PlayerId = PlayerId(1);
const B: PlayerId = PlayerId(2);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Rod tip at water level, so a cast comes to rest immediately, and a bite
/// delay pinned just above five seconds.
fn surface_rules() -> FishingConfig {
    FishingConfig {
        cast_point_offset: [0.0, -0.5, 0.5],
        bite_delay_secs: (5.0, 5.001),
        seed: Some(42),
        ..FishingConfig::default()
    }
}

fn host_with(rules: FishingConfig, players: &[PlayerId]) -> (FishingHost, Arc<Scoreboard>) {
    let board = Arc::new(Scoreboard::new());
    let mut host = FishingHost::new(rules, board.clone()).unwrap();
    for player in players {
        host.connect(*player).unwrap();
    }
    host.drain_deliveries();
    (host, board)
}

fn call(host: &mut FishingHost, player: PlayerId, rpc: AuthorityRpc) -> Result<(), FishingError> {
    host.handle_call(player, AuthorityCall { player, rpc })
}

/// Advances in 10 ms steps until `t` seconds of simulated time.
fn run_until(host: &mut FishingHost, t: f64) {
    while host.now().as_secs_f64() + 1e-9 < t {
        host.advance(Duration::from_millis(10));
    }
}

fn phase(host: &FishingHost, player: PlayerId) -> Phase {
    host.controller(player).unwrap().phase()
}

fn observer_rpcs(deliveries: &[(PlayerId, Delivery)], to: PlayerId) -> Vec<ObserverRpc> {
    deliveries
        .iter()
        .filter(|(player, _)| *player == to)
        .filter_map(|(_, delivery)| match &delivery.envelope {
            Envelope::Observers(ObserverCall { rpc, .. }) => Some(rpc.clone()),
            _ => None,
        })
        .collect()
}

fn kinds(deliveries: &[(PlayerId, Delivery)], to: PlayerId) -> Vec<&'static str> {
    deliveries
        .iter()
        .filter(|(player, _)| *player == to)
        .map(|(_, delivery)| delivery.envelope.kind())
        .collect()
}

fn pump(host: &mut FishingHost, replicas: &mut [(PlayerId, &mut FishingReplica)]) {
    for (to, delivery) in host.drain_deliveries() {
        if let Some((_, replica)) = replicas.iter_mut().find(|(id, _)| *id == to) {
            replica.receive(delivery).unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_cast_then_bite_after_delay() {
    let (mut host, _) = host_with(surface_rules(), &[A]);
    let view = Arc::new(RecordingPresentation::new());
    host.attach_view(Some(A), view.clone());

    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    assert_eq!(phase(&host, A), Phase::Resting);

    run_until(&mut host, 4.9);
    assert_eq!(phase(&host, A), Phase::Resting);

    run_until(&mut host, 5.1);
    assert_eq!(phase(&host, A), Phase::Biting);
    let session = host.controller(A).unwrap().session().unwrap();
    assert!(session.is_biting());
    let rules = surface_rules();
    assert!((session.position().y - (rules.water_height - rules.bite_sink_depth)).abs() < 1e-6);

    let deliveries = host.drain_deliveries();
    let prompts: Vec<_> = observer_rpcs(&deliveries, A)
        .into_iter()
        .filter(|rpc| *rpc == ObserverRpc::ShowReelInPrompt)
        .collect();
    assert_eq!(prompts.len(), 1);
    // The authority ran the observer call on its own view too.
    assert_eq!(view.prompts(), vec![REEL_IN_PROMPT.to_string()]);
}

#[test]
fn test_catch_and_tap_to_success() {
    let (mut host, board) = host_with(surface_rules(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 5.2);
    assert_eq!(phase(&host, A), Phase::Biting);

    call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
    assert_eq!(phase(&host, A), Phase::Catching);
    let session = host.controller(A).unwrap().session().unwrap();
    let required = session.required_taps().unwrap();
    assert!((10..50).contains(&required));
    assert!(session.is_caught());
    assert!(!session.is_biting());

    for _ in 0..50 {
        call(&mut host, A, AuthorityRpc::Tap).unwrap();
    }

    let controller = host.controller(A).unwrap();
    assert!(controller.session().is_none());
    assert_eq!(controller.last_resolution(), Some(Resolution::Success));
    assert!(!controller.is_fishing());
    assert!((50..200).contains(&controller.score()));
    assert_eq!(board.score_of(A), Some(u64::from(controller.score())));
    assert_eq!(controller.fish_landed(), 1);
    assert_eq!(host.pending_timers(), 0);
}

#[test]
fn test_unanswered_bite_restarts_cycle() {
    let (mut host, _) = host_with(surface_rules(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 5.1);
    assert_eq!(phase(&host, A), Phase::Biting);
    host.drain_deliveries();

    run_until(&mut host, 10.1);
    let controller = host.controller(A).unwrap();
    let session = controller.session().unwrap();
    assert_eq!(session.phase(), Phase::Resting);
    assert!(!session.is_biting());
    assert!(!session.is_caught());
    assert_eq!(session.bite_cycles(), 2);
    assert!((session.position().y - surface_rules().water_height).abs() < 1e-6);
    assert!(controller.is_fishing());

    let deliveries = host.drain_deliveries();
    assert_eq!(observer_rpcs(&deliveries, A), vec![ObserverRpc::ClearPrompt]);

    // The fresh cycle bites again.
    run_until(&mut host, 15.2);
    assert_eq!(phase(&host, A), Phase::Biting);
}

#[test]
fn test_abandon_policy_releases_flag() {
    let rules = FishingConfig {
        reel_timeout: ReelTimeoutPolicy::Abandon,
        ..surface_rules()
    };
    let (mut host, _) = host_with(rules, &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 10.1);

    let controller = host.controller(A).unwrap();
    assert!(controller.session().is_none());
    assert!(!controller.is_fishing());
    assert_eq!(controller.last_resolution(), Some(Resolution::Timeout));
    assert_eq!(host.pending_timers(), 0);

    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    assert!(host.controller(A).unwrap().is_fishing());
}

// ---------------------------------------------------------------------------
// Races and rejections
// ---------------------------------------------------------------------------

#[test]
fn test_duplicate_cast_keeps_one_session() {
    let (mut host, _) = host_with(FishingConfig::default(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    let serial = host.controller(A).unwrap().session().unwrap().serial();

    let err = call(&mut host, A, AuthorityRpc::RequestCast).unwrap_err();
    assert!(matches!(err, FishingError::DuplicateCastRequest { player } if player == A));
    assert_eq!(host.controller(A).unwrap().session().unwrap().serial(), serial);

    let deliveries = host.drain_deliveries();
    let spawned = kinds(&deliveries, A)
        .into_iter()
        .filter(|kind| *kind == "bobber_spawned")
        .count();
    assert_eq!(spawned, 1);
}

#[test]
fn test_catch_attempt_outside_bite_is_silent() {
    let (mut host, _) = host_with(surface_rules(), &[A]);

    // No session at all.
    call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
    call(&mut host, A, AuthorityRpc::Tap).unwrap();
    assert!(host.drain_deliveries().is_empty());

    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    host.drain_deliveries();
    call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
    call(&mut host, A, AuthorityRpc::Tap).unwrap();

    let session = host.controller(A).unwrap().session().unwrap();
    assert_eq!(session.phase(), Phase::Resting);
    assert_eq!(session.tap_count(), 0);
    assert!(!session.is_caught());
    assert!(host.drain_deliveries().is_empty());
}

#[test]
fn test_finished_catch_ignores_later_reel_timer() {
    let (mut host, _) = host_with(surface_rules(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 5.2);
    call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
    let required = host
        .controller(A)
        .unwrap()
        .session()
        .unwrap()
        .required_taps()
        .unwrap();
    for _ in 0..required {
        call(&mut host, A, AuthorityRpc::Tap).unwrap();
    }
    assert!(!host.controller(A).unwrap().is_fishing());
    host.drain_deliveries();

    run_until(&mut host, 11.0);
    assert!(host.drain_deliveries().is_empty());
    assert_eq!(phase(&host, A), Phase::Idle);
}

#[test]
fn test_hooked_fish_survives_reel_timer() {
    let (mut host, _) = host_with(surface_rules(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 5.2);
    call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
    host.drain_deliveries();

    run_until(&mut host, 10.5);
    let session = host.controller(A).unwrap().session().unwrap();
    assert_eq!(session.phase(), Phase::Catching);
    assert!(session.is_caught());
    assert_eq!(session.tap_count(), 0);
    assert!(host.drain_deliveries().is_empty());
    assert_eq!(host.pending_timers(), 0);
}

#[test]
fn test_forged_owner_rejected() {
    let (mut host, _) = host_with(FishingConfig::default(), &[A, B]);
    let forged = AuthorityCall {
        player: A,
        rpc: AuthorityRpc::RequestCast,
    };
    let err = host.handle_call(B, forged).unwrap_err();
    assert!(err.is_authority_violation());
    assert!(!host.controller(A).unwrap().is_fishing());
    assert!(!host.controller(B).unwrap().is_fishing());
    assert!(host.drain_deliveries().is_empty());
}

#[test]
fn test_unknown_and_duplicate_players() {
    let (mut host, _) = host_with(FishingConfig::default(), &[A]);
    let err = call(&mut host, PlayerId(9), AuthorityRpc::RequestCast).unwrap_err();
    assert!(matches!(err, FishingError::UnknownPlayer(PlayerId(9))));
    assert!(matches!(
        host.connect(A),
        Err(FishingError::AlreadyConnected(_))
    ));
    assert!(matches!(
        host.disconnect(PlayerId(9)),
        Err(FishingError::UnknownPlayer(_))
    ));
}

#[test]
fn test_cast_without_cast_point() {
    let (mut host, _) = host_with(FishingConfig::default(), &[A]);
    host.controller_mut(A).unwrap().detach_cast_point();

    let err = call(&mut host, A, AuthorityRpc::RequestCast).unwrap_err();
    assert!(matches!(err, FishingError::MissingLinkage { .. }));
    assert!(!host.controller(A).unwrap().is_fishing());
    assert!(host.drain_deliveries().is_empty());
}

#[test]
fn test_lost_cast_point_tears_session_down() {
    let (mut host, _) = host_with(surface_rules(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    assert_eq!(host.pending_timers(), 1);
    host.drain_deliveries();

    host.controller_mut(A).unwrap().detach_cast_point();
    host.advance(Duration::from_millis(10));

    let controller = host.controller(A).unwrap();
    assert!(controller.session().is_none());
    assert!(!controller.is_fishing());
    assert_eq!(host.pending_timers(), 0);
    let deliveries = host.drain_deliveries();
    assert_eq!(
        kinds(&deliveries, A),
        vec!["bobber_despawned", "observers", "update"]
    );
}

// ---------------------------------------------------------------------------
// Physics and movement
// ---------------------------------------------------------------------------

#[test]
fn test_cast_falls_to_the_water() {
    let rules = FishingConfig::default();
    let (mut host, _) = host_with(rules.clone(), &[A]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();

    let controller = host.controller(A).unwrap();
    let session = controller.session().unwrap();
    assert_eq!(session.phase(), Phase::Falling);
    assert_eq!(Some(session.position()), controller.cast_point());
    assert_eq!(session.velocity(), Vec3::new(0.0, rules.cast_lift, rules.cast_force));

    run_until(&mut host, 2.0);
    let session = host.controller(A).unwrap().session().unwrap();
    assert_eq!(session.phase(), Phase::Resting);
    assert_eq!(session.velocity(), Vec3::ZERO);
    assert!((session.position().y - rules.water_height).abs() < 1e-6);
    assert!(session.position().z > 5.0);
    let delay = session.bite_delay().unwrap();
    assert!((3.0..10.0).contains(&delay));
}

#[test]
fn test_movement_validation() {
    let (mut host, _) = host_with(FishingConfig::default(), &[A]);
    let start = host.controller(A).unwrap().position();

    let step = start + Vec3::new(0.5, 0.0, 0.0);
    call(
        &mut host,
        A,
        AuthorityRpc::SubmitMovement {
            position: step,
            facing: Vec3::X,
        },
    )
    .unwrap();
    assert_eq!(host.controller(A).unwrap().position(), step);
    assert_eq!(host.controller(A).unwrap().facing(), Vec3::X);
    host.drain_deliveries();

    let err = call(
        &mut host,
        A,
        AuthorityRpc::SubmitMovement {
            position: step + Vec3::new(5.0, 0.0, 0.0),
            facing: Vec3::X,
        },
    )
    .unwrap_err();
    assert!(matches!(err, FishingError::MoveRejected { .. }));
    assert_eq!(host.controller(A).unwrap().position(), step);
    // The canonical position is re-sent so the owner can reconcile.
    assert_eq!(kinds(&host.drain_deliveries(), A), vec!["update"]);

    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    let err = call(
        &mut host,
        A,
        AuthorityRpc::SubmitMovement {
            position: step + Vec3::new(0.1, 0.0, 0.0),
            facing: Vec3::X,
        },
    )
    .unwrap_err();
    assert!(matches!(err, FishingError::MoveRejected { reason, .. } if reason.contains("fishing")));
}

#[test]
fn test_cast_follows_facing() {
    let (mut host, _) = host_with(FishingConfig::default(), &[A]);
    let start = host.controller(A).unwrap().position();
    call(
        &mut host,
        A,
        AuthorityRpc::SubmitMovement {
            position: start,
            facing: Vec3::new(-2.0, 0.0, 0.0),
        },
    )
    .unwrap();
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    let velocity = host.controller(A).unwrap().session().unwrap().velocity();
    assert_eq!(velocity, Vec3::new(-10.0, 2.0, 0.0));
}

// ---------------------------------------------------------------------------
// Connection lifecycle and ordering
// ---------------------------------------------------------------------------

#[test]
fn test_late_joiner_gets_snapshot_first() {
    let board = Arc::new(Scoreboard::new());
    let mut host = FishingHost::new(FishingConfig::default(), board.clone()).unwrap();
    host.connect(A).unwrap();
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    host.advance(Duration::from_millis(10));
    host.connect(B).unwrap();

    let deliveries = host.drain_deliveries();
    let to_b: Vec<_> = deliveries.iter().filter(|(to, _)| *to == B).collect();
    assert_eq!(to_b[0].1.seq, 0);
    let Envelope::Welcome(welcome) = &to_b[0].1.envelope else {
        panic!("first delivery must be the welcome");
    };
    assert_eq!(welcome.you, B);
    assert_eq!(welcome.players.len(), 2);
    let a = &welcome.players[0];
    assert!(a.is_fishing);
    assert!(a.bobber.is_some());
    assert!(kinds(&deliveries, A).contains(&"player_joined"));
    assert_eq!(board.standings(), vec![(A, 0), (B, 0)]);
}

#[test]
fn test_sequence_numbers_are_contiguous_per_replica() {
    let (mut host, _) = host_with(FishingConfig::default(), &[]);
    host.connect(A).unwrap();
    host.connect(B).unwrap();
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 1.0);
    call(&mut host, B, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 2.0);

    let deliveries = host.drain_deliveries();
    for player in [A, B] {
        let seqs: Vec<u64> = deliveries
            .iter()
            .filter(|(to, _)| *to == player)
            .map(|(_, d)| d.seq)
            .collect();
        let expected: Vec<u64> = (0..seqs.len() as u64).collect();
        assert_eq!(seqs, expected);
    }
}

#[test]
fn test_disconnect_cleans_up_session() {
    let (mut host, _) = host_with(surface_rules(), &[A, B]);
    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    host.drain_deliveries();

    host.disconnect(A).unwrap();
    assert_eq!(host.pending_timers(), 0);
    assert_eq!(host.players().collect::<Vec<_>>(), vec![B]);

    let deliveries = host.drain_deliveries();
    assert!(kinds(&deliveries, A).is_empty());
    assert_eq!(
        kinds(&deliveries, B),
        vec!["bobber_despawned", "player_left"]
    );
}

#[test]
fn test_random_draws_stay_in_range() {
    let rules = FishingConfig {
        cast_point_offset: [0.0, -0.5, 0.5],
        seed: Some(7),
        ..FishingConfig::default()
    };
    let (mut host, _) = host_with(rules, &[A]);
    let mut last_score = 0;

    for _ in 0..25 {
        call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
        let delay = host.controller(A).unwrap().session().unwrap().bite_delay().unwrap();
        assert!((3.0..10.0).contains(&delay), "bite delay {delay}");

        let deadline = host.now().as_secs_f64() + 10.5;
        while phase(&host, A) != Phase::Biting {
            assert!(host.now().as_secs_f64() < deadline);
            host.advance(Duration::from_millis(100));
        }
        call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
        let required = host.controller(A).unwrap().session().unwrap().required_taps().unwrap();
        assert!((10..50).contains(&required), "required taps {required}");
        for _ in 0..required {
            call(&mut host, A, AuthorityRpc::Tap).unwrap();
        }

        let score = host.controller(A).unwrap().score();
        let delta = score - last_score;
        assert!((50..200).contains(&delta), "score delta {delta}");
        last_score = score;
    }
}

#[test]
fn test_tick_schedule_accumulates() {
    let mut schedule = ServerTickSchedule::with_tick_rate(50);
    assert_eq!(schedule.tick_duration(), Duration::from_millis(20));
    assert_eq!(schedule.accumulate(Duration::from_millis(15)), 0);
    assert_eq!(schedule.accumulate(Duration::from_millis(30)), 2);
    assert_eq!(schedule.accumulate(Duration::from_millis(15)), 1);
    assert_eq!(schedule.total_ticks(), 3);
}

#[test]
fn test_invalid_rules_rejected() {
    let rules = FishingConfig {
        required_taps: (50, 10),
        ..FishingConfig::default()
    };
    let result = FishingHost::new(rules, Arc::new(Scoreboard::new()));
    assert!(matches!(result, Err(FishingError::Config(_))));
}

#[test]
fn test_unbounded_timer_rules_rejected() {
    for rules in [
        FishingConfig {
            reel_window_secs: f32::INFINITY,
            ..surface_rules()
        },
        FishingConfig {
            bite_delay_secs: (3.0, f32::INFINITY),
            ..surface_rules()
        },
        FishingConfig {
            max_move_step: f32::NAN,
            ..surface_rules()
        },
    ] {
        let result = FishingHost::new(rules, Arc::new(Scoreboard::new()));
        assert!(matches!(result, Err(FishingError::Config(_))));
    }
}

#[test]
fn test_tick_rate_is_clamped() {
    let mut schedule = ServerTickSchedule::with_tick_rate(u32::MAX);
    assert_eq!(schedule.tick_duration(), MIN_TICK);
    assert_eq!(schedule.accumulate(Duration::from_millis(5)), 5);
}

#[test]
fn test_host_view_counts_down_taps() {
    let (mut host, _) = host_with(surface_rules(), &[A, B]);
    let view = Arc::new(RecordingPresentation::new());
    host.attach_view(Some(A), view.clone());

    call(&mut host, A, AuthorityRpc::RequestCast).unwrap();
    run_until(&mut host, 5.2);
    call(&mut host, A, AuthorityRpc::RequestCatchAttempt).unwrap();
    let required = host
        .controller(A)
        .unwrap()
        .session()
        .unwrap()
        .required_taps()
        .unwrap();
    for _ in 0..3 {
        call(&mut host, A, AuthorityRpc::Tap).unwrap();
    }
    host.drain_deliveries();

    let expected = vec![
        REEL_IN_PROMPT.to_string(),
        taps_prompt(required),
        taps_prompt(required - 1),
        taps_prompt(required - 2),
        taps_prompt(required - 3),
    ];
    assert_eq!(view.prompts(), expected);

    // A's minigame is not drawn on a view sitting at B.
    let other = Arc::new(RecordingPresentation::new());
    host.attach_view(Some(B), other.clone());
    for _ in 0..required {
        call(&mut host, A, AuthorityRpc::Tap).unwrap();
    }
    host.drain_deliveries();
    assert!(other.prompts().is_empty());
}

// ---------------------------------------------------------------------------
// Host and replicas together
// ---------------------------------------------------------------------------

#[test]
fn test_full_round_through_replicas() {
    let (mut host, board) = host_with(surface_rules(), &[]);
    host.connect(A).unwrap();
    host.connect(B).unwrap();
    let host_view = Arc::new(RecordingPresentation::new());
    host.attach_view(None, host_view.clone());

    let sink_a = Arc::new(RecordingPresentation::new());
    let sink_b = Arc::new(RecordingPresentation::new());
    let mirror_board = Arc::new(Scoreboard::new());
    let mut ra = FishingReplica::new(sink_a.clone()).with_score_sink(mirror_board.clone());
    let mut rb = FishingReplica::new(sink_b.clone());
    pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    assert_eq!(ra.local(), Some(A));
    assert_eq!(rb.local(), Some(B));

    let cast = ra.on_input(InputEvent::CastRequested).unwrap().unwrap();
    host.handle_call(A, cast).unwrap();
    pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    assert_eq!(rb.is_fishing(A), Some(true));
    assert!(rb.bobber_position(A).is_some());

    while host.now().as_secs_f64() < 5.1 {
        host.advance(Duration::from_millis(10));
        pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    }
    assert_eq!(sink_a.prompts(), vec![REEL_IN_PROMPT.to_string()]);
    assert!(sink_b.prompts().is_empty());
    let sunk = rb.bobber_position(A).unwrap().y;
    assert!((sunk - 0.2).abs() < 1e-5, "bobber at {sunk}");

    let catch = ra.on_input(InputEvent::CatchAttemptRequested).unwrap().unwrap();
    host.handle_call(A, catch).unwrap();
    pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    assert!(ra.in_minigame());
    let required = ra.taps_remaining().unwrap();
    assert!((10..50).contains(&required));

    let mut taps = 0;
    while ra.in_minigame() {
        let tap = ra.on_input(InputEvent::TapRegistered).unwrap().unwrap();
        host.handle_call(A, tap).unwrap();
        pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
        taps += 1;
        assert!(taps <= 50);
    }
    assert_eq!(taps, required);

    let score = host.controller(A).unwrap().score();
    for replica in [&ra, &rb] {
        assert_eq!(replica.score_of(A), Some(score));
        assert_eq!(replica.is_fishing(A), Some(false));
        assert_eq!(replica.bobber_position(A), None);
    }
    assert_eq!(board.score_of(A), Some(u64::from(score)));
    assert_eq!(mirror_board.standings()[0], (A, u64::from(score)));

    let mut expected = vec![REEL_IN_PROMPT.to_string()];
    expected.extend((1..=required).rev().map(taps_prompt));
    assert_eq!(sink_a.prompts(), expected);

    let caught = PresentationEvent::CaughtEffect {
        owner: A,
        duration_secs: 5.0,
    };
    assert_eq!(sink_a.events().last(), Some(&caught));
    assert_eq!(sink_b.events().last(), Some(&caught));
    assert!(sink_b.events().contains(&PresentationEvent::ClearLine(A)));
    assert_eq!(host_view.events(), vec![caught]);
}

#[test]
fn test_owner_prediction_round_trip() {
    let (mut host, _) = host_with(FishingConfig::default(), &[]);
    host.connect(A).unwrap();
    host.connect(B).unwrap();
    let mut ra = FishingReplica::new(Arc::new(RecordingPresentation::new()));
    let mut rb = FishingReplica::new(Arc::new(RecordingPresentation::new()));
    pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    let start = ra.position_of(A).unwrap();

    let step = ra.move_local(Vec3::new(0.5, 0.0, 0.0), Vec3::X).unwrap().unwrap();
    assert_eq!(ra.position_of(A), Some(start + Vec3::new(0.5, 0.0, 0.0)));
    host.handle_call(A, step).unwrap();
    pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    assert_eq!(ra.corrections(), 0);
    assert_eq!(rb.position_of(A), ra.position_of(A));

    let teleport = ra.move_local(Vec3::new(8.0, 0.0, 0.0), Vec3::X).unwrap().unwrap();
    assert!(host.handle_call(A, teleport).is_err());
    pump(&mut host, &mut [(A, &mut ra), (B, &mut rb)]);
    assert_eq!(ra.corrections(), 1);
    assert_eq!(ra.position_of(A), Some(start + Vec3::new(0.5, 0.0, 0.0)));
}

#[test]
fn test_replica_write_is_rejected() {
    use crate::identity::Role;
    use crate::replicated::{ReplicatedVariable, ReplicationError};
    use crate::rpc::Outbox;

    let mut mirror = ReplicatedVariable::new(A, VarKey::IsFishing, Role::Replica, false);
    let mut outbox = Outbox::default();
    let err = mirror.write(true, &mut outbox).unwrap_err();
    assert!(FishingError::from(err).is_authority_violation());
    assert!(matches!(
        mirror.write(true, &mut outbox),
        Err(ReplicationError::WriteFromNonAuthority { .. })
    ));
    assert!(!*mirror.read());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Cast,
    Catch,
    Tap,
    Wait(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Cast),
        1 => Just(Op::Catch),
        3 => Just(Op::Tap),
        2 => (0u64..4000).prop_map(Op::Wait),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// At most one bobber is ever live per player, and the replicated
    /// spawn/despawn stream agrees with the authority.
    #[test]
    fn prop_at_most_one_live_session(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let rules = FishingConfig { seed: Some(seed), ..surface_rules() };
        let (mut host, _) = host_with(rules, &[A]);
        let mut live: i64 = 0;

        for op in ops {
            match op {
                Op::Cast => { let _ = call(&mut host, A, AuthorityRpc::RequestCast); }
                Op::Catch => { let _ = call(&mut host, A, AuthorityRpc::RequestCatchAttempt); }
                Op::Tap => { let _ = call(&mut host, A, AuthorityRpc::Tap); }
                Op::Wait(ms) => {
                    for _ in 0..ms / 50 {
                        host.advance(Duration::from_millis(50));
                    }
                }
            }
            for (_, delivery) in host.drain_deliveries() {
                match delivery.envelope {
                    Envelope::BobberSpawned(_) => live += 1,
                    Envelope::BobberDespawned { .. } => live -= 1,
                    _ => {}
                }
            }
            prop_assert!(live == 0 || live == 1);
            let controller = host.controller(A).unwrap();
            prop_assert_eq!(live == 1, controller.session().is_some());
            prop_assert_eq!(controller.is_fishing(), controller.session().is_some());
        }
    }

    /// A catch attempt outside the bite window changes nothing.
    #[test]
    fn prop_catch_outside_bite_has_no_effect(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let rules = FishingConfig { seed: Some(seed), ..surface_rules() };
        let (mut host, _) = host_with(rules, &[A]);

        for op in ops {
            match op {
                Op::Cast => { let _ = call(&mut host, A, AuthorityRpc::RequestCast); }
                Op::Tap => { let _ = call(&mut host, A, AuthorityRpc::Tap); }
                Op::Wait(ms) => {
                    for _ in 0..ms / 50 {
                        host.advance(Duration::from_millis(50));
                    }
                }
                Op::Catch => {
                    let before = host.controller(A).unwrap().session().map(|s| {
                        (s.phase(), s.tap_count(), s.is_caught())
                    });
                    if matches!(before, Some((Phase::Biting, _, _))) {
                        continue;
                    }
                    host.drain_deliveries();
                    prop_assert!(call(&mut host, A, AuthorityRpc::RequestCatchAttempt).is_ok());
                    let after = host.controller(A).unwrap().session().map(|s| {
                        (s.phase(), s.tap_count(), s.is_caught())
                    });
                    prop_assert_eq!(before, after);
                    prop_assert!(host.drain_deliveries().is_empty());
                }
            }
            host.drain_deliveries();
        }
    }
}
