mod common;

use std::time::Duration;

use cmdseq_core::{BlockMode, RunMode, RunState, StatusEvent};
use cmdseq_engine::{
    DispatchGateway, DispatchOutcome, EngineConfig, EngineError, RouterReply, Sequencer,
    StatusStream,
};
use tempfile::TempDir;

use common::*;

fn config() -> EngineConfig {
    EngineConfig {
        tick_ms: 5,
        dispatch_timeout_ms: 1_000,
        channel_capacity: 32,
    }
}

async fn wait_for_state(stream: &mut StatusStream, state: RunState) -> StatusEvent {
    loop {
        let event = stream.recv().await.expect("status stream closed early");
        if event.state == state {
            return event;
        }
    }
}

// ---------------------------------------------------------------------------
// AUTO mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn auto_block_run_completes_records_in_order() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "two.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 1, 50, OP_NO_OP_STRING, vec![1]),
        ],
    );
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();

    assert_eq!(outcome, RunState::Complete);
    assert_eq!(request_order(&log), vec![0, 1]);

    // The second record is relative to the first's completion: at least
    // 1.050 s of (virtual) time must separate the two dispatches.
    let times: Vec<_> = log.lock().unwrap().iter().map(|(at, _)| *at).collect();
    assert!(times[1] - times[0] >= Duration::from_millis(1_050));
}

#[tokio::test(start_paused = true)]
async fn auto_no_block_returns_before_completion() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "slow.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 2, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    let outcome = sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    assert_eq!(outcome, RunState::RunningAuto);

    // The sequence keeps going on its own and finishes without the caller.
    let handle = sequencer
        .registry()
        .lookup(&path.display().to_string())
        .unwrap();
    assert_eq!(handle.wait_terminal().await, RunState::Complete);
}

#[tokio::test(start_paused = true)]
async fn five_records_dispatch_strictly_in_order() {
    let dir = TempDir::new().unwrap();
    let records: Vec<FixtureRecord> = (0u8..5)
        .map(|i| (RELATIVE, 0, 0, OP_NO_OP, vec![i]))
        .collect();
    let path = write_sequence(dir.path(), "five.bin", &records);
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Complete);
    assert_eq!(request_order(&log), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn absolute_tags_are_anchored_once_at_sequence_start() {
    let dir = TempDir::new().unwrap();
    // Both records one second from sequence start: the second dispatches
    // as soon as the first completes, with no extra second added.
    let path = write_sequence(
        dir.path(),
        "abs.bin",
        &[
            (ABSOLUTE, 1, 0, OP_NO_OP, vec![0]),
            (ABSOLUTE, 1, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    let started = tokio::time::Instant::now();
    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Complete);

    let times: Vec<_> = log.lock().unwrap().iter().map(|(at, _)| *at).collect();
    assert!(times[0] - started >= Duration::from_secs(1));
    // Anchored to sequence start, not chained: well under another second.
    assert!(times[1] - times[0] < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn step_during_auto_run_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "long.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 600, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();

    let err = sequencer.step().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ProtocolMisuse {
            command: "STEP",
            state: RunState::RunningAuto,
        }
    ));

    // The rejection left the sequence running; cancel cleans up.
    sequencer.cancel().await.unwrap();
    let handle = sequencer
        .registry()
        .lookup(&path.display().to_string())
        .unwrap();
    assert_eq!(handle.state(), RunState::Cancelled);
}

// ---------------------------------------------------------------------------
// MANUAL mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn manual_start_dispatches_only_record_zero_then_cancel_freezes_cursor() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "manual.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 0, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);
    let mut status = sequencer.subscribe();

    // In manual mode a run only loads.
    let outcome = sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    assert_eq!(outcome, RunState::Loaded);
    assert_eq!(request_count(&log), 0);

    sequencer.start().await.unwrap();
    let event = wait_for_state(&mut status, RunState::WaitingStep).await;
    assert_eq!(event.cursor, 0);
    assert_eq!(request_count(&log), 1);

    sequencer.cancel().await.unwrap();
    let event = wait_for_state(&mut status, RunState::Cancelled).await;
    assert_eq!(event.cursor, 0);
    assert_eq!(request_count(&log), 1);
}

#[tokio::test(start_paused = true)]
async fn stepping_walks_the_sequence_to_completion() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "walk.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 0, 0, OP_NO_OP, vec![1]),
            (RELATIVE, 0, 0, OP_NO_OP, vec![2]),
        ],
    );
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);
    let mut status = sequencer.subscribe();

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    sequencer.start().await.unwrap();
    wait_for_state(&mut status, RunState::WaitingStep).await;

    sequencer.step().await.unwrap();
    let event = wait_for_state(&mut status, RunState::WaitingStep).await;
    assert_eq!(event.cursor, 1);

    sequencer.step().await.unwrap();
    let event = wait_for_state(&mut status, RunState::Complete).await;
    assert_eq!(event.cursor, 2);
    assert_eq!(request_order(&log), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn step_honors_the_records_own_deadline() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "timed_step.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 2, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);
    let mut status = sequencer.subscribe();

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    sequencer.start().await.unwrap();
    wait_for_state(&mut status, RunState::WaitingStep).await;

    // STEP removes the autonomy, not the timing: record 1 is tagged two
    // seconds after record 0's completion.
    sequencer.step().await.unwrap();
    wait_for_state(&mut status, RunState::Complete).await;

    let times: Vec<_> = log.lock().unwrap().iter().map(|(at, _)| *at).collect();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(2));
}

#[tokio::test]
async fn start_in_auto_mode_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "seq.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    sequencer.validate(&path).await.unwrap();
    let err = sequencer.start().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::WrongMode {
            command: "START",
            mode: RunMode::Auto,
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn component_state_tracks_the_current_sequence() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "seq.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    assert_eq!(sequencer.state(), RunState::Idle);
    sequencer.validate(&path).await.unwrap();
    assert_eq!(sequencer.state(), RunState::Loaded);
    sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(sequencer.state(), RunState::Complete);
}

#[tokio::test]
async fn start_with_nothing_loaded_is_rejected() {
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);

    assert!(matches!(
        sequencer.start().await.unwrap_err(),
        EngineError::NoActiveSequence
    ));
}

#[tokio::test(start_paused = true)]
async fn start_after_cancel_requires_a_fresh_load() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "again.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 0, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);
    let mut status = sequencer.subscribe();

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    sequencer.start().await.unwrap();
    wait_for_state(&mut status, RunState::WaitingStep).await;
    sequencer.cancel().await.unwrap();
    wait_for_state(&mut status, RunState::Cancelled).await;

    // The cancelled sequence is gone; START has nothing to act on.
    assert!(matches!(
        sequencer.start().await.unwrap_err(),
        EngineError::NoActiveSequence
    ));

    // A fresh load makes START valid again.
    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    sequencer.start().await.unwrap();
    wait_for_state(&mut status, RunState::WaitingStep).await;
}

#[tokio::test]
async fn block_flag_is_irrelevant_in_manual_mode() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "seq.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);

    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Loaded);
    assert_eq!(request_count(&log), 0);
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispatch_failure_parks_the_sequence_in_error() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "faulty.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 0, 0, OP_NO_OP, vec![1]),
            (RELATIVE, 0, 0, OP_NO_OP, vec![2]),
        ],
    );
    // Succeeds on request 0, fails on request 1.
    let gateway = failing_router(1, Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    let mut status = sequencer.subscribe();

    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Error);

    let event = wait_for_state(&mut status, RunState::Error).await;
    assert_eq!(event.error.as_deref(), Some("dispatch_failed"));
    assert_eq!(event.cursor, 1);

    // No retry, no skip-ahead: the errored sequence only accepts a cancel.
    assert!(matches!(
        sequencer.step().await.unwrap_err(),
        EngineError::ProtocolMisuse {
            command: "STEP",
            state: RunState::Error,
        }
    ));
    sequencer.cancel().await.unwrap();

    // Recovery is an explicit fresh run (requests 2.. succeed).
    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Complete);
}

#[tokio::test(start_paused = true)]
async fn dispatch_timeout_parks_the_sequence_in_error() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "mute.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let gateway = silent_router(Duration::from_millis(200));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    let mut status = sequencer.subscribe();

    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Error);

    let event = wait_for_state(&mut status, RunState::Error).await;
    assert_eq!(event.error.as_deref(), Some("dispatch_timeout"));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_drops_a_late_dispatch_result() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "late.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, mut router) = DispatchGateway::channel(32, Duration::from_secs(30));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();

    // Hold the request, cancel while it is in flight.
    let request = router.requests.recv().await.unwrap();
    sequencer.cancel().await.unwrap();

    let handle = sequencer
        .registry()
        .lookup(&path.display().to_string())
        .unwrap();
    assert_eq!(handle.state(), RunState::Cancelled);

    // The reply lands after the cancel and must change nothing.
    router
        .replies
        .send(RouterReply {
            correlation: request.correlation,
            outcome: DispatchOutcome::Success,
        })
        .await
        .unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(handle.state(), RunState::Cancelled);
}

#[tokio::test]
async fn cancel_from_loaded_discards_the_sequence() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "idle.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());
    sequencer.set_mode(RunMode::Manual);

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    sequencer.cancel().await.unwrap();

    let handle = sequencer
        .registry()
        .lookup(&path.display().to_string())
        .unwrap();
    assert_eq!(handle.wait_terminal().await, RunState::Cancelled);
    assert_eq!(request_count(&log), 0);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn validate_loads_but_never_dispatches() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "check.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    let handle = sequencer.validate(&path).await.unwrap();
    assert_eq!(handle.state(), RunState::Loaded);

    // Give the scheduler plenty of ticks: nothing may dispatch.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(request_count(&log), 0);
    assert_eq!(handle.state(), RunState::Loaded);
}

#[tokio::test]
async fn corrupt_file_is_rejected_with_no_state_change() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "bad.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    let err = sequencer.validate(&path).await.unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
    assert!(sequencer.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_picks_up_a_previously_validated_sequence() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(dir.path(), "seq.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    sequencer.validate(&path).await.unwrap();
    assert_eq!(sequencer.registry().len(), 1);

    let outcome = sequencer.run(&path, BlockMode::Block).await.unwrap();
    assert_eq!(outcome, RunState::Complete);
    assert_eq!(sequencer.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn running_sequence_cannot_be_loaded_twice() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(
        dir.path(),
        "busy.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 600, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    sequencer.run(&path, BlockMode::NoBlock).await.unwrap();
    let err = sequencer.run(&path, BlockMode::NoBlock).await.unwrap_err();
    assert!(matches!(err, EngineError::SequenceActive { .. }));

    sequencer.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// Joint wait
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn joint_wait_returns_after_every_sequence_is_terminal() {
    let dir = TempDir::new().unwrap();
    let fast = write_sequence(dir.path(), "fast.bin", &[(RELATIVE, 0, 0, OP_NO_OP, vec![0])]);
    let slow = write_sequence(
        dir.path(),
        "slow.bin",
        &[
            (RELATIVE, 0, 0, OP_NO_OP, vec![0]),
            (RELATIVE, 3, 0, OP_NO_OP, vec![1]),
        ],
    );
    let (gateway, _log) = recording_router(Duration::from_secs(5));
    let sequencer = Sequencer::new(gateway, dictionary(), config());

    // Two sequences under distinct identities, progressing independently.
    sequencer.run(&slow, BlockMode::NoBlock).await.unwrap();
    sequencer.run(&fast, BlockMode::NoBlock).await.unwrap();

    let outcomes = sequencer.joint_wait().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, state)| *state == RunState::Complete));

    let names: Vec<_> = outcomes.iter().map(|(name, _)| name.clone()).collect();
    assert!(names.contains(&fast.display().to_string()));
    assert!(names.contains(&slow.display().to_string()));
}
