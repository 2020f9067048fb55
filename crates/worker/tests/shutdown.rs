//! `ShutdownCoordinator` state transitions and bounded draining.

use std::time::Duration;

use vitals_worker::{ShutdownCoordinator, ShutdownState};

// ---------------------------------------------------------------------------
// Test: a new coordinator is running and its token is live
// ---------------------------------------------------------------------------

#[tokio::test]
async fn starts_running() {
    let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));

    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(!coordinator.token().is_cancelled());
}

// ---------------------------------------------------------------------------
// Test: cooperative tasks finish within the grace period
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cooperative_tasks_finish_and_report_results() {
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(2));
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let token = coordinator.token();
            tokio::spawn(async move {
                token.cancelled().await;
                i
            })
        })
        .collect();

    let started = tokio::time::Instant::now();
    let report = coordinator.shutdown(handles).await;

    assert_eq!(report.finished, vec![0, 1, 2]);
    assert_eq!(report.aborted, 0);
    assert_eq!(report.failed, 0);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
    assert!(coordinator.token().is_cancelled());
}

// ---------------------------------------------------------------------------
// Test: work exceeding the grace period is abandoned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stuck_tasks_are_aborted_after_grace() {
    let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
    let stuck = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    let quick = {
        let token = coordinator.token();
        tokio::spawn(async move { token.cancelled().await })
    };

    let started = tokio::time::Instant::now();
    let report = coordinator.shutdown(vec![stuck, quick]).await;

    assert_eq!(report.aborted, 1);
    assert_eq!(report.finished.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
}

// ---------------------------------------------------------------------------
// Test: a panicking task is counted, not propagated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicked_task_is_reported_as_failed() {
    let coordinator = ShutdownCoordinator::default();
    let handle = tokio::spawn(async {
        panic!("boom");
    });

    let report: vitals_worker::DrainReport<()> = coordinator.shutdown(vec![handle]).await;

    assert_eq!(report.failed, 1);
    assert!(report.finished.is_empty());
}
