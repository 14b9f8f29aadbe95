//! Integration tests for the job orchestrator
//!
//! Run with: cargo test --test orchestrator_test
//!
//! Uses scripted packagers so every scenario is deterministic: a gated
//! packager only advances when the test says so, an auto packager runs
//! its script to completion on its own.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use moddepot::core::AppError;
use moddepot::job::{BundleSpec, Job, JobEvent, JobOutcome, JobState};
use moddepot::packager::{BundleOutput, PackProgress, Packager, PackagingError};
use moddepot::Orchestrator;

const WAIT: Duration = Duration::from_secs(5);

/// Packager that emits a fixed script of ticks, one per advance signal,
/// plus one final advance before returning its outcome.
struct GatedPackager {
    steps: Vec<(u8, String)>,
    fail_with: Option<String>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl GatedPackager {
    fn new(steps: &[(u8, &str)], fail_with: Option<&str>) -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(64);
        let packager = Arc::new(Self {
            steps: steps.iter().map(|(p, m)| (*p, m.to_string())).collect(),
            fail_with: fail_with.map(str::to_string),
            gate: Mutex::new(rx),
        });
        (packager, tx)
    }

    async fn advance(gate: &mut mpsc::Receiver<()>, cancel: &CancellationToken) -> Result<(), PackagingError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PackagingError::Cancelled),
            signal = gate.recv() => match signal {
                Some(()) => Ok(()),
                None => Err(PackagingError::Other("gate closed".to_string())),
            },
        }
    }
}

#[async_trait]
impl Packager for GatedPackager {
    fn name(&self) -> &str {
        "gated"
    }

    async fn run(
        &self,
        _spec: &BundleSpec,
        progress: mpsc::UnboundedSender<PackProgress>,
        cancel: CancellationToken,
    ) -> Result<BundleOutput, PackagingError> {
        let mut gate = self.gate.lock().await;
        for (percent, message) in &self.steps {
            Self::advance(&mut gate, &cancel).await?;
            let _ = progress.send(PackProgress {
                percent: *percent,
                message: message.clone(),
            });
        }
        Self::advance(&mut gate, &cancel).await?;
        match &self.fail_with {
            Some(reason) => Err(PackagingError::Fetch(reason.clone())),
            None => Ok(BundleOutput {
                archive_path: PathBuf::from("/tmp/test-bundle.zip"),
                size_bytes: 1234,
                mod_count: 2,
            }),
        }
    }
}

/// Packager that runs its whole script unattended: one tick per mod in
/// the spec, then success.
struct AutoPackager;

#[async_trait]
impl Packager for AutoPackager {
    fn name(&self) -> &str {
        "auto"
    }

    async fn run(
        &self,
        spec: &BundleSpec,
        progress: mpsc::UnboundedSender<PackProgress>,
        cancel: CancellationToken,
    ) -> Result<BundleOutput, PackagingError> {
        let total = spec.mods.len();
        for (i, key) in spec.mods.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PackagingError::Cancelled);
            }
            let percent = (((i + 1) * 90) / total) as u8;
            let _ = progress.send(PackProgress {
                percent,
                message: format!("fetching {}", key),
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = progress.send(PackProgress {
            percent: 100,
            message: "packaged".to_string(),
        });
        Ok(BundleOutput {
            archive_path: PathBuf::from("/tmp/auto-bundle.zip"),
            size_bytes: 64,
            mod_count: total,
        })
    }
}

async fn recv_event(rx: &mut mpsc::Receiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed unexpectedly")
}

async fn recv_closed(rx: &mut mpsc::Receiver<JobEvent>) {
    let next = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for stream close");
    assert!(next.is_none(), "expected end of stream, got {:?}", next);
}

/// Polls the store until the predicate holds.
async fn wait_for_job<F>(orchestrator: &Orchestrator, id: &str, pred: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let job = orchestrator.get(id).await.expect("job lookup failed");
        if pred(&job) {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition never held for job {}", id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_happy_path_event_sequence() {
    let (packager, gate) = GatedPackager::new(&[(10, "fetching A"), (60, "fetching B"), (100, "packaged")], None);
    let orchestrator = Orchestrator::new(packager);

    let id = orchestrator.start(BundleSpec::new(["A", "B"])).await.unwrap();
    let mut rx = orchestrator.subscribe(&id, "sess-1".to_string()).await.unwrap();

    // First published state is Running, via the subscribe-time snapshot
    match recv_event(&mut rx).await {
        JobEvent::Snapshot { job } => {
            assert_eq!(job.state, JobState::Running);
            assert_eq!(job.percent, 0);
        }
        other => panic!("expected snapshot, got {:?}", other),
    }

    let mut seen = Vec::new();
    for expected in [(10, "fetching A"), (60, "fetching B"), (100, "packaged")] {
        gate.send(()).await.unwrap();
        match recv_event(&mut rx).await {
            JobEvent::Progress { percent, message } => {
                assert_eq!((percent as i32, message.as_str()), (expected.0, expected.1));
                seen.push(percent);
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "percent regressed: {:?}", seen);

    // Final advance lets the packager return success
    gate.send(()).await.unwrap();
    match recv_event(&mut rx).await {
        JobEvent::Completed { bundle } => {
            assert_eq!(bundle.mod_count, 2);
            assert_eq!(bundle.size_bytes, 1234);
        }
        other => panic!("expected completed, got {:?}", other),
    }

    // Terminal event is the last event
    recv_closed(&mut rx).await;

    let job = orchestrator.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.percent, 100);
    assert!(matches!(job.result, Some(JobOutcome::Bundle(_))));
}

#[tokio::test]
async fn test_late_subscriber_gets_latest_snapshot() {
    let (packager, gate) = GatedPackager::new(&[(10, "fetching A"), (60, "fetching B"), (100, "packaged")], None);
    let orchestrator = Orchestrator::new(packager);

    let id = orchestrator.start(BundleSpec::new(["A", "B"])).await.unwrap();

    // Let two ticks through before anyone subscribes
    gate.send(()).await.unwrap();
    gate.send(()).await.unwrap();
    wait_for_job(&orchestrator, &id, |job| job.percent == 60).await;

    let mut rx = orchestrator.subscribe(&id, "sess-late".to_string()).await.unwrap();
    match recv_event(&mut rx).await {
        JobEvent::Snapshot { job } => {
            // Latest known progress, not zero
            assert_eq!(job.percent, 60);
            assert_eq!(job.message, "fetching B");
        }
        other => panic!("expected snapshot, got {:?}", other),
    }

    gate.send(()).await.unwrap();
    // The registration can race the in-flight publish of tick 60; the
    // subscriber may see it once more after the snapshot.
    let event = match recv_event(&mut rx).await {
        JobEvent::Progress { percent: 60, .. } => recv_event(&mut rx).await,
        other => other,
    };
    assert!(matches!(event, JobEvent::Progress { percent: 100, .. }));
    gate.send(()).await.unwrap();
    assert!(matches!(recv_event(&mut rx).await, JobEvent::Completed { .. }));
}

#[tokio::test]
async fn test_cancel_midway_stops_progress() {
    let (packager, gate) = GatedPackager::new(&[(40, "fetching A"), (80, "fetching B")], None);
    let orchestrator = Orchestrator::new(packager);

    let id = orchestrator.start(BundleSpec::new(["A", "B"])).await.unwrap();
    let mut rx = orchestrator.subscribe(&id, "sess-1".to_string()).await.unwrap();
    assert!(matches!(recv_event(&mut rx).await, JobEvent::Snapshot { .. }));

    gate.send(()).await.unwrap();
    assert!(matches!(recv_event(&mut rx).await, JobEvent::Progress { percent: 40, .. }));

    let snapshot = orchestrator.cancel(&id).await.unwrap();
    assert_eq!(snapshot.state, JobState::Cancelled);

    // Terminal event arrives and nothing follows it, even though the
    // packager had another tick scripted
    assert!(matches!(recv_event(&mut rx).await, JobEvent::Cancelled));
    recv_closed(&mut rx).await;

    let job = orchestrator.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.percent, 40);

    // Cancelling again is an invalid transition
    let err = orchestrator.cancel(&id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_cancel_completed_job_leaves_result_unchanged() {
    let (packager, gate) = GatedPackager::new(&[(100, "packaged")], None);
    let orchestrator = Orchestrator::new(packager);

    let id = orchestrator.start(BundleSpec::new(["A", "B"])).await.unwrap();
    gate.send(()).await.unwrap();
    gate.send(()).await.unwrap();
    let done = wait_for_job(&orchestrator, &id, |job| job.state == JobState::Completed).await;

    let err = orchestrator.cancel(&id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            from: JobState::Completed,
            to: JobState::Cancelled
        }
    ));

    let after = orchestrator.get(&id).await.unwrap();
    assert_eq!(after.state, JobState::Completed);
    assert_eq!(after.result, done.result);
}

#[tokio::test]
async fn test_failed_packaging_publishes_failed_terminal() {
    let (packager, gate) = GatedPackager::new(&[(10, "fetching A")], Some("mirror unreachable"));
    let orchestrator = Orchestrator::new(packager);

    let id = orchestrator.start(BundleSpec::new(["A"])).await.unwrap();
    let mut rx = orchestrator.subscribe(&id, "sess-1".to_string()).await.unwrap();
    assert!(matches!(recv_event(&mut rx).await, JobEvent::Snapshot { .. }));

    gate.send(()).await.unwrap();
    assert!(matches!(recv_event(&mut rx).await, JobEvent::Progress { percent: 10, .. }));

    gate.send(()).await.unwrap();
    match recv_event(&mut rx).await {
        JobEvent::Failed { reason } => assert!(reason.contains("mirror unreachable")),
        other => panic!("expected failed, got {:?}", other),
    }
    recv_closed(&mut rx).await;

    let job = orchestrator.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(matches!(job.result, Some(JobOutcome::Error { .. })));
}

#[tokio::test]
async fn test_concurrent_jobs_do_not_interleave() {
    let orchestrator = Orchestrator::new(Arc::new(AutoPackager));

    let id_one = orchestrator.start(BundleSpec::new(["AlphaMod"])).await.unwrap();
    let id_two = orchestrator.start(BundleSpec::new(["BetaMod"])).await.unwrap();
    assert_ne!(id_one, id_two);

    let mut rx_one = orchestrator.subscribe(&id_one, "sess-1".to_string()).await.unwrap();
    let mut rx_two = orchestrator.subscribe(&id_two, "sess-2".to_string()).await.unwrap();

    for (rx, own, other) in [(&mut rx_one, "AlphaMod", "BetaMod"), (&mut rx_two, "BetaMod", "AlphaMod")] {
        let mut last_percent = 0u8;
        loop {
            match recv_event(rx).await {
                JobEvent::Snapshot { job } => {
                    // The job may already be done by the time we subscribe
                    if let Some(JobOutcome::Bundle(bundle)) = job.result {
                        assert_eq!(bundle.mod_count, 1);
                        break;
                    }
                    assert!(!job.message.contains(other), "{} subscriber saw {}: {}", own, other, job.message);
                }
                JobEvent::Progress { percent, message } => {
                    assert!(percent >= last_percent, "percent regressed for {}", own);
                    last_percent = percent;
                    assert!(!message.contains(other), "{} subscriber saw {}: {}", own, other, message);
                }
                JobEvent::Completed { bundle } => {
                    assert_eq!(bundle.mod_count, 1);
                    break;
                }
                other_event => panic!("unexpected event {:?}", other_event),
            }
        }
    }
}

#[tokio::test]
async fn test_subscribe_unknown_id_registers_nothing() {
    let orchestrator = Orchestrator::new(Arc::new(AutoPackager));
    let err = orchestrator
        .subscribe("no-such-job", "sess-1".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_empty_spec_rejected_synchronously() {
    let orchestrator = Orchestrator::new(Arc::new(AutoPackager));
    let err = orchestrator.start(BundleSpec::new(Vec::<String>::new())).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_cancel_unknown_id_not_found() {
    let orchestrator = Orchestrator::new(Arc::new(AutoPackager));
    let err = orchestrator.cancel("no-such-job").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_unsubscribed_session_stops_receiving() {
    let (packager, gate) = GatedPackager::new(&[(10, "fetching A"), (60, "fetching B"), (100, "packaged")], None);
    let orchestrator = Orchestrator::new(packager);

    let id = orchestrator.start(BundleSpec::new(["A", "B"])).await.unwrap();
    let mut rx_keep = orchestrator.subscribe(&id, "sess-keep".to_string()).await.unwrap();
    let mut rx_gone = orchestrator.subscribe(&id, "sess-gone".to_string()).await.unwrap();
    assert!(matches!(recv_event(&mut rx_keep).await, JobEvent::Snapshot { .. }));
    assert!(matches!(recv_event(&mut rx_gone).await, JobEvent::Snapshot { .. }));

    gate.send(()).await.unwrap();
    assert!(matches!(recv_event(&mut rx_keep).await, JobEvent::Progress { percent: 10, .. }));
    assert!(matches!(recv_event(&mut rx_gone).await, JobEvent::Progress { percent: 10, .. }));

    orchestrator.unsubscribe(&id, "sess-gone").await;

    gate.send(()).await.unwrap();
    assert!(matches!(recv_event(&mut rx_keep).await, JobEvent::Progress { percent: 60, .. }));
    // The removed session's queue closed without further events
    recv_closed(&mut rx_gone).await;

    gate.send(()).await.unwrap();
    gate.send(()).await.unwrap();
    assert!(matches!(recv_event(&mut rx_keep).await, JobEvent::Progress { percent: 100, .. }));
    assert!(matches!(recv_event(&mut rx_keep).await, JobEvent::Completed { .. }));
}

#[tokio::test]
async fn test_subscriber_after_completion_sees_terminal_snapshot() {
    let orchestrator = Orchestrator::new(Arc::new(AutoPackager));
    let id = orchestrator.start(BundleSpec::new(["AlphaMod"])).await.unwrap();
    wait_for_job(&orchestrator, &id, |job| job.state == JobState::Completed).await;

    let mut rx = orchestrator.subscribe(&id, "sess-late".to_string()).await.unwrap();
    match recv_event(&mut rx).await {
        JobEvent::Snapshot { job } => {
            assert_eq!(job.state, JobState::Completed);
            assert_eq!(job.percent, 100);
        }
        other => panic!("expected snapshot, got {:?}", other),
    }
    recv_closed(&mut rx).await;
}
