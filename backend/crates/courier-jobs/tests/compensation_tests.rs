mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{memory_locks, FakeQueue, RecordingHandler, Toggle};
use courier_configs::{CompensationSettings, JobSwitches, COMPENSATION_JOB_ID};
use courier_jobs::{
    CompensationJob, JobContext, JobOutcome, ScheduledJob, UnitHandler,
};
use courier_locks::{LockKey, LockManager, OwnerToken};

const MINUTE: Duration = Duration::from_secs(60);

fn settings() -> CompensationSettings {
    CompensationSettings {
        stale_after_secs: 20 * 60,
        batch_limit: 50,
        ..CompensationSettings::default()
    }
}

fn job(
    locks: &LockManager,
    switches: Arc<dyn JobSwitches>,
    queue: Arc<FakeQueue>,
    handler: Arc<RecordingHandler>,
) -> CompensationJob {
    let handler: Arc<dyn UnitHandler> = handler;
    CompensationJob::new(&settings(), locks.clone(), switches, queue, handler)
}

#[tokio::test]
async fn test_stuck_topic_is_compensated_as_one_unit() {
    let locks = memory_locks();
    let queue = FakeQueue::new(vec![("T1", 3, 25 * MINUTE), ("T2", 1, 5 * MINUTE)]);
    let handler = Arc::new(RecordingHandler::default());
    let job = job(&locks, Toggle::on(), queue, handler.clone());

    let outcome = job.run(&JobContext::new(COMPENSATION_JOB_ID, "node-a")).await;

    let stats = outcome.stats().expect("run should succeed");
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.processed, 1);
    assert!(stats.is_consistent());
    assert_eq!(*handler.handled.lock().unwrap(), vec!["T1".to_string()]);
}

#[tokio::test]
async fn test_second_instance_skips_without_scanning() {
    let locks = memory_locks();
    let queue = FakeQueue::new(vec![("T1", 3, 25 * MINUTE)]);
    let handler = Arc::new(RecordingHandler::default());

    // Instance A is mid-run and owns the global lock.
    let global = LockKey::parse(&settings().global_lock_key).unwrap();
    let a_token = OwnerToken::for_holder("node-a");
    assert!(locks.acquire(&global, &a_token, settings().global_lock_ttl()).await.unwrap());

    let instance_b = job(&locks, Toggle::on(), queue.clone(), handler.clone());
    let outcome = instance_b.run(&JobContext::new(COMPENSATION_JOB_ID, "node-b")).await;

    assert_eq!(outcome, JobOutcome::skipped("global lock held"));
    assert_eq!(queue.scans.load(Ordering::SeqCst), 0);
    assert!(handler.handled.lock().unwrap().is_empty());
    assert_eq!(locks.holder(&global).await.unwrap(), Some(a_token));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_single_runner() {
    let locks = memory_locks();
    let queue = FakeQueue::slow(vec![("T1", 3, 25 * MINUTE)], Duration::from_millis(200));
    let handler = Arc::new(RecordingHandler::default());
    let job = Arc::new(job(&locks, Toggle::on(), queue.clone(), handler));

    let mut handles = Vec::new();
    for i in 0..6 {
        let job = Arc::clone(&job);
        handles.push(tokio::spawn(async move {
            job.run(&JobContext::new(COMPENSATION_JOB_ID, format!("node-{}", i))).await
        }));
    }

    let mut succeeded = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.unwrap() {
            JobOutcome::Succeeded(_) => succeeded += 1,
            JobOutcome::Skipped { .. } => skipped += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(skipped, 5);
    assert_eq!(queue.scans.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_toggle_is_polled_every_run() {
    let locks = memory_locks();
    let queue = FakeQueue::new(vec![("T1", 3, 25 * MINUTE)]);
    let toggle = Toggle::on();
    let job = job(&locks, toggle.clone(), queue.clone(), Arc::new(RecordingHandler::default()));

    toggle.set(false);
    let off = job.run(&JobContext::new(COMPENSATION_JOB_ID, "node-a")).await;
    assert_eq!(off, JobOutcome::skipped("disabled"));
    assert_eq!(queue.scans.load(Ordering::SeqCst), 0);

    toggle.set(true);
    let on = job.run(&JobContext::new(COMPENSATION_JOB_ID, "node-a")).await;
    assert!(matches!(on, JobOutcome::Succeeded(_)));
    assert_eq!(queue.scans.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_global_lock_released_after_every_run() {
    let locks = memory_locks();
    let global = LockKey::parse(&settings().global_lock_key).unwrap();
    let empty = job(
        &locks,
        Toggle::on(),
        FakeQueue::new(vec![]),
        Arc::new(RecordingHandler::default()),
    );
    let outcome = empty.run(&JobContext::new(COMPENSATION_JOB_ID, "node-a")).await;
    assert_eq!(outcome.stats().map(|s| s.total), Some(0));
    assert_eq!(locks.holder(&global).await.unwrap(), None);

    let handler = Arc::new(RecordingHandler {
        failing: vec!["T2".to_string()],
        ..Default::default()
    });
    let partial = job(
        &locks,
        Toggle::on(),
        FakeQueue::new(vec![("T1", 1, 30 * MINUTE), ("T2", 4, 30 * MINUTE)]),
        handler,
    );
    let outcome = partial.run(&JobContext::new(COMPENSATION_JOB_ID, "node-a")).await;
    let stats = outcome.stats().copied().expect("partial success is still a success");
    assert_eq!((stats.succeeded, stats.failed), (1, 1));
    assert_eq!(locks.holder(&global).await.unwrap(), None);
}

#[tokio::test]
async fn test_batch_limit_caps_units() {
    let locks = memory_locks();
    let stuck: Vec<(String, usize, Duration)> =
        (0..80).map(|i| (format!("T{}", i), 1, 30 * MINUTE)).collect();
    let queue = FakeQueue::new(stuck.iter().map(|(t, c, a)| (t.as_str(), *c, *a)).collect());
    let job = job(&locks, Toggle::on(), queue, Arc::new(RecordingHandler::default()));

    let outcome = job.run(&JobContext::new(COMPENSATION_JOB_ID, "node-a")).await;
    let stats = outcome.stats().expect("run should succeed");
    assert_eq!(stats.total, 50);
    assert_eq!(stats.chunks, 3);
}
