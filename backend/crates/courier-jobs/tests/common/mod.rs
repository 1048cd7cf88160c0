#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_configs::JobSwitches;
use courier_jobs::{
    CompensationSource, CompensationUnit, ExternalStatusSource, JobContext, JobError, Result,
    StatusRecord, StatusRepository, UnitHandler,
};
use courier_locks::{LockManager, MemoryLockStore};

pub fn memory_locks() -> LockManager {
    LockManager::new(Arc::new(MemoryLockStore::new()))
}

/// Switch board whose answer can be flipped between runs.
pub struct Toggle(AtomicBool);

impl Toggle {
    pub fn on() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(true)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

impl JobSwitches for Toggle {
    fn is_enabled(&self, _job_id: &str) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pending messages per topic with their age.
pub struct FakeQueue {
    pub stuck: Mutex<Vec<(String, usize, Duration)>>,
    pub scans: AtomicUsize,
    pub scan_delay: Duration,
}

impl FakeQueue {
    pub fn new(stuck: Vec<(&str, usize, Duration)>) -> Arc<Self> {
        Self::slow(stuck, Duration::ZERO)
    }

    pub fn slow(stuck: Vec<(&str, usize, Duration)>, scan_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            stuck: Mutex::new(
                stuck
                    .into_iter()
                    .map(|(topic, count, age)| (topic.to_string(), count, age))
                    .collect(),
            ),
            scans: AtomicUsize::new(0),
            scan_delay,
        })
    }
}

#[async_trait]
impl CompensationSource for FakeQueue {
    async fn scan_stale(&self, older_than: Duration, limit: usize) -> Result<Vec<CompensationUnit>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if !self.scan_delay.is_zero() {
            tokio::time::sleep(self.scan_delay).await;
        }
        let stuck = self.stuck.lock().unwrap();
        Ok(stuck
            .iter()
            .filter(|(_, _, age)| *age > older_than)
            .take(limit)
            .map(|(topic, count, _)| CompensationUnit {
                unit_key: topic.clone(),
                discovered_at_ms: JobContext::now_millis(),
                pending_items: *count,
            })
            .collect())
    }
}

/// Requeues every pending item of a topic and reports how many.
#[derive(Default)]
pub struct RecordingHandler {
    pub handled: Mutex<Vec<String>>,
    pub failing: Vec<String>,
}

#[async_trait]
impl UnitHandler for RecordingHandler {
    async fn handle(&self, _ctx: &JobContext, unit: &CompensationUnit) -> Result<usize> {
        self.handled.lock().unwrap().push(unit.unit_key.clone());
        if self.failing.contains(&unit.unit_key) {
            return Err(JobError::Handler(format!("{} could not be requeued", unit.unit_key)));
        }
        Ok(unit.pending_items)
    }
}

#[derive(Default)]
pub struct FakeTaskRuns {
    pub records: Mutex<HashMap<String, (String, Duration)>>,
}

impl FakeTaskRuns {
    pub fn with(records: Vec<(&str, &str, Duration)>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(
                records
                    .into_iter()
                    .map(|(id, status, age)| (id.to_string(), (status.to_string(), age)))
                    .collect(),
            ),
        })
    }

    pub fn status(&self, id: &str) -> Option<String> {
        self.records.lock().unwrap().get(id).map(|(s, _)| s.clone())
    }
}

#[async_trait]
impl StatusRepository for FakeTaskRuns {
    async fn find_stale(
        &self,
        status: &str,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<StatusRecord>> {
        let records = self.records.lock().unwrap();
        let mut stale: Vec<StatusRecord> = records
            .iter()
            .filter(|(_, (s, age))| s == status && *age > older_than)
            .map(|(id, (s, _))| StatusRecord {
                record_id: id.clone(),
                status: s.clone(),
                updated_at_ms: 0,
            })
            .collect();
        stale.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn update_status(&self, current: &StatusRecord, status: &str) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&current.record_id) {
            Some(entry) if entry.0 == current.status => {
                entry.0 = status.to_string();
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

/// External truth keyed by record id; lookups are timestamped.
#[derive(Default)]
pub struct FakeSandbox {
    pub truth: HashMap<String, String>,
    pub unreachable: Vec<String>,
    pub lookups: Mutex<Vec<tokio::time::Instant>>,
    /// Local writes that land while the lookup for that record is in flight.
    pub local_writes: Option<(Arc<FakeTaskRuns>, HashMap<String, String>)>,
}

#[async_trait]
impl ExternalStatusSource for FakeSandbox {
    async fn fetch_status(&self, record_id: &str) -> Result<Option<String>> {
        self.lookups.lock().unwrap().push(tokio::time::Instant::now());
        if let Some((runs, writes)) = &self.local_writes {
            if let Some(status) = writes.get(record_id) {
                if let Some(entry) = runs.records.lock().unwrap().get_mut(record_id) {
                    entry.0 = status.clone();
                }
            }
        }
        if self.unreachable.iter().any(|id| id == record_id) {
            return Err(JobError::Status(format!("sandbox timed out for {}", record_id)));
        }
        Ok(self.truth.get(record_id).cloned())
    }
}
