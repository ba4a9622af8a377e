//! Asynchronous path planning
//!
//! `schedule_path` only queues a job. Once per tick `execute` snapshots the
//! occupancy grid for every new job and hands the search to the worker pool,
//! then delivers finished paths to their owners, again on the pool. Owners
//! see results late and possibly out of order; `PathSlot` keeps only the
//! newest.
//!
//! Job lifecycle: `New` -> `Working` -> `Done` -> removed after delivery.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::game::systems::path_search::find_path;
use crate::game::walk_map::WalkMap;
use crate::game::workers::WorkerPool;
use crate::game::zone::Zone;
use crate::game::zone_grid::OccupancyProvider;
use crate::metrics::Metrics;
use crate::util::ids::{IdGenerator, JobId};

/// Receiver of finished path jobs
pub trait PathReceiver: Send + Sync {
    /// Offer a path. Returns true when it was accepted, false when a newer
    /// job's path is already held.
    fn receive_path(&self, path: Vec<Zone>, job: JobId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    New,
    Working,
    Done,
}

/// One queued path request
pub struct NavJob {
    pub id: JobId,
    pub from: Zone,
    pub to: Zone,
    pub state: JobState,
    /// Occupied cells captured when the job started working
    pub occupied: Option<Arc<[Zone]>>,
    /// Empty until done; empty when done means unreachable
    pub path: Vec<Zone>,
    owner: Weak<dyn PathReceiver>,
}

impl std::fmt::Debug for NavJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavJob")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("state", &self.state)
            .field("path_len", &self.path.len())
            .finish()
    }
}

/// Shared path-planning queue
pub struct PathPlanner {
    map: Arc<WalkMap>,
    occupancy: Arc<dyn OccupancyProvider>,
    workers: Arc<WorkerPool>,
    ids: Arc<IdGenerator>,
    metrics: Arc<Metrics>,
    jobs: Mutex<Vec<NavJob>>,
    results_tx: Sender<(JobId, Vec<Zone>)>,
    results_rx: Receiver<(JobId, Vec<Zone>)>,
}

impl PathPlanner {
    pub fn new(
        map: Arc<WalkMap>,
        occupancy: Arc<dyn OccupancyProvider>,
        workers: Arc<WorkerPool>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            map,
            occupancy,
            workers,
            ids,
            metrics: Arc::new(Metrics::new()),
            jobs: Mutex::new(Vec::new()),
            results_tx,
            results_rx,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn walk_map(&self) -> &Arc<WalkMap> {
        &self.map
    }

    /// Queue a search from `from` to `to` on behalf of `owner`. Never blocks
    /// on the search itself.
    pub fn schedule_path(&self, from: Zone, to: Zone, owner: Weak<dyn PathReceiver>) -> JobId {
        let id = self.ids.next_id();
        self.jobs.lock().push(NavJob {
            id,
            from,
            to,
            state: JobState::New,
            occupied: None,
            path: Vec::new(),
            owner,
        });
        self.metrics.record_path_scheduled();
        id
    }

    /// Start new jobs and deliver finished ones. Returns the number of paths
    /// handed to owners.
    pub fn execute(&self, tick: u64) -> usize {
        self.start_new_jobs(tick);
        self.collect_results();
        self.deliver_done(tick)
    }

    fn start_new_jobs(&self, tick: u64) {
        let has_new = self.jobs.lock().iter().any(|j| j.state == JobState::New);
        if !has_new {
            return;
        }

        // Taken without the queue lock held
        let occupied: Arc<[Zone]> = self.occupancy.occupied_zones().into();

        let started: Vec<(JobId, Zone, Zone)> = {
            let mut jobs = self.jobs.lock();
            jobs.iter_mut()
                .filter(|j| j.state == JobState::New)
                .map(|job| {
                    job.state = JobState::Working;
                    job.occupied = Some(occupied.clone());
                    (job.id, job.from, job.to)
                })
                .collect()
        };

        for (id, from, to) in started {
            let map = self.map.clone();
            let occupied = occupied.clone();
            let results = self.results_tx.clone();
            self.workers.spawn("path-search", move || {
                let path = catch_unwind(AssertUnwindSafe(|| find_path(&map, &occupied, from, to)))
                    .unwrap_or_else(|_| {
                        error!(job = id, tick, "Path search panicked, completing with no path");
                        Vec::new()
                    });
                // The planner owns the receiver; a send only fails during teardown
                let _ = results.send((id, path));
            });
        }
    }

    fn collect_results(&self) {
        let finished: Vec<(JobId, Vec<Zone>)> = self.results_rx.try_iter().collect();
        if finished.is_empty() {
            return;
        }

        let mut jobs = self.jobs.lock();
        for (id, path) in finished {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.path = path;
                job.state = JobState::Done;
            }
        }
    }

    fn deliver_done(&self, tick: u64) -> usize {
        let done: Vec<NavJob> = {
            let mut jobs = self.jobs.lock();
            let (done, pending): (Vec<NavJob>, Vec<NavJob>) =
                jobs.drain(..).partition(|j| j.state == JobState::Done);
            *jobs = pending;
            done
        };

        let mut delivered = 0;
        for job in done {
            if job.path.is_empty() {
                debug!(job = job.id, tick, from = ?job.from, to = ?job.to, "No path found");
                self.metrics.record_path_unreachable();
            }

            let Some(owner) = job.owner.upgrade() else {
                continue;
            };

            delivered += 1;
            let metrics = self.metrics.clone();
            let (id, path) = (job.id, job.path);
            self.workers.spawn("path-delivery", move || {
                if owner.receive_path(path, id) {
                    metrics.record_path_delivered();
                } else {
                    debug!(job = id, "Discarded stale path");
                    metrics.record_path_stale();
                }
            });
        }
        delivered
    }

    /// State of a queued job, `None` once delivered (or never scheduled)
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.jobs.lock().iter().find(|j| j.id == id).map(|j| j.state)
    }

    /// Jobs not yet delivered
    pub fn pending_jobs(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl std::fmt::Debug for PathPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathPlanner")
            .field("pending_jobs", &self.pending_jobs())
            .field("next_id", &self.ids.peek())
            .finish()
    }
}

/// Accepted path plus the job that produced it
#[derive(Debug, Clone)]
pub struct AcceptedPath {
    pub job: JobId,
    pub path: Arc<[Zone]>,
}

/// Highest-job-id-wins holder for one consumer's latest path
///
/// The id watermark moves with a compare-and-swap loop so a superseded job can
/// never claim the slot; the path itself is stored under a short lock that
/// re-checks the id, so two accepted deliveries racing to store still leave the
/// newer one in place.
#[derive(Debug, Default)]
pub struct PathSlot {
    last_job: AtomicU64,
    accepted: Mutex<Option<AcceptedPath>>,
}

impl PathSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest job id ever accepted, 0 before the first
    pub fn last_job(&self) -> JobId {
        self.last_job.load(Ordering::Acquire)
    }

    /// Latest accepted path, if not cleared since
    pub fn latest(&self) -> Option<AcceptedPath> {
        self.accepted.lock().clone()
    }

    /// Forget the held path. The id watermark stays, so results of jobs
    /// scheduled before the clear are still rejected.
    pub fn clear(&self) {
        *self.accepted.lock() = None;
    }

    fn claim(&self, job: JobId) -> bool {
        let mut current = self.last_job.load(Ordering::Acquire);
        loop {
            if job <= current {
                return false;
            }
            match self.last_job.compare_exchange_weak(
                current,
                job,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl PathReceiver for PathSlot {
    fn receive_path(&self, path: Vec<Zone>, job: JobId) -> bool {
        if !self.claim(job) {
            return false;
        }

        let mut accepted = self.accepted.lock();
        if accepted.as_ref().map_or(true, |a| a.job < job) {
            *accepted = Some(AcceptedPath {
                job,
                path: path.into(),
            });
        }
        true
    }
}
