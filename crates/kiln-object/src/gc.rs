//! Mark-and-sweep collection with deferred two-phase destruction.
//!
//! A collection marks everything reachable from the root set, begins
//! destruction of the rest, and hands them to the purge. The purge routes
//! `finish_destroy` to objects whose native state is ready, keeps polling the
//! others, and frees the slots once every pending object has finished. The
//! purge can run with a time budget and resume on a later call.

use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use kiln_types::{ObjectFlags, ObjectHandle};

use crate::graph::ObjectGraph;
use crate::record::ObjectBody;

/// Where an object is in its destruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyState {
    /// `begin_destroy` ran; waiting for the purge.
    BeginDestroyed,
    /// Native state was not ready; polled again on the next pass.
    PollPending,
    /// `finish_destroy` ran; the slot is freed at the end of the purge.
    FinishDestroyed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum PurgeStage {
    #[default]
    Idle,
    RouteFinishDestroy,
    PollPending,
    Free,
}

/// Purge progress kept across [`ObjectGraph::incremental_purge_garbage`]
/// calls.
#[derive(Debug, Default)]
pub(crate) struct PurgeState {
    stage: PurgeStage,
    pending: VecDeque<ObjectHandle>,
    polling: Vec<ObjectHandle>,
    finished: Vec<ObjectHandle>,
    states: HashMap<ObjectHandle, DestroyState>,
}

impl PurgeState {
    fn is_active(&self) -> bool {
        self.stage != PurgeStage::Idle
    }
}

/// Outcome of one [`ObjectGraph::collect_garbage`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Objects in the dynamic range that were examined.
    pub considered: usize,
    /// Objects found reachable, including the seeds.
    pub reachable: usize,
    /// Objects whose destruction began.
    pub unreachable: usize,
    /// Slots freed before returning (only with a full purge).
    pub freed: usize,
    /// Whether destruction of every unreachable object completed.
    pub purge_complete: bool,
}

/// Objects between two checks of the purge time budget.
const TIME_CHECK_INTERVAL: usize = 16;

impl ObjectGraph {
    /// Collect unreachable objects.
    ///
    /// Seeds are root-set objects and objects carrying any of `keep_flags`
    /// that are not pending kill. With `full_purge`, destruction runs to
    /// completion before returning; otherwise the caller drives it with
    /// [`incremental_purge_garbage`](Self::incremental_purge_garbage).
    ///
    /// # Panics
    ///
    /// Panics if a root-set object ends up unreachable.
    pub fn collect_garbage(&mut self, keep_flags: ObjectFlags, full_purge: bool) -> GcReport {
        if self.purge.is_active() {
            self.incremental_purge_garbage(None);
        }

        let mut report = GcReport::default();
        let classes: Vec<ObjectHandle> = self
            .objects()
            .into_iter()
            .filter(|h| self.record(*h).is_some_and(|r| r.is_class()))
            .collect();
        for class in classes {
            self.token_stream(class);
        }

        // Mark.
        let mut queue = VecDeque::new();
        for index in self.first_gc_index..self.slots.len() {
            let slot = &mut self.slots[index];
            let handle = ObjectHandle::new(index as u32, slot.generation);
            let Some(record) = slot.record.as_mut() else {
                continue;
            };
            report.considered += 1;
            let seed = record.flags.contains(ObjectFlags::ROOT_SET)
                || (record.flags.intersects(keep_flags)
                    && !record.flags.contains(ObjectFlags::PENDING_KILL));
            if seed {
                record.flags.remove(ObjectFlags::UNREACHABLE);
                queue.push_back(handle);
            } else {
                record.flags.insert(ObjectFlags::UNREACHABLE);
            }
        }

        let mut refs = Vec::new();
        while let Some(handle) = queue.pop_front() {
            report.reachable += 1;
            refs.clear();
            self.referenced_objects(handle, &mut refs);
            for &target in &refs {
                let Some(record) = self.record_mut(target) else {
                    continue;
                };
                if record.flags.contains(ObjectFlags::UNREACHABLE)
                    && !record.flags.contains(ObjectFlags::PENDING_KILL)
                {
                    record.flags.remove(ObjectFlags::UNREACHABLE);
                    queue.push_back(target);
                }
            }
        }

        // Begin destroy.
        let mut unreachable = Vec::new();
        for index in self.first_gc_index..self.slots.len() {
            let slot = &self.slots[index];
            if let Some(record) = &slot.record {
                if record.flags.contains(ObjectFlags::UNREACHABLE) {
                    assert!(
                        !record.flags.contains(ObjectFlags::ROOT_SET),
                        "root-set object {index} is unreachable"
                    );
                    unreachable.push(ObjectHandle::new(index as u32, slot.generation));
                }
            }
        }
        for &handle in &unreachable {
            self.begin_destroy(handle);
        }
        report.unreachable = unreachable.len();
        info!(
            considered = report.considered,
            reachable = report.reachable,
            unreachable = report.unreachable,
            "garbage collection marked"
        );

        if full_purge {
            let before = self.len();
            report.purge_complete = self.incremental_purge_garbage(None);
            report.freed = before - self.len();
        } else {
            report.purge_complete = unreachable.is_empty() && !self.purge.is_active();
        }
        report
    }

    fn begin_destroy(&mut self, handle: ObjectHandle) {
        self.unhash_object(handle);
        if let Some(link) = self.clear_linker_link(handle) {
            self.detached_exports.push((handle, link));
        }
        let Some(record) = self.record_mut(handle) else {
            return;
        };
        record.flags.insert(ObjectFlags::BEGIN_DESTROYED);
        let mut detach = None;
        match &mut record.body {
            ObjectBody::Instance(data) => {
                if let Some(native) = data.native.as_mut() {
                    native.begin_destroy();
                }
            }
            ObjectBody::Package(state) => detach = state.linker.take(),
            ObjectBody::Class(_) => {}
        }
        if let Some(linker) = detach {
            self.pending_linker_detach.push(linker);
        }
        debug!(object = %handle, "begin destroy");
        self.purge.states.insert(handle, DestroyState::BeginDestroyed);
        self.purge.pending.push_back(handle);
        self.purge.stage = PurgeStage::RouteFinishDestroy;
    }

    /// Advance destruction of collected objects.
    ///
    /// Returns `true` once every pending object has been freed. With a
    /// `time_limit`, returns `false` as soon as the budget is spent or an
    /// object is still not ready; the next call resumes where this one
    /// stopped. Without one, waits for not-ready objects, yielding the thread
    /// between polls.
    ///
    /// # Panics
    ///
    /// Panics if an object is about to be freed without having gone through
    /// both destruction phases.
    pub fn incremental_purge_garbage(&mut self, time_limit: Option<Duration>) -> bool {
        let start = Instant::now();
        let over_budget = |start: Instant| time_limit.is_some_and(|limit| start.elapsed() >= limit);

        loop {
            match self.purge.stage {
                PurgeStage::Idle => return true,
                PurgeStage::RouteFinishDestroy => {
                    let mut processed = 0;
                    while let Some(handle) = self.purge.pending.pop_front() {
                        if !self.try_finish_destroy(handle) {
                            self.purge.states.insert(handle, DestroyState::PollPending);
                            self.purge.polling.push(handle);
                        }
                        processed += 1;
                        if processed % TIME_CHECK_INTERVAL == 0 && over_budget(start) {
                            return false;
                        }
                    }
                    self.purge.stage = PurgeStage::PollPending;
                }
                PurgeStage::PollPending => {
                    let polling = std::mem::take(&mut self.purge.polling);
                    for handle in polling {
                        if !self.try_finish_destroy(handle) {
                            self.purge.polling.push(handle);
                        }
                    }
                    if self.purge.polling.is_empty() {
                        self.purge.stage = PurgeStage::Free;
                    } else if time_limit.is_some() {
                        debug!(waiting = self.purge.polling.len(), "objects not ready to finish destroy");
                        return false;
                    } else {
                        thread::yield_now();
                    }
                }
                PurgeStage::Free => {
                    let finished = std::mem::take(&mut self.purge.finished);
                    let count = finished.len();
                    for handle in finished {
                        let flags = self.flags(handle);
                        assert!(
                            flags.contains(ObjectFlags::BEGIN_DESTROYED | ObjectFlags::FINISH_DESTROYED),
                            "freeing object {handle} before both destroy phases ran"
                        );
                        self.purge.states.remove(&handle);
                        self.remove_object(handle);
                    }
                    self.purge.stage = PurgeStage::Idle;
                    debug!(freed = count, "purge complete");
                    return true;
                }
            }
        }
    }

    fn try_finish_destroy(&mut self, handle: ObjectHandle) -> bool {
        let Some(record) = self.record_mut(handle) else {
            return true;
        };
        if let ObjectBody::Instance(data) = &mut record.body {
            if let Some(native) = data.native.as_mut() {
                if !native.is_ready_for_finish_destroy() {
                    return false;
                }
                native.finish_destroy();
            }
        }
        record.flags.insert(ObjectFlags::FINISH_DESTROYED);
        self.purge.states.insert(handle, DestroyState::FinishDestroyed);
        self.purge.finished.push(handle);
        true
    }

    /// Destruction progress of `handle`, if it is being destroyed.
    pub fn destroy_state(&self, handle: ObjectHandle) -> Option<DestroyState> {
        self.purge.states.get(&handle).copied()
    }

    /// Whether a purge is still in progress.
    pub fn is_purge_pending(&self) -> bool {
        self.purge.is_active()
    }
}
