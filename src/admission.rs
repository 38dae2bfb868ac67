//! Concurrency-group admission control.
//!
//! Each concurrency group gets a lazily created permit pool whose capacity is
//! fixed at creation time (`max(1, max_concurrent)`). Invocations of any tool
//! in the group must hold a permit while their process runs.
//!
//! Permits are handed out as [`GroupPermit`] handles bound to the pool entry
//! they were drawn from, so a `reset` of the group can never redirect a
//! release into a newer pool entry. The id-based [`AdmissionController::release`]
//! remains for detached permits; it credits whichever entry is mapped to the
//! group *at release time* and therefore can over-admit a recreated entry
//! (see `test_detached_release_after_reset_credits_new_pool`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::types::{CancelReason, Error, GroupId, RequestContext, Result};

/// Capacity a pool gets for a configured `max_concurrent`. Zero is clamped
/// to one; it never means "unlimited".
pub fn effective_capacity(max_concurrent: u32) -> usize {
    max_concurrent.max(1) as usize
}

// =============================================================================
// Permit pool
// =============================================================================

/// One generation of a group's counting permit set.
#[derive(Debug)]
pub struct PermitPool {
    group: GroupId,
    capacity: usize,
    generation: u64,
    semaphore: Arc<Semaphore>,
    /// Serializes id-based credits so the count never exceeds capacity.
    credit_lock: Mutex<()>,
}

impl PermitPool {
    fn new(group: GroupId, capacity: usize, generation: u64) -> Self {
        Self {
            group,
            capacity,
            generation,
            semaphore: Arc::new(Semaphore::new(capacity)),
            credit_lock: Mutex::new(()),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Monotonic instance number; a reset group gets a new one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held against this pool.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Return one untracked permit. Returns false when the pool is already full.
    fn credit(&self) -> bool {
        let _guard = self
            .credit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.semaphore.available_permits() >= self.capacity {
            return false;
        }
        self.semaphore.add_permits(1);
        true
    }
}

// =============================================================================
// Permit handle
// =============================================================================

/// A granted permit. Dropping it returns the permit to the pool it came from.
#[derive(Debug)]
pub struct GroupPermit {
    pool: Arc<PermitPool>,
    permit: OwnedSemaphorePermit,
}

impl GroupPermit {
    pub fn group(&self) -> GroupId {
        self.pool.group
    }

    pub fn generation(&self) -> u64 {
        self.pool.generation
    }

    /// Return the permit now. Equivalent to dropping the handle.
    pub fn release(self) {
        drop(self);
    }

    /// Stop tracking this permit. The caller must later hand it back with
    /// [`AdmissionController::release`] for the returned group.
    pub fn detach(self) -> GroupId {
        let group = self.pool.group;
        self.permit.forget();
        group
    }
}

/// Outcome of an acquire attempt.
#[derive(Debug)]
pub enum Admission {
    Granted(GroupPermit),
    Canceled(CancelReason),
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }

    /// Convert into a `Result`, mapping cancellation to an admission error.
    pub fn into_result(self, group: GroupId) -> Result<GroupPermit> {
        match self {
            Admission::Granted(permit) => Ok(permit),
            Admission::Canceled(reason) => Err(Error::admission(group, reason)),
        }
    }
}

/// Point-in-time view of one group's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub group_id: GroupId,
    pub capacity: usize,
    pub available: usize,
    pub generation: u64,
}

// =============================================================================
// Controller
// =============================================================================

/// Maps concurrency group ids to their current permit pool.
///
/// Shared across all request tasks (wrap in `Arc`). Lookups of existing
/// groups take only the read lock.
#[derive(Debug, Default)]
pub struct AdmissionController {
    groups: RwLock<HashMap<GroupId, Arc<PermitPool>>>,
    generations: AtomicU64,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool for `group`, creating it with `max_concurrent` if absent.
    ///
    /// An existing pool keeps the capacity it was created with.
    pub fn pool(&self, group: GroupId, max_concurrent: u32) -> Arc<PermitPool> {
        if let Some(pool) = self.read_groups().get(&group) {
            return Arc::clone(pool);
        }

        let mut groups = self.write_groups();
        // Re-check under the write lock: another task may have created it.
        let pool = groups.entry(group).or_insert_with(|| {
            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
            let capacity = effective_capacity(max_concurrent);
            tracing::debug!(
                group = %group,
                capacity,
                generation,
                "created concurrency group pool"
            );
            Arc::new(PermitPool::new(group, capacity, generation))
        });
        Arc::clone(pool)
    }

    /// Wait for a permit of `group`, or until `ctx` is done.
    ///
    /// A context that is already done never admits, even if a permit is free.
    /// Cancellation holds no permit and leaves the pool unchanged.
    pub async fn acquire(
        &self,
        ctx: &RequestContext,
        group: GroupId,
        max_concurrent: u32,
    ) -> Admission {
        if let Some(reason) = ctx.err() {
            return Admission::Canceled(reason);
        }

        let pool = self.pool(group, max_concurrent);
        let semaphore = Arc::clone(&pool.semaphore);

        tokio::select! {
            biased;
            reason = ctx.done() => {
                tracing::debug!(group = %group, %reason, "admission canceled");
                Admission::Canceled(reason)
            }
            acquired = semaphore.acquire_owned() => match acquired {
                Ok(permit) => Admission::Granted(GroupPermit { pool, permit }),
                Err(_) => {
                    tracing::error!(group = %group, "permit pool closed while waiting");
                    Admission::Canceled(CancelReason::PoolClosed)
                }
            },
        }
    }

    /// Return one detached permit to whatever pool is currently mapped to
    /// `group`. A missing entry is a no-op.
    pub fn release(&self, group: GroupId) {
        let pool = self.read_groups().get(&group).cloned();
        match pool {
            Some(pool) => {
                if !pool.credit() {
                    tracing::warn!(
                        group = %group,
                        generation = pool.generation,
                        "release ignored: pool already at capacity"
                    );
                }
            }
            None => tracing::debug!(group = %group, "release ignored: no pool for group"),
        }
    }

    /// Drop the pool for `group`. Outstanding permits are unaffected; the next
    /// acquire creates a fresh pool. Returns whether an entry existed.
    pub fn reset(&self, group: GroupId) -> bool {
        let removed = self.write_groups().remove(&group);
        if let Some(pool) = &removed {
            tracing::info!(
                group = %group,
                generation = pool.generation,
                in_use = pool.in_use(),
                "concurrency group reset"
            );
        }
        removed.is_some()
    }

    /// Snapshot of every live pool, ordered by group id.
    pub fn stats(&self) -> Vec<GroupStats> {
        let mut stats: Vec<GroupStats> = self
            .read_groups()
            .values()
            .map(|pool| GroupStats {
                group_id: pool.group,
                capacity: pool.capacity,
                available: pool.available(),
                generation: pool.generation,
            })
            .collect();
        stats.sort_by_key(|s| s.group_id);
        stats
    }

    fn read_groups(&self) -> RwLockReadGuard<'_, HashMap<GroupId, Arc<PermitPool>>> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_groups(&self) -> RwLockWriteGuard<'_, HashMap<GroupId, Arc<PermitPool>>> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Tests
// =============================================================================
