//! Per-upload merge serialisation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use upstitch_core::UploadId;

/// Where an upload stands with respect to merging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    /// A request holds the claim, checking for completeness or merging
    Merging,
    Assembled,
}

#[derive(Debug, Default)]
struct GuardState {
    claims: HashMap<String, Arc<AsyncMutex<()>>>,
    assembled: HashSet<String>,
    assembled_order: VecDeque<String>,
}

/// In-process table of merge claims and finished merges.
///
/// Requests for one upload take the claim in turn, so each one re-lists the
/// stored parts after every earlier holder is done. Finished uploads are
/// remembered up to `capacity`, oldest forgotten first.
#[derive(Debug, Clone)]
pub struct MergeGuard {
    state: Arc<Mutex<GuardState>>,
    capacity: usize,
}

impl MergeGuard {
    pub fn new(capacity: usize) -> Self {
        MergeGuard {
            state: Arc::new(Mutex::new(GuardState::default())),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        // Holders never panic mid-update, so a poisoned table is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, upload_id: &UploadId) -> MergeState {
        let state = self.lock();
        let claimed = state
            .claims
            .get(upload_id.as_str())
            .is_some_and(|claim| Arc::strong_count(claim) > 1);

        if state.assembled.contains(upload_id.as_str()) {
            MergeState::Assembled
        } else if claimed {
            MergeState::Merging
        } else {
            MergeState::Idle
        }
    }

    /// Wait for the merge claim of an upload
    pub async fn claim(&self, upload_id: &UploadId) -> MergeClaim {
        let slot = self
            .lock()
            .claims
            .entry(upload_id.as_str().to_string())
            .or_default()
            .clone();

        let permit = slot.lock_owned().await;
        debug!("Claimed merge for upload {}", upload_id);

        MergeClaim {
            guard: self.clone(),
            upload_id: upload_id.clone(),
            permit: Some(permit),
        }
    }

    /// Try to take the claim without waiting
    pub fn try_claim(&self, upload_id: &UploadId) -> Option<MergeClaim> {
        let slot = self
            .lock()
            .claims
            .entry(upload_id.as_str().to_string())
            .or_default()
            .clone();

        slot.try_lock_owned().ok().map(|permit| MergeClaim {
            guard: self.clone(),
            upload_id: upload_id.clone(),
            permit: Some(permit),
        })
    }

    fn record_assembled(&self, upload_id: &UploadId) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.lock();
        let id = upload_id.as_str().to_string();
        if state.assembled.insert(id.clone()) {
            state.assembled_order.push_back(id);
        }
        while state.assembled_order.len() > self.capacity {
            if let Some(oldest) = state.assembled_order.pop_front() {
                state.assembled.remove(&oldest);
            }
        }
    }

    /// Drop the table entry once nobody holds or waits for it
    fn release(&self, upload_id: &UploadId) {
        let mut state = self.lock();
        let unused = state
            .claims
            .get(upload_id.as_str())
            .is_some_and(|claim| Arc::strong_count(claim) == 1);
        if unused {
            state.claims.remove(upload_id.as_str());
        }
    }
}

/// Exclusive right to check and merge one upload; released on drop
#[derive(Debug)]
pub struct MergeClaim {
    guard: MergeGuard,
    upload_id: UploadId,
    permit: Option<OwnedMutexGuard<()>>,
}

impl MergeClaim {
    pub fn upload_id(&self) -> &UploadId {
        &self.upload_id
    }

    pub fn is_assembled(&self) -> bool {
        self.guard.state(&self.upload_id) == MergeState::Assembled
    }

    /// Remember the upload as assembled; later parts for it are not merged again
    pub fn mark_assembled(&self) {
        self.guard.record_assembled(&self.upload_id);
    }
}

impl Drop for MergeClaim {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.guard.release(&self.upload_id);
    }
}
