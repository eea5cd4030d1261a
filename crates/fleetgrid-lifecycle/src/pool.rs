//! Instance pool — arena of instances keyed by insertion sequence.
//!
//! The pool itself does no locking; the lifecycle manager wraps it in an
//! `RwLock` and never holds that lock across an `.await`.

use std::collections::{BTreeMap, HashMap};

use fleetgrid_state::{Instance, InstanceId, InstanceStatus};

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Default)]
pub(crate) struct InstancePool {
    /// seq → instance. Iteration order is insertion order.
    slots: BTreeMap<u64, Instance>,
    /// id → seq.
    index: HashMap<InstanceId, u64>,
    next_seq: u64,
}

impl InstancePool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a new instance in `Starting` and return a copy of it.
    pub(crate) fn insert_starting(&mut self, region: &str, now: u64) -> Instance {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = format!("inst_{now}_{seq}");
        let instance = Instance::starting(id.clone(), region, seq, now);
        self.index.insert(id, seq);
        self.slots.insert(seq, instance.clone());
        instance
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Instance> {
        let seq = self.index.get(id)?;
        self.slots.get(seq)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Instance> {
        let seq = self.index.get(id)?;
        self.slots.get_mut(seq)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Instance> {
        let seq = self.index.remove(id)?;
        self.slots.remove(&seq)
    }

    /// Move an instance to `next`, enforcing the forward-only state machine.
    pub(crate) fn transition(
        &mut self,
        id: &str,
        next: InstanceStatus,
        now: u64,
    ) -> LifecycleResult<Instance> {
        let inst = self
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if !inst.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from: inst.status,
                to: next,
            });
        }
        inst.status = next;
        if next == InstanceStatus::Stopped {
            inst.stopped_at = Some(now);
        }
        Ok(inst.clone())
    }

    /// All instances in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.slots.values()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Remove stopped instances whose `stopped_at` is older than `retention_ms`.
    pub(crate) fn purge_stopped(&mut self, now: u64, retention_ms: u64) -> Vec<InstanceId> {
        let expired: Vec<InstanceId> = self
            .slots
            .values()
            .filter(|i| i.status == InstanceStatus::Stopped)
            .filter(|i| {
                let stopped_at = i.stopped_at.unwrap_or(i.started_at);
                now.saturating_sub(stopped_at) > retention_ms
            })
            .map(|i| i.id.clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired
    }
}
