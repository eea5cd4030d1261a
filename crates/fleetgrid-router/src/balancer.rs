//! Selection primitives over a candidate slice.
//!
//! Every function here returns an index into the slice it was given; the
//! router maps it back to an instance. Candidate slices are in pool
//! insertion order, which is what the tie-break rules rely on.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use sha2::{Digest, Sha256};

use fleet_core::CONNECTIONS_PER_INSTANCE_LIMIT;
use fleetgrid_state::Instance;

/// A round-robin counter shared by all router calls.
///
/// Uses `AtomicUsize` for lock-free concurrent selection. The index is
/// taken modulo the candidate count at call time, so the pool may grow or
/// shrink between calls.
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Select the next index, wrapping around `count`.
    ///
    /// Returns `None` if count is zero. The counter does not move then.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(idx % count)
    }

    #[cfg(test)]
    fn current(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the instance with the fewest active connections.
///
/// Ties go to the earliest candidate, i.e. insertion order.
pub fn least_connections_index(candidates: &[Instance]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        // min_by_key keeps the first of equal minima.
        .min_by_key(|(_, inst)| inst.active_connections)
        .map(|(idx, _)| idx)
}

/// Spare-capacity weight of an instance.
///
/// `((100 - cpu) / 100) * ((100 - memory) / 100) * max(0, 1 - connections / 1000)`
pub fn instance_weight(inst: &Instance) -> f64 {
    let cpu = (100.0 - inst.cpu.clamp(0.0, 100.0)) / 100.0;
    let memory = (100.0 - inst.memory.clamp(0.0, 100.0)) / 100.0;
    let connections =
        (1.0 - inst.active_connections as f64 / CONNECTIONS_PER_INSTANCE_LIMIT).max(0.0);
    cpu * memory * connections
}

/// Weighted random draw over `weights`.
///
/// If every weight is zero the draw is uniform.
pub fn weighted_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Some(rng.random_range(0..weights.len()));
    }
    let point = rng.random_range(0.0..total);
    Some(pick_cumulative(weights, point))
}

/// First index whose cumulative weight exceeds `point`.
fn pick_cumulative(weights: &[f64], point: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, w) in weights.iter().enumerate() {
        cumulative += w;
        if point < cumulative {
            return idx;
        }
    }
    // Float rounding can leave `point` a hair past the last boundary.
    weights
        .iter()
        .rposition(|w| *w > 0.0)
        .unwrap_or(weights.len() - 1)
}

/// Stable index for a client key: first 8 bytes of SHA-256, modulo `len`.
pub fn ip_hash_index(key: &str, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Some((u64::from_be_bytes(prefix) % len as u64) as usize)
}
