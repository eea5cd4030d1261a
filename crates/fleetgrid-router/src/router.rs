//! Router — algorithm dispatch, session affinity and connection accounting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use fleet_core::{Algorithm, LoadBalancerConfig};
use fleetgrid_lifecycle::{LifecycleError, LifecycleManager};
use fleetgrid_state::{Instance, InstanceId};

use crate::balancer::{
    RoundRobinBalancer, instance_weight, ip_hash_index, least_connections_index, weighted_index,
};
use crate::error::{RouteError, RouteResult};

/// Attempts before giving up when the chosen instance leaves `running`
/// between the snapshot and the connection being counted.
const MAX_PICK_ATTEMPTS: usize = 3;

/// Most sticky bindings kept at once. The oldest binding is evicted first;
/// an evicted client simply hashes to a slot again on its next call.
pub const AFFINITY_CAPACITY: usize = 4096;

/// Sticky ip-hash bindings (client key → instance id), bounded in size.
#[derive(Debug)]
struct AffinityTable {
    capacity: usize,
    bindings: HashMap<String, InstanceId>,
    /// Keys in binding order, oldest first.
    order: VecDeque<String>,
}

impl AffinityTable {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            bindings: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&InstanceId> {
        self.bindings.get(key)
    }

    fn bind(&mut self, key: &str, id: InstanceId) {
        if self.bindings.insert(key.to_string(), id).is_none() {
            self.order.push_back(key.to_string());
        }
        while self.bindings.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.bindings.remove(&oldest);
        }
    }

    /// Drop every binding whose instance is not in `candidates`.
    fn retain_candidates(&mut self, candidates: &[Instance]) {
        self.bindings
            .retain(|_, id| candidates.iter().any(|c| &c.id == id));
        let bindings = &self.bindings;
        self.order.retain(|key| bindings.contains_key(key));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.bindings.len()
    }
}

pub struct Router {
    lifecycle: LifecycleManager,
    algorithm: RwLock<Algorithm>,
    session_affinity: bool,
    round_robin: RoundRobinBalancer,
    affinity: Mutex<AffinityTable>,
}

impl Router {
    pub fn new(lifecycle: LifecycleManager, config: &LoadBalancerConfig) -> Self {
        Self {
            lifecycle,
            algorithm: RwLock::new(config.algorithm),
            session_affinity: config.session_affinity,
            round_robin: RoundRobinBalancer::new(),
            affinity: Mutex::new(AffinityTable::new(AFFINITY_CAPACITY)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        *self.algorithm.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the selection algorithm. Takes effect on the next call.
    pub fn set_algorithm(&self, algorithm: Algorithm) {
        let mut current = self.algorithm.write().unwrap_or_else(PoisonError::into_inner);
        if *current != algorithm {
            info!(from = %*current, to = %algorithm, "routing algorithm changed");
            *current = algorithm;
        }
    }

    /// Pick a target instance and count one connection against it.
    ///
    /// `client_key` identifies the caller (usually its IP) and is only
    /// used by `ip-hash`. The caller must [`release`](Self::release) the
    /// instance when the work completes.
    pub fn route(&self, client_key: Option<&str>) -> RouteResult<Instance> {
        for _ in 0..MAX_PICK_ATTEMPTS {
            let candidates = self.lifecycle.candidates();
            if candidates.is_empty() {
                return Err(RouteError::NoCapacity);
            }

            let idx = self.select(&candidates, client_key).ok_or(RouteError::NoCapacity)?;
            let mut chosen = candidates[idx].clone();

            match self.lifecycle.open_connection(&chosen.id) {
                Ok(count) => {
                    chosen.active_connections = count;
                    debug!(instance = %chosen.id, connections = count, "request routed");
                    return Ok(chosen);
                }
                // Stopped or removed since the snapshot; choose again.
                Err(LifecycleError::NotRunning { .. } | LifecycleError::NotFound(_)) => {
                    debug!(instance = %chosen.id, "candidate left the pool, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RouteError::NoCapacity)
    }

    /// Signal that work routed to `id` has finished.
    pub fn release(&self, id: &str) -> RouteResult<()> {
        self.lifecycle.close_connection(id)?;
        Ok(())
    }

    fn select(&self, candidates: &[Instance], client_key: Option<&str>) -> Option<usize> {
        match self.algorithm() {
            Algorithm::LeastConnections => least_connections_index(candidates),
            Algorithm::RoundRobin => self.round_robin.next(candidates.len()),
            Algorithm::Weighted => {
                let weights: Vec<f64> = candidates.iter().map(instance_weight).collect();
                weighted_index(&weights, &mut rand::rng())
            }
            Algorithm::IpHash => match client_key {
                Some(key) if self.session_affinity => self.sticky(candidates, key),
                Some(key) => ip_hash_index(key, candidates.len()),
                None => least_connections_index(candidates),
            },
        }
    }

    /// Resolve a sticky binding for `key`.
    ///
    /// A bound instance that is still a candidate is reused. A stale binding
    /// falls back to least-connections and is rebound to that choice. A new
    /// key is bound to its hash slot. At most [`AFFINITY_CAPACITY`] keys
    /// are remembered.
    fn sticky(&self, candidates: &[Instance], key: &str) -> Option<usize> {
        let mut affinity = self.affinity.lock().unwrap_or_else(PoisonError::into_inner);

        let idx = match affinity.get(key) {
            Some(bound) => match candidates.iter().position(|c| &c.id == bound) {
                Some(idx) => return Some(idx),
                None => {
                    debug!(client = %key, instance = %bound, "sticky instance unavailable");
                    affinity.retain_candidates(candidates);
                    least_connections_index(candidates)?
                }
            },
            None => ip_hash_index(key, candidates.len())?,
        };

        affinity.bind(key, candidates[idx].id.clone());
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use fleet_core::LifecycleConfig;
    use fleetgrid_lifecycle::{DeprovisionFuture, ProvisionFuture, ProvisionedInstance, Provisioner};
    use fleetgrid_state::HealthStatus;

    struct InstantProvisioner(AtomicU64);

    impl Provisioner for InstantProvisioner {
        fn provision<'a>(&'a self, _region: &'a str) -> ProvisionFuture<'a> {
            let n = self.0.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move {
                Ok(ProvisionedInstance {
                    handle: format!("h{n}"),
                    address: None,
                })
            })
        }

        fn deprovision<'a>(&'a self, _handle: &'a str) -> DeprovisionFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    async fn pool(n: usize) -> (LifecycleManager, Vec<Instance>) {
        let lifecycle = LifecycleManager::new(
            Arc::new(InstantProvisioner(AtomicU64::new(0))),
            LifecycleConfig::default(),
        );
        let mut started = Vec::new();
        for _ in 0..n {
            started.push(lifecycle.start("us-east-1").await.unwrap());
        }
        (lifecycle, started)
    }

    fn router(lifecycle: &LifecycleManager, algorithm: Algorithm) -> Router {
        Router::new(
            lifecycle.clone(),
            &LoadBalancerConfig {
                algorithm,
                ..LoadBalancerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn empty_pool_has_no_capacity() {
        let (lifecycle, _) = pool(0).await;
        let router = router(&lifecycle, Algorithm::LeastConnections);
        assert!(matches!(router.route(None), Err(RouteError::NoCapacity)));
    }

    #[tokio::test]
    async fn least_connections_spreads_load() {
        let (lifecycle, started) = pool(3).await;
        let router = router(&lifecycle, Algorithm::LeastConnections);

        // Full tie: first inserted wins.
        assert_eq!(router.route(None).unwrap().id, started[0].id);
        assert_eq!(router.route(None).unwrap().id, started[1].id);
        assert_eq!(router.route(None).unwrap().id, started[2].id);
        assert_eq!(router.route(None).unwrap().id, started[0].id);

        router.release(&started[1].id).unwrap();
        assert_eq!(router.route(None).unwrap().id, started[1].id);
    }

    #[tokio::test]
    async fn route_counts_and_release_uncounts() {
        let (lifecycle, started) = pool(1).await;
        let router = router(&lifecycle, Algorithm::RoundRobin);

        let picked = router.route(None).unwrap();
        assert_eq!(picked.active_connections, 1);
        assert_eq!(lifecycle.get(&started[0].id).unwrap().active_connections, 1);

        router.release(&picked.id).unwrap();
        assert_eq!(lifecycle.get(&started[0].id).unwrap().active_connections, 0);
    }

    #[tokio::test]
    async fn round_robin_rotates() {
        let (lifecycle, started) = pool(3).await;
        let router = router(&lifecycle, Algorithm::RoundRobin);

        let picks: Vec<_> = (0..6).map(|_| router.route(None).unwrap().id).collect();
        let expected: Vec<_> = started.iter().chain(started.iter()).map(|i| i.id.clone()).collect();
        assert_eq!(picks, expected);
    }

    #[tokio::test]
    async fn never_routes_to_draining_or_unhealthy() {
        let (lifecycle, started) = pool(3).await;
        lifecycle.begin_drain(&started[0].id).unwrap();
        lifecycle
            .set_health(&started[1].id, HealthStatus::Unhealthy)
            .unwrap();

        for algorithm in [
            Algorithm::LeastConnections,
            Algorithm::RoundRobin,
            Algorithm::Weighted,
            Algorithm::IpHash,
        ] {
            let router = router(&lifecycle, algorithm);
            for key in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
                let picked = router.route(Some(key)).unwrap();
                assert_eq!(picked.id, started[2].id, "{algorithm} picked {}", picked.id);
            }
        }
    }

    #[tokio::test]
    async fn all_unhealthy_is_no_capacity() {
        let (lifecycle, started) = pool(2).await;
        for inst in &started {
            lifecycle.set_health(&inst.id, HealthStatus::Unhealthy).unwrap();
        }
        let router = router(&lifecycle, Algorithm::Weighted);
        assert!(matches!(router.route(None), Err(RouteError::NoCapacity)));
    }

    #[tokio::test]
    async fn weighted_prefers_idle_instance() {
        let (lifecycle, started) = pool(2).await;
        lifecycle
            .apply_telemetry(&started[0].id, 100.0, 100.0, None)
            .unwrap();
        let router = router(&lifecycle, Algorithm::Weighted);

        for _ in 0..20 {
            assert_eq!(router.route(None).unwrap().id, started[1].id);
        }
    }

    #[tokio::test]
    async fn ip_hash_is_sticky() {
        let (lifecycle, _) = pool(4).await;
        let router = router(&lifecycle, Algorithm::IpHash);

        let first = router.route(Some("198.51.100.20")).unwrap().id;
        for _ in 0..10 {
            assert_eq!(router.route(Some("198.51.100.20")).unwrap().id, first);
        }
    }

    #[tokio::test]
    async fn ip_hash_survives_pool_growth() {
        let (lifecycle, _) = pool(2).await;
        let router = router(&lifecycle, Algorithm::IpHash);

        let first = router.route(Some("client-a")).unwrap().id;
        lifecycle.start("eu-west-1").await.unwrap();
        lifecycle.start("eu-west-1").await.unwrap();
        assert_eq!(router.route(Some("client-a")).unwrap().id, first);
    }

    #[tokio::test]
    async fn ip_hash_falls_back_when_bound_instance_leaves() {
        let (lifecycle, started) = pool(3).await;
        let router = router(&lifecycle, Algorithm::IpHash);

        let bound = router.route(Some("client-b")).unwrap().id;
        router.release(&bound).unwrap();
        lifecycle.begin_drain(&bound).unwrap();

        // Load the other two so least-connections has a clear answer.
        let others: Vec<_> = started.iter().filter(|i| i.id != bound).collect();
        lifecycle.open_connection(&others[0].id).unwrap();

        let fallback = router.route(Some("client-b")).unwrap().id;
        assert_eq!(fallback, others[1].id);
        // And the new binding sticks.
        assert_eq!(router.route(Some("client-b")).unwrap().id, fallback);
    }

    #[tokio::test]
    async fn sticky_bindings_stay_bounded() {
        let (lifecycle, _) = pool(3).await;
        let router = router(&lifecycle, Algorithm::IpHash);

        for i in 0..10_000 {
            let key = format!("10.0.{}.{}", i / 256, i % 256);
            let picked = router.route(Some(&key)).unwrap();
            router.release(&picked.id).unwrap();
        }
        assert_eq!(router.affinity.lock().unwrap().len(), AFFINITY_CAPACITY);
    }

    #[test]
    fn affinity_table_evicts_oldest() {
        let mut table = AffinityTable::new(2);
        table.bind("a", "inst_1".to_string());
        table.bind("b", "inst_2".to_string());
        // Rebinding an existing key does not change its age.
        table.bind("a", "inst_3".to_string());
        table.bind("c", "inst_1".to_string());

        assert_eq!(table.len(), 2);
        assert!(table.get("a").is_none());
        assert_eq!(table.get("b").map(String::as_str), Some("inst_2"));
        assert_eq!(table.get("c").map(String::as_str), Some("inst_1"));
    }

    #[tokio::test]
    async fn stale_bindings_are_pruned() {
        let (lifecycle, started) = pool(2).await;
        let mut table = AffinityTable::new(16);
        table.bind("a", started[0].id.clone());
        table.bind("b", started[1].id.clone());
        lifecycle.begin_drain(&started[0].id).unwrap();

        table.retain_candidates(&lifecycle.candidates());
        assert_eq!(table.len(), 1);
        assert_eq!(table.order, VecDeque::from(["b".to_string()]));
    }

    #[tokio::test]
    async fn ip_hash_without_key_uses_least_connections() {
        let (lifecycle, started) = pool(2).await;
        lifecycle.open_connection(&started[0].id).unwrap();
        let router = router(&lifecycle, Algorithm::IpHash);
        assert_eq!(router.route(None).unwrap().id, started[1].id);
    }

    #[tokio::test]
    async fn set_algorithm_takes_effect() {
        let (lifecycle, started) = pool(2).await;
        let router = router(&lifecycle, Algorithm::LeastConnections);
        lifecycle.open_connection(&started[0].id).unwrap();
        lifecycle.open_connection(&started[0].id).unwrap();

        router.set_algorithm(Algorithm::RoundRobin);
        assert_eq!(router.algorithm(), Algorithm::RoundRobin);
        // Round-robin ignores load: counter 0 → first candidate.
        assert_eq!(router.route(None).unwrap().id, started[0].id);
    }
}
