//! Versioned in-memory registry of services and their instances

use crate::snapshot::{split_timestamp_key, timestamp_key};
use crate::{InstanceMeta, Snapshot};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Current wall clock in epoch millis
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RegistryStore owns every piece of registry state behind one lock.
///
/// `registry`, `versions`, `timestamps` and the global version are only ever
/// changed together under the write guard, so readers and snapshots never see a
/// half-applied mutation or restore.
pub struct RegistryStore {
    state: RwLock<Snapshot>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
        }
    }

    /// Register an instance under a service.
    ///
    /// Re-registering an instance that is already present only marks it online
    /// and refreshes its renew timestamp; versions are left alone.
    pub async fn register(&self, service: &str, mut instance: InstanceMeta) -> InstanceMeta {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = now_millis();
        instance.status = true;

        let instances = state.registry.entry(service.to_string()).or_default();
        if let Some(existing) = instances.iter_mut().find(|m| **m == instance) {
            debug!("Instance {} already registered for {}", instance.to_url(), service);
            existing.status = true;
            state.timestamps.insert(timestamp_key(service, &instance), now);
            return instance;
        }

        info!("Register instance {} for {}", instance.to_url(), service);
        instances.push(instance.clone());
        state.timestamps.insert(timestamp_key(service, &instance), now);
        Self::bump(state, service);

        instance
    }

    /// Remove an instance from a service.
    ///
    /// Returns `None` without touching any version when the service has no
    /// instances at all.
    pub async fn unregister(&self, service: &str, instance: InstanceMeta) -> Option<InstanceMeta> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        info!("Unregister instance {} for {}", instance.to_url(), service);
        let removed = Self::remove_instance(state, service, instance)?;
        state.timestamps.insert(timestamp_key(service, &removed), now_millis());
        Some(removed)
    }

    /// All instances of a service, empty when the service is unknown
    pub async fn get_all_instances(&self, service: &str) -> Vec<InstanceMeta> {
        let state = self.state.read().await;
        state.registry.get(service).cloned().unwrap_or_default()
    }

    /// Record a keep-alive for the instance under every named service
    pub async fn renew(&self, instance: &InstanceMeta, services: &[&str]) -> i64 {
        let mut state = self.state.write().await;
        let now = now_millis();
        for service in services {
            state.timestamps.insert(timestamp_key(service, instance), now);
        }
        debug!("Renewed {} for {:?} at {}", instance.to_url(), services, now);
        now
    }

    pub async fn version(&self, service: &str) -> Option<i64> {
        let state = self.state.read().await;
        state.versions.get(service).copied()
    }

    /// Versions of the named services; services never changed are omitted
    pub async fn versions(&self, services: &[&str]) -> BTreeMap<String, i64> {
        let state = self.state.read().await;
        services
            .iter()
            .filter_map(|s| state.versions.get(*s).map(|v| (s.to_string(), *v)))
            .collect()
    }

    /// Global version, bumped once per committed mutation
    pub async fn global_version(&self) -> i64 {
        self.state.read().await.version
    }

    /// Copy of the renew timestamp table
    pub async fn timestamps(&self) -> BTreeMap<String, i64> {
        self.state.read().await.timestamps.clone()
    }

    /// Unregister every instance whose last renew is more than `ttl_millis`
    /// before `now`, dropping its timestamp entry.
    ///
    /// Expiry is decided and applied under one write guard, so a renew or
    /// register that lands first is always seen. Malformed keys are skipped
    /// and left in place.
    pub async fn evict_expired(&self, now: i64, ttl_millis: i64) -> Vec<(String, InstanceMeta)> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let expired: Vec<(String, i64)> = state
            .timestamps
            .iter()
            .filter(|(_, at)| now - **at > ttl_millis)
            .map(|(key, at)| (key.clone(), *at))
            .collect();

        let mut evicted = Vec::new();
        for (key, at) in expired {
            let Some((service, url)) = split_timestamp_key(&key) else {
                warn!("Skipping malformed timestamp key {}", key);
                continue;
            };
            let instance = match InstanceMeta::from_url(url) {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("Skipping timestamp key {}: {}", key, e);
                    continue;
                }
            };

            info!("Instance {} of {} is down, last renew {}ms ago", url, service, now - at);
            if let Some(removed) = Self::remove_instance(state, service, instance) {
                evicted.push((service.to_string(), removed));
            }
            state.timestamps.remove(&key);
        }

        evicted
    }

    /// Deep copy of the whole store.
    ///
    /// Taken under the write guard so it serializes with mutations exactly
    /// like another writer would.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.write().await;
        state.clone()
    }

    /// Replace the whole store with a snapshot in one swap, returning the
    /// restored global version
    pub async fn restore(&self, snapshot: Snapshot) -> i64 {
        let mut state = self.state.write().await;
        let version = snapshot.version;
        *state = snapshot;
        info!("Restored registry snapshot at version {}", version);
        version
    }

    /// Take `instance` out of `service` and bump versions. `None` when the
    /// service has no instances; a known service without a match still bumps
    /// and hands back `instance` itself.
    fn remove_instance(
        state: &mut Snapshot,
        service: &str,
        instance: InstanceMeta,
    ) -> Option<InstanceMeta> {
        let instances = match state.registry.get_mut(service) {
            Some(instances) if !instances.is_empty() => instances,
            _ => return None,
        };

        let mut removed = match instances.iter().position(|m| *m == instance) {
            Some(index) => instances.remove(index),
            None => instance,
        };
        removed.status = false;
        Self::bump(state, service);

        Some(removed)
    }

    fn bump(state: &mut Snapshot, service: &str) {
        state.version += 1;
        let version = state.version;
        state.versions.insert(service.to_string(), version);
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn instance(port: u16) -> InstanceMeta {
        InstanceMeta::http("10.0.0.1", port)
    }

    #[tokio::test]
    async fn test_register_bumps_versions() {
        let store = RegistryStore::new();
        let registered = store.register("svc", instance(8080)).await;

        assert!(registered.status);
        assert_eq!(store.global_version().await, 1);
        assert_eq!(store.version("svc").await, Some(1));
        assert_eq!(store.get_all_instances("svc").await, vec![instance(8080)]);

        let timestamps = store.timestamps().await;
        assert!(timestamps.contains_key("svc@http://10.0.0.1:8080/rpcman"));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let store = RegistryStore::new();
        let first = store.register("svc", instance(8080)).await;
        let second = store.register("svc", instance(8080)).await;

        assert!(first.status);
        assert!(second.status);
        assert_eq!(store.version("svc").await, Some(1));
        assert_eq!(store.global_version().await, 1);
        assert_eq!(store.get_all_instances("svc").await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_keeps_insertion_order() {
        let store = RegistryStore::new();
        store.register("svc", instance(8082)).await;
        store.register("svc", instance(8080)).await;
        store.register("svc", instance(8081)).await;

        let ports: Vec<u16> = store
            .get_all_instances("svc")
            .await
            .iter()
            .map(|m| m.port)
            .collect();
        assert_eq!(ports, vec![8082, 8080, 8081]);
    }

    #[tokio::test]
    async fn test_unregister_removes_instance() {
        let store = RegistryStore::new();
        store.register("svc", instance(8080)).await;
        store.register("svc", instance(8081)).await;

        let removed = store.unregister("svc", instance(8080)).await.unwrap();
        assert!(!removed.status);
        assert_eq!(store.get_all_instances("svc").await, vec![instance(8081)]);
        assert_eq!(store.version("svc").await, Some(3));
        assert_eq!(store.global_version().await, 3);
    }

    #[tokio::test]
    async fn test_unregister_unknown_service_is_noop() {
        let store = RegistryStore::new();
        store.register("other", instance(8080)).await;

        assert!(store.unregister("svc", instance(8080)).await.is_none());
        assert_eq!(store.global_version().await, 1);
        assert_eq!(store.version("svc").await, None);
        assert_eq!(store.version("other").await, Some(1));
    }

    #[tokio::test]
    async fn test_unregister_unmatched_instance_bumps_versions() {
        let store = RegistryStore::new();
        store.register("svc", instance(8080)).await;

        let returned = store.unregister("svc", instance(9999)).await.unwrap();
        assert_eq!(returned, instance(9999));
        assert!(!returned.status);
        assert_eq!(store.get_all_instances("svc").await, vec![instance(8080)]);
        assert_eq!(store.version("svc").await, Some(2));
        assert_eq!(store.global_version().await, 2);
    }

    #[tokio::test]
    async fn test_evict_expired_uses_current_timestamps() {
        let store = RegistryStore::new();
        let stale = instance(8080);
        let fresh = instance(8081);
        store.register("svc", stale.clone()).await;
        store.register("svc", fresh.clone()).await;

        let mut snapshot = store.snapshot().await;
        snapshot.timestamps.insert(timestamp_key("svc", &stale), 1_000);
        snapshot.timestamps.insert(timestamp_key("svc", &fresh), 1_000);
        store.restore(snapshot).await;

        // renewed after the stale value was written, before the sweep
        let now = store.renew(&fresh, &["svc"]).await;

        let evicted = store.evict_expired(now, 20_000).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0], ("svc".to_string(), InstanceMeta { status: false, ..stale.clone() }));
        assert_eq!(store.get_all_instances("svc").await, vec![fresh.clone()]);

        let timestamps = store.timestamps().await;
        assert!(!timestamps.contains_key(&timestamp_key("svc", &stale)));
        assert_eq!(timestamps[&timestamp_key("svc", &fresh)], now);
        assert_eq!(store.global_version().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registered_instances_keep_timestamps_across_evictions() {
        let store = Arc::new(RegistryStore::new());

        let writers: Vec<_> = (0..8u16)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        store.register("svc", instance(8000 + n)).await;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        let sweeper = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..400 {
                    store.evict_expired(i64::MAX / 2, 0).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        sweeper.await.unwrap();

        let snapshot = store.snapshot().await;
        for meta in snapshot.registry.get("svc").into_iter().flatten() {
            assert!(snapshot.timestamps.contains_key(&timestamp_key("svc", meta)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_partial_restore() {
        async fn build(ports: std::ops::Range<u16>) -> Snapshot {
            let store = RegistryStore::new();
            for port in ports {
                store.register("svc", instance(port)).await;
            }
            store.snapshot().await
        }
        let small = build(8000..8002).await;
        let large = build(9000..9005).await;

        let store = Arc::new(RegistryStore::new());
        store.restore(small.clone()).await;

        let restorer = {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 0..500 {
                    let next = if round % 2 == 0 { large.clone() } else { small.clone() };
                    store.restore(next).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let instances = store.get_all_instances("svc").await;
                        let ports: Vec<u16> = instances.iter().map(|m| m.port).collect();
                        assert!(
                            ports == vec![8000, 8001] || ports == (9000..9005).collect::<Vec<_>>(),
                            "torn instance list {:?}",
                            ports
                        );

                        let version = store.version("svc").await;
                        assert!(matches!(version, Some(2) | Some(5)));

                        let view = store.snapshot().await;
                        let count = view.registry["svc"].len() as i64;
                        assert_eq!(view.versions["svc"], count);
                        assert_eq!(view.version, count);
                        assert_eq!(view.timestamps.len() as i64, count);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.await.unwrap();
        }
        restorer.await.unwrap();
    }

    #[tokio::test]
    async fn test_versions_are_monotonic() {
        let store = RegistryStore::new();
        let mut last_global = 0;
        let mut last_service = 0;

        for round in 0..5 {
            store.register("svc", instance(8080)).await;
            store.unregister("svc", instance(8080)).await;
            if round % 2 == 0 {
                store.register("svc", instance(8080)).await;
            }

            let global = store.global_version().await;
            let service = store.version("svc").await.unwrap();
            assert!(global >= last_global);
            assert!(service >= last_service);
            assert!(service <= global);
            last_global = global;
            last_service = service;
        }
    }

    #[tokio::test]
    async fn test_renew_does_not_bump_version() {
        let store = RegistryStore::new();
        let meta = instance(8080);
        store.register("a", meta.clone()).await;

        let at = store.renew(&meta, &["a", "b"]).await;
        let timestamps = store.timestamps().await;
        assert_eq!(timestamps["a@http://10.0.0.1:8080/rpcman"], at);
        assert_eq!(timestamps["b@http://10.0.0.1:8080/rpcman"], at);
        assert_eq!(store.global_version().await, 1);
    }

    #[tokio::test]
    async fn test_versions_omit_unknown() {
        let store = RegistryStore::new();
        store.register("a", instance(8080)).await;
        store.register("b", instance(8080)).await;

        let versions = store.versions(&["a", "b", "c"]).await;
        assert_eq!(versions.len(), 2);
        assert_eq!(versions["a"], 1);
        assert_eq!(versions["b"], 2);
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let store = RegistryStore::new();
        store.register("a", instance(8080)).await;
        store.register("b", instance(8081)).await;
        store.unregister("a", instance(8080)).await;

        let before = store.snapshot().await;
        let restored = store.restore(before.clone()).await;
        let after = store.snapshot().await;

        assert_eq!(restored, 3);
        assert_eq!(before, after);
        assert_eq!(store.global_version().await, 3);
    }

    #[tokio::test]
    async fn test_restore_replaces_everything() {
        let leader = RegistryStore::new();
        leader.register("svc", instance(8080)).await;

        let follower = RegistryStore::new();
        follower.register("stale", instance(9090)).await;
        follower.register("stale", instance(9091)).await;

        let version = follower.restore(leader.snapshot().await).await;
        assert_eq!(version, 1);
        assert!(follower.get_all_instances("stale").await.is_empty());
        assert_eq!(follower.version("stale").await, None);
        assert_eq!(follower.get_all_instances("svc").await, vec![instance(8080)]);
        assert_eq!(follower.timestamps().await, leader.timestamps().await);
    }
}
