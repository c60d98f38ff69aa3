//! Entity registry: identity for dynamically created entities.
//!
//! Entities born at runtime (an accepted connection, a socket created on
//! request) are given an id from [`EntityRegistry::next_id`] and registered
//! under it. Ids are process-wide: no two registries hand out the same one. The entity removes itself when it is disposed or its channel
//! closes, so a registered id always names a live entity.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Registry-assigned entity identifier.
pub type EntityId = u64;

/// A live proxied entity.
pub trait Entity: Send + Sync + 'static {
    fn id(&self) -> EntityId;

    /// Entity kind, e.g. `"tcp_socket"`.
    fn kind(&self) -> &'static str;

    /// Release the entity's resources. Must be idempotent.
    fn dispose(&self);
}

/// Next id to hand out, shared by every registry in the process.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct RegistryInner {
    entities: RwLock<HashMap<EntityId, Arc<dyn Entity>>>,
}

/// Thread-safe map from id to live entity. Clones share the same map.
#[derive(Clone)]
pub struct EntityRegistry {
    inner: Arc<RegistryInner>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entities: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Allocate a fresh id, never handed out before in this process.
    pub fn next_id(&self) -> EntityId {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Register an entity under `id`.
    ///
    /// Returns `false` and leaves the existing entry in place if the id is
    /// already taken.
    pub fn register(&self, id: EntityId, entity: Arc<dyn Entity>) -> bool {
        let mut entities = self.inner.entities.write().unwrap_or_else(|e| e.into_inner());
        if entities.contains_key(&id) {
            warn!(id, kind = entity.kind(), "Entity id already registered");
            return false;
        }
        debug!(id, kind = entity.kind(), "Entity registered");
        entities.insert(id, entity);
        true
    }

    pub fn lookup(&self, id: EntityId) -> Option<Arc<dyn Entity>> {
        let entities = self.inner.entities.read().unwrap_or_else(|e| e.into_inner());
        entities.get(&id).cloned()
    }

    /// Remove an entity. A second call for the same id is a no-op.
    pub fn unregister(&self, id: EntityId) -> Option<Arc<dyn Entity>> {
        let mut entities = self.inner.entities.write().unwrap_or_else(|e| e.into_inner());
        let removed = entities.remove(&id);
        if let Some(ref entity) = removed {
            debug!(id, kind = entity.kind(), "Entity unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner
            .entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all live entities of a kind.
    pub fn ids_of_kind(&self, kind: &str) -> Vec<EntityId> {
        let entities = self.inner.entities.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<EntityId> = entities
            .iter()
            .filter(|(_, e)| e.kind() == kind)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Dispose and remove every entity. Returns how many were disposed.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<Arc<dyn Entity>> = {
            let mut entities = self.inner.entities.write().unwrap_or_else(|e| e.into_inner());
            entities.drain().map(|(_, e)| e).collect()
        };
        // Dispose outside the lock: entities unregister themselves.
        for entity in &drained {
            entity.dispose();
        }
        drained.len()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("live", &self.len())
            .field("next_id", &NEXT_ID.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Dummy {
        id: EntityId,
        kind: &'static str,
        disposed: AtomicUsize,
    }

    impl Dummy {
        fn new(id: EntityId, kind: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                kind,
                disposed: AtomicUsize::new(0),
            })
        }
    }

    impl Entity for Dummy {
        fn id(&self) -> EntityId {
            self.id
        }
        fn kind(&self) -> &'static str {
            self.kind
        }
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = EntityRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(registry.next_id()));
        }
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let registry = EntityRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = registry.clone();
                std::thread::spawn(move || (0..250).map(|_| r.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<EntityId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_ids_unique_across_registries() {
        let first = EntityRegistry::new();
        let second = EntityRegistry::new();
        let a = first.next_id();
        let b = second.next_id();
        let c = first.next_id();
        assert_ne!(a, b);
        assert!(a < c && b != c);
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = EntityRegistry::new();
        let id = registry.next_id();
        registry.register(id, Dummy::new(id, "tcp_socket"));

        let found = registry.lookup(id).unwrap();
        assert_eq!(found.id(), id);
        assert_eq!(found.kind(), "tcp_socket");

        assert!(registry.unregister(id).is_some());
        assert!(registry.lookup(id).is_none());
        // Second unregister is a no-op.
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = EntityRegistry::new();
        let id = registry.next_id();
        assert!(registry.register(id, Dummy::new(id, "a")));
        assert!(!registry.register(id, Dummy::new(id, "b")));
        assert_eq!(registry.lookup(id).unwrap().kind(), "a");
    }

    #[test]
    fn test_ids_of_kind() {
        let registry = EntityRegistry::new();
        for kind in ["tcp_socket", "udp_socket", "tcp_socket"] {
            let id = registry.next_id();
            registry.register(id, Dummy::new(id, kind));
        }
        assert_eq!(registry.ids_of_kind("tcp_socket"), vec![1, 3]);
        assert_eq!(registry.ids_of_kind("http_server"), Vec::<EntityId>::new());
    }

    #[test]
    fn test_dispose_all() {
        let registry = EntityRegistry::new();
        let a = Dummy::new(registry.next_id(), "a");
        let b = Dummy::new(registry.next_id(), "b");
        registry.register(a.id, a.clone());
        registry.register(b.id, b.clone());

        assert_eq!(registry.dispose_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(a.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(b.disposed.load(Ordering::SeqCst), 1);
    }
}
