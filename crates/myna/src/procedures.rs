//! Stored-procedure metadata cache.
//!
//! Calling a procedure needs its parameter shape, which costs a server
//! metadata query. The cache bounds that cost: a hit ("soft" lookup)
//! reuses the descriptor, a miss ("hard" lookup) runs the metadata query
//! and inserts. When full, the oldest inserted entry is evicted first.
//! Concurrent population resolves last-writer-wins under the cache lock;
//! no partial entry is ever visible.

use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::types::TypeCode;

/// Direction of one procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
    /// The function return value slot
    Return,
}

impl ParamDirection {
    /// Parse the catalog's `PARAMETER_MODE` column; NULL means the return
    /// value row of a function.
    pub fn from_catalog(mode: Option<&str>) -> Self {
        match mode {
            Some(m) if m.eq_ignore_ascii_case("out") => ParamDirection::Out,
            Some(m) if m.eq_ignore_ascii_case("inout") => ParamDirection::InOut,
            Some(_) => ParamDirection::In,
            None => ParamDirection::Return,
        }
    }
}

/// One parameter of a stored procedure, in declaration order.
#[derive(Debug, Clone)]
pub struct ProcParam {
    pub name: String,
    pub direction: ParamDirection,
    pub type_code: TypeCode,
    pub unsigned: bool,
}

/// Cached metadata for one stored procedure or function.
#[derive(Debug, Clone)]
pub struct StoredProcedure {
    pub schema: String,
    pub name: String,
    /// Whether the routine is a function with a return value
    pub returns_value: bool,
    pub parameters: Vec<ProcParam>,
}

/// Signature of a procedure lookup: name plus parameter shape.
pub fn signature(schema: &str, name: &str, param_count: usize, returns_value: bool) -> u64 {
    let mut hasher = DefaultHasher::new();
    schema.hash(&mut hasher);
    name.hash(&mut hasher);
    param_count.hash(&mut hasher);
    returns_value.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<u64, Arc<StoredProcedure>>,
    /// Insertion order for FIFO eviction
    order: VecDeque<u64>,
}

/// Bounded FIFO cache of procedure descriptors, safe to share across
/// threads.
#[derive(Debug)]
pub struct ProcedureCache {
    max_size: usize,
    inner: Mutex<CacheInner>,
}

impl ProcedureCache {
    /// Create a cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Soft lookup: reuse a cached descriptor.
    pub fn get(&self, signature: u64) -> Option<Arc<StoredProcedure>> {
        let inner = self.inner.lock().expect("procedure cache lock");
        inner.entries.get(&signature).cloned()
    }

    /// Insert a freshly loaded descriptor, evicting the oldest surviving
    /// entries while over capacity. A racing insert for the same signature
    /// wins by being last: the stored entry is whichever call ran latest.
    pub fn insert(&self, signature: u64, procedure: StoredProcedure) -> Arc<StoredProcedure> {
        let procedure = Arc::new(procedure);
        let mut inner = self.inner.lock().expect("procedure cache lock");
        if inner.entries.insert(signature, Arc::clone(&procedure)).is_none() {
            inner.order.push_back(signature);
        }
        while inner.entries.len() > self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                    tracing::debug!(signature = oldest, "evicted procedure cache entry");
                }
                None => break,
            }
        }
        procedure
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("procedure cache lock").entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("procedure cache lock");
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedure(name: &str) -> StoredProcedure {
        StoredProcedure {
            schema: "test".to_string(),
            name: name.to_string(),
            returns_value: false,
            parameters: vec![ProcParam {
                name: "p".to_string(),
                direction: ParamDirection::In,
                type_code: TypeCode::Long,
                unsigned: false,
            }],
        }
    }

    #[test]
    fn soft_and_hard_lookup() {
        let cache = ProcedureCache::new(4);
        let sig = signature("test", "get_user", 1, false);
        assert!(cache.get(sig).is_none());

        cache.insert(sig, procedure("get_user"));
        let hit = cache.get(sig).unwrap();
        assert_eq!(hit.name, "get_user");
    }

    #[test]
    fn fifo_eviction_bounds_size() {
        let cache = ProcedureCache::new(3);
        let sigs: Vec<u64> = (0..5)
            .map(|i| signature("test", &format!("p{i}"), i, false))
            .collect();
        for (i, sig) in sigs.iter().enumerate() {
            cache.insert(*sig, procedure(&format!("p{i}")));
            assert!(cache.len() <= 3);
        }
        // The two oldest entries were evicted, the three newest survive.
        assert!(cache.get(sigs[0]).is_none());
        assert!(cache.get(sigs[1]).is_none());
        assert!(cache.get(sigs[2]).is_some());
        assert!(cache.get(sigs[3]).is_some());
        assert!(cache.get(sigs[4]).is_some());
    }

    #[test]
    fn reinsert_same_signature_replaces() {
        let cache = ProcedureCache::new(2);
        let sig = signature("test", "p", 0, false);
        cache.insert(sig, procedure("old"));
        cache.insert(sig, procedure("new"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(sig).unwrap().name, "new");
    }

    #[test]
    fn signature_distinguishes_shapes() {
        let a = signature("db", "p", 1, false);
        let b = signature("db", "p", 2, false);
        let c = signature("db", "p", 1, true);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn direction_from_catalog() {
        assert_eq!(ParamDirection::from_catalog(Some("IN")), ParamDirection::In);
        assert_eq!(ParamDirection::from_catalog(Some("OUT")), ParamDirection::Out);
        assert_eq!(
            ParamDirection::from_catalog(Some("INOUT")),
            ParamDirection::InOut
        );
        assert_eq!(ParamDirection::from_catalog(None), ParamDirection::Return);
    }
}
