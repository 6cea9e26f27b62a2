//! In-process registry of loaded modules
//!
//! Modules are keyed by registration name (`{base}_{key}`), so one
//! source built under two base names gives two modules. Each name gets
//! its own slot guarded by its own mutex, so concurrent
//! callers asking for the same key wait for the first one to finish
//! loading instead of building again, while unrelated keys never contend.
//! Entries live as long as the registry; there is no eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot<M> = Arc<Mutex<Option<Arc<M>>>>;

/// Registry of loaded modules keyed by registration name
pub struct ProcessRegistry<M> {
    slots: Mutex<HashMap<String, Slot<M>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside a loader leaves the slot empty, which is a valid state
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M> ProcessRegistry<M> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Slot<M> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Module already loaded under `key`, if any
    ///
    /// Waits while another caller is loading the same key.
    pub fn get(&self, key: &str) -> Option<Arc<M>> {
        let slot = {
            let slots = lock(&self.slots);
            slots.get(key).cloned()
        }?;
        let loaded = lock(&slot);
        loaded.clone()
    }

    /// Return the module for `key`, calling `load` on a miss
    ///
    /// With `refresh` set the existing entry is ignored and replaced by
    /// whatever `load` returns. `load` receives `true` when it replaces a
    /// module that is already loaded. A failed load leaves the previous
    /// entry (if any) in place.
    pub fn get_or_insert_with<E, F>(&self, key: &str, refresh: bool, load: F) -> Result<Arc<M>, E>
    where
        F: FnOnce(bool) -> Result<M, E>,
    {
        let slot = self.slot(key);
        let mut loaded = lock(&slot);

        if !refresh {
            if let Some(module) = loaded.as_ref() {
                return Ok(Arc::clone(module));
            }
        }

        let module = Arc::new(load(loaded.is_some())?);
        *loaded = Some(Arc::clone(&module));
        Ok(module)
    }

    /// Whether a module is loaded under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of loaded modules
    pub fn len(&self) -> usize {
        let slots: Vec<Slot<M>> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    /// Whether no module is loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M> Default for ProcessRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn key(c: char) -> String {
        format!("demo_{}", c.to_string().repeat(32))
    }

    #[test]
    fn miss_then_hit() {
        let registry = ProcessRegistry::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let module = registry
                .get_or_insert_with(&key('a'), false, |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("loaded".to_string())
                })
                .unwrap();
            assert_eq!(*module, "loaded");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.contains(&key('a')));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_load_not_cached() {
        let registry: ProcessRegistry<String> = ProcessRegistry::new();

        let err = registry
            .get_or_insert_with(&key('b'), false, |_| Err("compile error".to_string()))
            .unwrap_err();
        assert_eq!(err, "compile error");
        assert!(registry.get(&key('b')).is_none());
        assert!(registry.is_empty());

        let module = registry
            .get_or_insert_with(&key('b'), false, |_| Ok::<_, String>("ok".to_string()))
            .unwrap();
        assert_eq!(*module, "ok");
    }

    #[test]
    fn refresh_replaces_entry() {
        let registry = ProcessRegistry::new();
        registry
            .get_or_insert_with(&key('c'), false, |replacing| {
                assert!(!replacing);
                Ok::<_, String>(1)
            })
            .unwrap();

        let fresh = registry
            .get_or_insert_with(&key('c'), true, |replacing| {
                assert!(replacing);
                Ok::<_, String>(2)
            })
            .unwrap();
        assert_eq!(*fresh, 2);
        assert_eq!(*registry.get(&key('c')).unwrap(), 2);
    }

    #[test]
    fn concurrent_callers_load_once() {
        let registry = Arc::new(ProcessRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    registry
                        .get_or_insert_with(&key('d'), false, |_| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(30));
                            Ok::<_, String>(7)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(*handle.join().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let registry = ProcessRegistry::new();
        registry
            .get_or_insert_with(&key('e'), false, |_| Ok::<_, String>("e"))
            .unwrap();
        registry
            .get_or_insert_with(&key('f'), false, |_| Ok::<_, String>("f"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(*registry.get(&key('e')).unwrap(), "e");
        assert_eq!(*registry.get(&key('f')).unwrap(), "f");
    }
}
