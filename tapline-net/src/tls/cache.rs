use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::{LeafCertificate, TlsError};

type Slot = Arc<Mutex<Option<LeafCertificate>>>;

/// Leaf certificates keyed by hostname, kept until `clear`.
///
/// Each hostname owns a slot guarded by its own mutex, so concurrent first
/// lookups for one host run the generator once while other hosts proceed.
#[derive(Debug, Default)]
pub struct CertCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl CertCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str) -> Option<LeafCertificate> {
        let slot = self.slots().get(host).cloned()?;
        let cached = lock(&slot).clone();
        cached
    }

    pub fn get_or_try_insert_with<F>(
        &self,
        host: &str,
        generate: F,
    ) -> Result<LeafCertificate, TlsError>
    where
        F: FnOnce() -> Result<LeafCertificate, TlsError>,
    {
        let slot = Arc::clone(self.slots().entry(host.to_string()).or_default());

        let mut entry = lock(&slot);
        if let Some(cert) = entry.as_ref() {
            return Ok(cert.clone());
        }
        let cert = generate()?;
        *entry = Some(cert.clone());
        Ok(cert)
    }

    pub fn clear(&self) {
        self.slots().clear();
    }

    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| lock(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        lock(&self.slots)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::CertCache;
    use crate::tls::types::{LeafCertificate, TlsError, TlsErrorKind};

    fn leaf(tag: &str) -> LeafCertificate {
        LeafCertificate {
            cert_pem: tag.as_bytes().to_vec(),
            key_pem: b"key".to_vec(),
        }
    }

    #[test]
    fn returns_cached_entry_without_regenerating() {
        let cache = CertCache::new();
        let first = cache
            .get_or_try_insert_with("example.com", || Ok(leaf("one")))
            .unwrap();
        let second = cache
            .get_or_try_insert_with("example.com", || Ok(leaf("two")))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.get("example.com"), Some(leaf("one")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_generation_leaves_slot_empty() {
        let cache = CertCache::new();
        let err = cache
            .get_or_try_insert_with("example.com", || {
                Err(TlsError::new(TlsErrorKind::Rcgen, "boom"))
            })
            .unwrap_err();
        assert_eq!(err.kind, TlsErrorKind::Rcgen);
        assert!(cache.get("example.com").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_drops_entries() {
        let cache = CertCache::new();
        cache
            .get_or_try_insert_with("a.test", || Ok(leaf("a")))
            .unwrap();
        cache.clear();
        assert!(cache.get("a.test").is_none());
    }

    #[test]
    fn concurrent_first_use_generates_once() {
        let cache = Arc::new(CertCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_try_insert_with("race.test", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(leaf("race"))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), leaf("race"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
