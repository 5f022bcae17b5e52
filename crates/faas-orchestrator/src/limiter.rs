use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

#[derive(Debug)]
struct Slot {
    semaphore: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            in_flight: AtomicUsize::new(0),
        }
    }

    async fn acquire(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => {
                // Returned explicitly through `release`.
                permit.forget();
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    fn release(&self, function: &str) {
        if self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            panic!("admission release for {function} without a matching admit");
        }
        self.semaphore.add_permits(1);
    }
}

/// Bounds in-flight requests per function.
///
/// Each function gets one counting semaphore, created on first use with the
/// capacity configured at that moment. Capacity changes never resize an
/// existing semaphore.
#[derive(Debug)]
pub struct AdmissionLimiter {
    default_capacity: AtomicUsize,
    overrides: DashMap<String, usize>,
    slots: DashMap<String, Arc<Slot>>,
}

impl AdmissionLimiter {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity: AtomicUsize::new(default_capacity),
            overrides: DashMap::new(),
            slots: DashMap::new(),
        }
    }

    fn capacity_for(&self, function: &str) -> usize {
        self.overrides
            .get(function)
            .map(|limit| *limit)
            .unwrap_or_else(|| self.default_capacity.load(Ordering::SeqCst))
    }

    fn slot(&self, function: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(function) {
            return slot.clone();
        }
        let capacity = self.capacity_for(function);
        self.slots
            .entry(function.to_string())
            .or_insert_with(|| {
                debug!(%function, capacity, "Creating admission semaphore");
                Arc::new(Slot::new(capacity))
            })
            .clone()
    }

    /// Waits up to `timeout` for capacity. On `true` the caller owes exactly
    /// one [`release`](Self::release).
    pub async fn try_admit(&self, function: &str, timeout: Duration) -> bool {
        self.slot(function).acquire(timeout).await
    }

    /// Like [`try_admit`](Self::try_admit) but hands back a guard that releases
    /// on drop.
    pub async fn admit(&self, function: &str, timeout: Duration) -> Option<AdmissionPermit> {
        let slot = self.slot(function);
        if slot.acquire(timeout).await {
            Some(AdmissionPermit {
                function: function.to_string(),
                slot,
            })
        } else {
            None
        }
    }

    /// # Panics
    ///
    /// Panics when no admission is outstanding for `function`. An unpaired
    /// release means the accounting is already corrupt.
    pub fn release(&self, function: &str) {
        match self.slots.get(function) {
            Some(slot) => slot.release(function),
            None => panic!("admission release for {function} without a matching admit"),
        }
    }

    pub fn current_count(&self, function: &str) -> usize {
        self.slots
            .get(function)
            .map(|slot| slot.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Capacity of the semaphore in use, or the one that would be created.
    pub fn capacity(&self, function: &str) -> usize {
        self.slots
            .get(function)
            .map(|slot| slot.capacity)
            .unwrap_or_else(|| self.capacity_for(function))
    }

    /// Takes effect only if `function` has not been admitted yet.
    pub fn set_capacity(&self, function: &str, limit: usize) {
        if self.slots.contains_key(function) {
            debug!(%function, limit, "Admission semaphore exists, new capacity applies after restart");
        }
        self.overrides.insert(function.to_string(), limit);
    }

    pub fn set_default_capacity(&self, limit: usize) {
        self.default_capacity.store(limit, Ordering::SeqCst);
    }
}

/// Outstanding admission; releases when dropped.
#[must_use = "dropping the permit releases the admission immediately"]
#[derive(Debug)]
pub struct AdmissionPermit {
    function: String,
    slot: Arc<Slot>,
}

impl AdmissionPermit {
    pub fn function(&self) -> &str {
        &self.function
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.slot.release(&self.function);
    }
}
