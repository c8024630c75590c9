use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::error::LoggerError;
use crate::stream::{Stream, StreamHandle};

/// Table of live streams, indexed by slot.
///
/// Opening a stream reserves a free slot and a fresh version number, then
/// publishes the stream into the slot. Producers resolve their handles with
/// [`lookup`](StreamRegistry::lookup), which takes only the read side of the
/// slot's own lock, so concurrent writers to different or even the same
/// stream never serialize on each other. Slots are written only when a
/// stream is published or released.
pub struct StreamRegistry {
    slots: Box<[RwLock<Option<Arc<Stream>>>]>,
    free: Mutex<Vec<usize>>,
    last_version: AtomicU64,
    live: AtomicUsize,
}

/// A reserved, not yet published slot. Dropping it returns the slot.
pub struct Reservation<'a> {
    registry: &'a StreamRegistry,
    slot: usize,
    version: u64,
    published: bool,
}

impl StreamRegistry {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| RwLock::new(None)).collect::<Vec<_>>();
        // Lowest slots are handed out first.
        let free = (0..capacity).rev().collect();
        Self {
            slots: slots.into_boxed_slice(),
            free: Mutex::new(free),
            last_version: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of published streams.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves a free slot and assigns it a new version number.
    ///
    /// # Errors
    ///
    /// `LoggerError::RegistryFull` if all slots are taken.
    pub fn reserve_slot(&self) -> Result<Reservation<'_>, LoggerError> {
        let slot = self
            .free
            .lock()
            .pop()
            .ok_or(LoggerError::RegistryFull { capacity: self.capacity() })?;
        let version = self.last_version.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Reservation { registry: self, slot, version, published: false })
    }

    /// Resolves a handle to its stream if the handle is still current and
    /// the stream still accepts commands.
    pub fn lookup(&self, handle: &StreamHandle) -> Option<Arc<Stream>> {
        self.lookup_any(handle).filter(|s| s.is_open())
    }

    /// Like [`lookup`](Self::lookup) but also returns streams that are
    /// closing and not yet released.
    pub fn lookup_any(&self, handle: &StreamHandle) -> Option<Arc<Stream>> {
        let slot = self.slots.get(handle.slot())?;
        let guard = slot.read();
        guard
            .as_ref()
            .filter(|s| s.info().version() == handle.version())
            .cloned()
    }

    /// Removes the stream named by `handle` and frees its slot.
    ///
    /// Returns `None` if the slot already holds a different version.
    pub fn release_slot(&self, handle: &StreamHandle) -> Option<Arc<Stream>> {
        let slot = self.slots.get(handle.slot())?;
        let stream = {
            let mut guard = slot.write();
            let current = guard
                .as_ref()
                .is_some_and(|s| s.info().version() == handle.version());
            if current {
                guard.take()
            } else {
                None
            }
        }?;
        stream.mark_released();
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().push(handle.slot());
        Some(stream)
    }

    /// Snapshot of every published stream.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.slots.iter().filter_map(|slot| slot.read().clone()).collect()
    }
}

impl<'a> Reservation<'a> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(self.slot, self.version)
    }

    /// Makes `stream` visible to lookups. The stream must have been built
    /// from this reservation's slot and version.
    pub fn publish(mut self, stream: Arc<Stream>) -> StreamHandle {
        debug_assert_eq!(stream.handle(), self.handle());
        *self.registry.slots[self.slot].write() = Some(stream);
        self.registry.live.fetch_add(1, Ordering::AcqRel);
        self.published = true;
        self.handle()
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.registry.free.lock().push(self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::writer_fn;
    use crate::stream::StreamInfo;

    fn publish(registry: &StreamRegistry, name: &str) -> StreamHandle {
        let reservation = registry.reserve_slot().unwrap();
        let info = StreamInfo::new(name, reservation.slot(), reservation.version());
        let writer = writer_fn(|_, _, _| Ok(0));
        reservation.publish(Arc::new(Stream::new(info, Box::new(writer), 8)))
    }

    #[test]
    fn test_lowest_slot_first() {
        let registry = StreamRegistry::new(4);
        assert_eq!(publish(&registry, "a").slot(), 0);
        assert_eq!(publish(&registry, "b").slot(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_dropped_reservation_returns_slot() {
        let registry = StreamRegistry::new(1);
        {
            let _reservation = registry.reserve_slot().unwrap();
            assert!(matches!(
                registry.reserve_slot(),
                Err(LoggerError::RegistryFull { capacity: 1 })
            ));
        }
        assert!(registry.reserve_slot().is_ok());
    }

    #[test]
    fn test_release_only_matching_version() {
        let registry = StreamRegistry::new(2);
        let handle = publish(&registry, "a");
        let stale = StreamHandle::new(handle.slot(), handle.version() + 100);
        assert!(registry.release_slot(&stale).is_none());
        let released = registry.release_slot(&handle).unwrap();
        assert!(released.is_released());
        assert!(registry.is_empty());
        assert!(registry.release_slot(&handle).is_none());
    }
}
