// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted output buffer pool.
//!
//! A fixed array of buffers handed to consumers outside the ring discipline.
//! [`BufferPool::acquire`] scans for the first slot with no outstanding
//! references and returns an RAII handle; cloning the handle adds a
//! reference, dropping one releases it, and a slot whose count reaches zero
//! becomes eligible for reuse. Exhaustion is a reported condition - the
//! caller sees `None` and must treat it as backpressure, never as
//! corruption.
//!
//! The scan is O(n) under a single mutex. Acquisitions happen at most once
//! per frame, so contention is bounded by the frame rate and the simple
//! layout wins over a lock-free design.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Fixed array of reference-counted, reusable buffers.
pub struct BufferPool<T> {
    name: &'static str,
    slots: Box<[UnsafeCell<T>]>,
    refs: Mutex<Box<[u32]>>,
}

// Safety: a slot is only mutated through `PoolBuffer::get_mut`, which
// verifies the caller holds the sole reference; all other access is shared
// and read-only while at least one reference exists. Handles expose `&T`
// from any thread, so `T: Sync` is required alongside `T: Send`.
unsafe impl<T: Send> Send for BufferPool<T> {}
unsafe impl<T: Send + Sync> Sync for BufferPool<T> {}

impl<T> BufferPool<T> {
    /// A pool of `slots` buffers, each built by `init`. The name labels log
    /// lines when the pool runs dry.
    pub fn new(name: &'static str, slots: usize, mut init: impl FnMut() -> T) -> Arc<Self> {
        Arc::new(Self {
            name,
            slots: (0..slots)
                .map(|_| UnsafeCell::new(init()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            refs: Mutex::new(vec![0; slots].into_boxed_slice()),
        })
    }

    /// Finds the first free slot, takes a reference on it and returns it.
    ///
    /// Returns `None` (after logging) if every slot is referenced; callers
    /// treat this as backpressure and drop or wait.
    pub fn acquire(self: &Arc<Self>) -> Option<PoolBuffer<T>> {
        let mut refs = self.refs.lock().unwrap();
        match refs.iter().position(|&count| count == 0) {
            Some(index) => {
                refs[index] = 1;
                Some(PoolBuffer {
                    pool: self.clone(),
                    index,
                })
            }
            None => {
                warn!(pool = self.name, slots = self.slots.len(), "no free output buffer");
                None
            }
        }
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots with no outstanding references.
    pub fn available(&self) -> usize {
        self.refs
            .lock()
            .unwrap()
            .iter()
            .filter(|&&count| count == 0)
            .count()
    }

    fn add_ref(&self, index: usize) {
        let mut refs = self.refs.lock().unwrap();
        refs[index] += 1;
    }

    fn release(&self, index: usize) {
        let mut refs = self.refs.lock().unwrap();
        if refs[index] == 0 {
            // Not reachable through the handle API; kept as a guard against
            // refcount accounting bugs.
            warn!(pool = self.name, index, "release of an unreferenced slot");
            return;
        }
        refs[index] -= 1;
    }

    fn ref_count(&self, index: usize) -> u32 {
        self.refs.lock().unwrap()[index]
    }
}

/// A referenced slot in a [`BufferPool`].
///
/// Clone to add a reference, drop to release one. The slot is reusable once
/// every handle to it has been dropped.
pub struct PoolBuffer<T> {
    pool: Arc<BufferPool<T>>,
    index: usize,
}

impl<T> PoolBuffer<T> {
    /// Stable slot id within the pool.
    pub fn slot_index(&self) -> usize {
        self.index
    }

    /// Mutable access to the buffer.
    ///
    /// # Panics
    ///
    /// Panics if other references to this slot exist; fill the buffer before
    /// handing out clones.
    pub fn get_mut(&mut self) -> &mut T {
        assert_eq!(
            self.pool.ref_count(self.index),
            1,
            "mutable access to a shared pool buffer"
        );
        // Safety: sole reference verified above; no other handle can read or
        // write this slot until a clone is made.
        unsafe { &mut *self.pool.slots[self.index].get() }
    }
}

impl<T> Deref for PoolBuffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: shared read access; mutation requires the sole reference.
        unsafe { &*self.pool.slots[self.index].get() }
    }
}

impl<T> Clone for PoolBuffer<T> {
    fn clone(&self) -> Self {
        self.pool.add_ref(self.index);
        Self {
            pool: self.pool.clone(),
            index: self.index,
        }
    }
}

impl<T> Drop for PoolBuffer<T> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn acquire_and_release_cycle_slots() {
        let pool = BufferPool::new("video", 4, || vec![0u8; 16]);
        assert_eq!(pool.available(), 4);

        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            assert_eq!(pool.available(), 2);
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn exhaustion_reports_none() {
        let pool = BufferPool::new("video", 2, || 0u32);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn acquire_never_returns_referenced_slot() {
        let pool = BufferPool::new("video", 3, || 0u32);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        let held: Vec<usize> = [&a, &b, &c].iter().map(|h| h.slot_index()).collect();
        drop(b);
        let d = pool.acquire().unwrap();
        assert_eq!(d.slot_index(), held[1]);
        assert_ne!(d.slot_index(), a.slot_index());
        assert_ne!(d.slot_index(), c.slot_index());
    }

    #[test]
    fn clone_holds_slot_until_last_drop() {
        let pool = BufferPool::new("video", 1, || 0u32);
        let first = pool.acquire().unwrap();
        let second = first.clone();
        drop(first);
        assert!(pool.acquire().is_none());
        drop(second);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn fill_then_share() {
        let pool = BufferPool::new("video", 1, || vec![0u8; 4]);
        let mut buf = pool.acquire().unwrap();
        buf.get_mut().copy_from_slice(&[1, 2, 3, 4]);
        let shared = buf.clone();
        assert_eq!(&shared[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn concurrent_acquire_release_respects_capacity() {
        let pool = BufferPool::new("video", 8, || 0u32);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                let mut held = Vec::new();
                for _ in 0..100 {
                    if let Some(buf) = pool.acquire() {
                        held.push(buf);
                    }
                    if held.len() > 2 {
                        held.clear();
                    }
                }
                held.len()
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total <= 8);
        drop(pool);
    }
}
