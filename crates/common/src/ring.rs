//! Fixed-record ring buffer
//!
//! Bounded circular store of fixed-size byte records shared between one
//! producer and one consumer per channel direction. All operations are O(1)
//! (one record copy at most) and never block on the buffer being full or
//! empty; only the short internal lock is taken.
//!
//! The most recently inserted record is retained even after it has been
//! consumed, so [`RingBuffer::get_last`] can peek at the latest state without
//! disturbing the FIFO.
//!
//! # Example
//!
//! ```
//! use hidlink_common::ring::{PutOutcome, RingBuffer};
//!
//! let ring = RingBuffer::new(4, 2);
//! assert_eq!(ring.put(&[1, 2]).unwrap(), PutOutcome::Stored);
//! assert_eq!(ring.try_put_if_changed(&[1, 2]).unwrap(), PutOutcome::Duplicate);
//!
//! let mut out = [0u8; 2];
//! ring.get(&mut out).unwrap();
//! assert_eq!(out, [1, 2]);
//! assert!(ring.is_empty());
//!
//! // The last record survives consumption
//! ring.get_last(&mut out).unwrap();
//! assert_eq!(out, [1, 2]);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Result of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored in a free slot
    Stored,
    /// Stored by discarding the oldest queued record
    Overwrote,
    /// Identical to the last inserted record; nothing stored
    Duplicate,
    /// No free slot; nothing stored
    Full,
}

impl PutOutcome {
    /// Whether the record is now queued
    pub fn inserted(self) -> bool {
        matches!(self, PutOutcome::Stored | PutOutcome::Overwrote)
    }
}

/// Ring buffer status errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("Record too short: expected {expected} bytes, got {actual}")]
    RecordTooShort { expected: usize, actual: usize },

    #[error("Destination too short: expected {expected} bytes, got {actual}")]
    DestinationTooShort { expected: usize, actual: usize },

    #[error("Ring buffer is empty")]
    Empty,

    #[error("No record has been inserted yet")]
    NoLastRecord,
}

struct Slots {
    data: Vec<u8>,
    /// Slot of the oldest queued record
    head: usize,
    /// Number of queued records
    len: usize,
    /// Slot of the most recent insert, kept after consumption
    last: Option<usize>,
}

/// Fixed-capacity circular store of fixed-length records
pub struct RingBuffer {
    capacity: usize,
    record_len: usize,
    slots: Mutex<Slots>,
}

impl RingBuffer {
    /// Create a ring of `capacity` slots holding `record_len` bytes each
    ///
    /// # Panics
    /// Panics if either dimension is zero.
    pub fn new(capacity: usize, record_len: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        assert!(record_len > 0, "ring buffer record length must be non-zero");

        Self {
            capacity,
            record_len,
            slots: Mutex::new(Slots {
                data: vec![0; capacity * record_len],
                head: 0,
                len: 0,
                last: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Number of queued records
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// True iff no records are queued (the retained last record does not count)
    pub fn is_empty(&self) -> bool {
        self.lock().len == 0
    }

    /// Unconditional insert; overwrites the oldest record when full
    pub fn put(&self, record: &[u8]) -> Result<PutOutcome, RingError> {
        let record = self.check_record(record)?;
        let mut slots = self.lock();
        Ok(self.insert(&mut slots, record))
    }

    /// Insert only if `record` differs from the most recent insert
    ///
    /// Overwrites the oldest record when full, like [`RingBuffer::put`].
    pub fn try_put_if_changed(&self, record: &[u8]) -> Result<PutOutcome, RingError> {
        let record = self.check_record(record)?;
        let mut slots = self.lock();
        if let Some(last) = slots.last {
            if self.slot(&slots, last) == record {
                return Ok(PutOutcome::Duplicate);
            }
        }
        Ok(self.insert(&mut slots, record))
    }

    /// Insert only if a slot is free; never overwrites
    pub fn try_put(&self, record: &[u8]) -> Result<PutOutcome, RingError> {
        let record = self.check_record(record)?;
        let mut slots = self.lock();
        if slots.len == self.capacity {
            return Ok(PutOutcome::Full);
        }
        Ok(self.insert(&mut slots, record))
    }

    /// Remove the oldest record into `dest`
    pub fn get(&self, dest: &mut [u8]) -> Result<(), RingError> {
        let dest = self.check_dest(dest)?;
        let mut slots = self.lock();
        if slots.len == 0 {
            return Err(RingError::Empty);
        }
        let head = slots.head;
        dest.copy_from_slice(self.slot(&slots, head));
        slots.head = (head + 1) % self.capacity;
        slots.len -= 1;
        Ok(())
    }

    /// Copy the most recent insert into `dest` without consuming anything
    pub fn get_last(&self, dest: &mut [u8]) -> Result<(), RingError> {
        let dest = self.check_dest(dest)?;
        let slots = self.lock();
        let last = slots.last.ok_or(RingError::NoLastRecord)?;
        dest.copy_from_slice(self.slot(&slots, last));
        Ok(())
    }

    fn insert(&self, slots: &mut Slots, record: &[u8]) -> PutOutcome {
        let outcome = if slots.len == self.capacity {
            // Full: drop the oldest by advancing head
            slots.head = (slots.head + 1) % self.capacity;
            slots.len -= 1;
            PutOutcome::Overwrote
        } else {
            PutOutcome::Stored
        };

        let tail = (slots.head + slots.len) % self.capacity;
        let start = tail * self.record_len;
        slots.data[start..start + self.record_len].copy_from_slice(record);
        slots.len += 1;
        slots.last = Some(tail);
        outcome
    }

    fn slot<'a>(&self, slots: &'a Slots, index: usize) -> &'a [u8] {
        let start = index * self.record_len;
        &slots.data[start..start + self.record_len]
    }

    fn check_record<'a>(&self, record: &'a [u8]) -> Result<&'a [u8], RingError> {
        if record.len() < self.record_len {
            return Err(RingError::RecordTooShort {
                expected: self.record_len,
                actual: record.len(),
            });
        }
        Ok(&record[..self.record_len])
    }

    fn check_dest<'a>(&self, dest: &'a mut [u8]) -> Result<&'a mut [u8], RingError> {
        if dest.len() < self.record_len {
            return Err(RingError::DestinationTooShort {
                expected: self.record_len,
                actual: dest.len(),
            });
        }
        Ok(&mut dest[..self.record_len])
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("record_len", &self.record_len)
            .field("len", &self.len())
            .finish()
    }
}
