//! Bounded buffer of records waiting for delivery.
//!
//! Appends and swaps happen inside short synchronous critical sections, so a
//! record is either in the batch that was swapped out or in the next
//! generation of the buffer, never both and never neither.
use crate::types::Record;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct RecordBuffer {
    records: Mutex<Vec<Record>>,
    max_size: usize,
}

impl RecordBuffer {
    /// Creates a new `RecordBuffer`.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Length at which `push` swaps the contents out.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            records: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    /// Appends a record.
    ///
    /// Returns the swapped-out batch when this append made the buffer reach
    /// its maximum size; the buffer is empty again when this returns `Some`.
    pub fn push(&self, record: Record) -> Option<Vec<Record>> {
        let mut records = self.lock();
        records.push(record);
        if records.len() >= self.max_size {
            Some(std::mem::replace(
                &mut *records,
                Vec::with_capacity(self.max_size),
            ))
        } else {
            None
        }
    }

    /// Swaps the current contents out and leaves the buffer empty.
    pub fn take(&self) -> Vec<Record> {
        let mut records = self.lock();
        if records.is_empty() {
            return Vec::new();
        }
        std::mem::replace(&mut *records, Vec::with_capacity(self.max_size))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
