//! Storage test doubles.

use fieldsync_storage::{StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// An in-memory backend that fails on demand.
///
/// Clones share bytes and fault switches, so a test can keep one handle
/// while a journal owns the other.
#[derive(Clone, Default)]
pub(crate) struct FaultyBackend {
    data: Arc<Mutex<Vec<u8>>>,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Faults {
    fail_sync: AtomicBool,
    fail_flush: AtomicBool,
    /// Bytes of the next append that land before it fails; zero is off.
    tear_next_append: AtomicUsize,
}

impl FaultyBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every `sync` fail.
    pub(crate) fn set_fail_sync(&self, fail: bool) {
        self.faults.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Makes every `flush` fail.
    pub(crate) fn set_fail_flush(&self, fail: bool) {
        self.faults.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Writes only `keep` bytes of the next append, then fails it.
    pub(crate) fn tear_next_append(&self, keep: usize) {
        self.faults.tear_next_append.store(keep, Ordering::SeqCst);
    }

    /// A copy of the stored bytes.
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn simulated(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("simulated {what} failure")))
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.lock();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.lock();
        let offset = data.len() as u64;
        let keep = self.faults.tear_next_append.swap(0, Ordering::SeqCst);
        if keep > 0 {
            data.extend_from_slice(&bytes[..keep.min(bytes.len())]);
            return Err(Self::simulated("write"));
        }
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.faults.fail_flush.load(Ordering::SeqCst) {
            return Err(Self::simulated("flush"));
        }
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(Self::simulated("sync"));
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.lock();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
