//! Native notification buffer
//!
//! The OS writes notification records straight into this storage while a read
//! is pending, so the storage is DWORD aligned and never moves while prepared.
//! Processing works on an owned copy taken with [`NotificationBuffer::clone_bytes`]
//! once the read has completed.

use std::slice;

/// Smallest buffer that can hold one record: 12-byte header plus one UTF-16
/// unit, rounded up to the next DWORD
pub const MIN_RECORD_SIZE: usize = 16;

/// Errors copying data out of the buffer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Zero bytes means overflow and is handled before any copy
    #[error("a zero-byte completion has nothing to clone")]
    Empty,

    #[error("{requested} bytes requested from a {capacity}-byte buffer")]
    OutOfRange { requested: usize, capacity: usize },

    #[error("buffer has not been prepared")]
    Unprepared,

    #[error("could not allocate {0} bytes")]
    Alloc(usize),
}

/// Fixed-size storage the OS fills with notification records
#[derive(Debug)]
pub struct NotificationBuffer {
    /// Configured size in bytes
    size: usize,

    /// Backing words; `None` until prepared
    storage: Option<Box<[u32]>>,
}

impl NotificationBuffer {
    /// Create an unprepared buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self { size, storage: None }
    }

    /// (Re)allocate zeroed storage for the next read
    ///
    /// Must not be called while a read into this buffer is pending.
    pub fn prepare(&mut self) {
        let words = self.size.div_ceil(4);
        self.storage = Some(vec![0u32; words].into_boxed_slice());
    }

    /// Release the storage; a no-op on an already clear buffer
    pub fn clear(&mut self) {
        self.storage = None;
    }

    pub fn is_prepared(&self) -> bool {
        self.storage.is_some()
    }

    /// Usable bytes, 0 when unprepared
    pub fn capacity(&self) -> usize {
        if self.storage.is_some() {
            self.size
        } else {
            0
        }
    }

    /// Full storage as bytes, empty when unprepared
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            // SAFETY: the words are initialised, u8 has no alignment requirement
            // and `size` never exceeds `words * 4`.
            Some(words) => unsafe { slice::from_raw_parts(words.as_ptr().cast::<u8>(), self.size) },
            None => &[],
        }
    }

    /// Mutable storage as bytes, empty when unprepared
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        let size = self.size;
        match &mut self.storage {
            // SAFETY: as in `as_bytes`; the borrow is unique through `&mut self`.
            Some(words) => unsafe { slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), size) },
            None => &mut [],
        }
    }

    /// Copy the first `count` bytes delivered by a completed read
    ///
    /// The copy is allocated fallibly so an out-of-memory condition surfaces
    /// as [`BufferError::Alloc`] instead of aborting the worker.
    pub fn clone_bytes(&self, count: usize) -> Result<Vec<u8>, BufferError> {
        if count == 0 {
            return Err(BufferError::Empty);
        }
        if self.storage.is_none() {
            return Err(BufferError::Unprepared);
        }

        let bytes = self.as_bytes();
        if count > bytes.len() {
            return Err(BufferError::OutOfRange {
                requested: count,
                capacity: bytes.len(),
            });
        }

        let mut copy = Vec::new();
        copy.try_reserve_exact(count)
            .map_err(|_| BufferError::Alloc(count))?;
        copy.extend_from_slice(&bytes[..count]);
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_allocates_zeroed_aligned_storage() {
        let mut buffer = NotificationBuffer::new(1024);
        assert!(!buffer.is_prepared());
        assert_eq!(buffer.capacity(), 0);

        buffer.prepare();
        assert!(buffer.is_prepared());
        assert_eq!(buffer.capacity(), 1024);
        assert!(buffer.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(buffer.as_bytes().as_ptr() as usize % 4, 0);
    }

    #[test]
    fn test_prepare_resets_previous_content() {
        let mut buffer = NotificationBuffer::new(64);
        buffer.prepare();
        buffer.as_mut_bytes()[..4].copy_from_slice(&[1, 2, 3, 4]);

        buffer.prepare();
        assert_eq!(&buffer.as_bytes()[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_clone_copies_exact_prefix() {
        let mut buffer = NotificationBuffer::new(32);
        buffer.prepare();
        buffer.as_mut_bytes()[..5].copy_from_slice(b"hello");

        let copy = buffer.clone_bytes(5).unwrap();
        assert_eq!(copy, b"hello");

        // The copy is independent of later writes
        buffer.as_mut_bytes()[0] = b'j';
        assert_eq!(copy, b"hello");
    }

    #[test]
    fn test_clone_rejects_invalid_counts() {
        let mut buffer = NotificationBuffer::new(32);
        assert_eq!(buffer.clone_bytes(4), Err(BufferError::Unprepared));

        buffer.prepare();
        assert_eq!(buffer.clone_bytes(0), Err(BufferError::Empty));
        assert_eq!(
            buffer.clone_bytes(33),
            Err(BufferError::OutOfRange { requested: 33, capacity: 32 })
        );
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut buffer = NotificationBuffer::new(32);
        buffer.prepare();

        buffer.clear();
        buffer.clear();

        assert!(!buffer.is_prepared());
        assert!(buffer.as_bytes().is_empty());
        assert!(buffer.as_mut_bytes().is_empty());
    }

    #[test]
    fn test_odd_size_keeps_configured_length() {
        let mut buffer = NotificationBuffer::new(18);
        buffer.prepare();
        assert_eq!(buffer.as_bytes().len(), 18);
    }
}
