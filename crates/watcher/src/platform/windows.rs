//! `ReadDirectoryChangesW` reader
//!
//! Reads are issued with an overlapped control block and a completion
//! routine. Windows queues the routine as an APC to the thread that issued
//! the read and runs it only while that thread is in an alertable wait, which
//! is what [`DirectoryReader::wait`] does through `SleepEx`.

use super::{Completion, DirectoryReader};
use crate::buffer::NotificationBuffer;
use dirwatch_core::NotifyFilter;
use std::cell::Cell;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_NOTIFY_ENUM_DIR, ERROR_OPERATION_ABORTED, ERROR_SUCCESS, HANDLE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED,
    FILE_LIST_DIRECTORY, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::SleepEx;
use windows_sys::Win32::System::IO::{CancelIo, OVERLAPPED};

/// Upper bound on draining a cancelled read while closing
const CLOSE_DRAIN: Duration = Duration::from_secs(5);

/// Control block plus the slot the completion routine fills in
///
/// Heap allocated so its address stays fixed while a read is pending; the
/// overlapped `hEvent` field carries that address back to the routine.
struct ReadSlot {
    overlapped: OVERLAPPED,
    completion: Cell<Option<Completion>>,
}

/// Directory handle opened for overlapped change notification
pub struct ReadDirectoryReader {
    root: PathBuf,
    handle: HANDLE,
    slot: *mut ReadSlot,
    pending: bool,
}

// The handle and slot are only touched from the worker thread that owns the
// reader; moving the reader to that thread before the first read is fine.
unsafe impl Send for ReadDirectoryReader {}

impl ReadDirectoryReader {
    fn handle_is_open(&self) -> bool {
        self.handle != INVALID_HANDLE_VALUE && self.handle != 0
    }

    /// Alertable sleep, then pick up whatever the routine stored
    fn sleep_alertable(&mut self, timeout: Duration) -> Option<Completion> {
        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        unsafe {
            SleepEx(millis, 1);
            (*self.slot).completion.take()
        }
    }
}

impl DirectoryReader for ReadDirectoryReader {
    fn open(root: &Path) -> io::Result<Self> {
        let wide: Vec<u16> = root.as_os_str().encode_wide().chain(Some(0)).collect();

        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        let slot = Box::into_raw(Box::new(ReadSlot {
            overlapped: unsafe { std::mem::zeroed() },
            completion: Cell::new(None),
        }));

        Ok(Self {
            root: root.to_path_buf(),
            handle,
            slot,
            pending: false,
        })
    }

    fn is_valid(&self) -> bool {
        self.handle_is_open() && self.root.is_dir()
    }

    unsafe fn begin_read(
        &mut self,
        buffer: &mut NotificationBuffer,
        recursive: bool,
        filter: NotifyFilter,
    ) -> io::Result<()> {
        if !self.handle_is_open() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "directory handle is closed"));
        }
        if self.pending {
            return Err(io::Error::new(io::ErrorKind::Other, "a read is already pending"));
        }

        let bytes = buffer.as_mut_bytes();
        let slot = self.slot;
        (*slot).overlapped = std::mem::zeroed();
        // With a completion routine the event member is free for our own use
        (*slot).overlapped.hEvent = slot as HANDLE;
        (*slot).completion.set(None);

        let ok = ReadDirectoryChangesW(
            self.handle,
            bytes.as_mut_ptr().cast(),
            bytes.len() as u32,
            i32::from(recursive),
            filter.bits(),
            ptr::null_mut(),
            ptr::addr_of_mut!((*slot).overlapped),
            Some(on_read_complete),
        );
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }

        self.pending = true;
        Ok(())
    }

    fn wait(&mut self, _buffer: &mut NotificationBuffer, timeout: Duration) -> Option<Completion> {
        let completion = self.sleep_alertable(timeout)?;
        self.pending = false;
        Some(completion)
    }

    fn cancel(&mut self) {
        if self.pending && self.handle_is_open() {
            unsafe {
                CancelIo(self.handle);
            }
        }
    }

    fn close(&mut self) {
        if !self.handle_is_open() {
            return;
        }

        if self.pending {
            self.cancel();
            let deadline = Instant::now() + CLOSE_DRAIN;
            while self.pending && Instant::now() < deadline {
                if self.sleep_alertable(Duration::from_millis(50)).is_some() {
                    self.pending = false;
                }
            }
            if self.pending {
                warn!("Cancelled read on {} never completed", self.root.display());
            }
        }

        unsafe {
            CloseHandle(self.handle);
        }
        self.handle = INVALID_HANDLE_VALUE;
        debug!("Closed directory handle for {}", self.root.display());
    }
}

impl Drop for ReadDirectoryReader {
    fn drop(&mut self) {
        self.close();
        // A read that never completed may still reference the slot; leak it
        // rather than free memory the OS could write to
        if !self.pending {
            unsafe {
                drop(Box::from_raw(self.slot));
            }
        }
    }
}

unsafe extern "system" fn on_read_complete(error_code: u32, bytes: u32, overlapped: *mut OVERLAPPED) {
    let slot = (*overlapped).hEvent as *const ReadSlot;
    let completion = match error_code {
        ERROR_SUCCESS => Completion::success(bytes as usize),
        ERROR_OPERATION_ABORTED => Completion::aborted(),
        // The change set was too large to describe; same as an empty delivery
        ERROR_NOTIFY_ENUM_DIR => Completion::success(0),
        other => Completion::failed(other),
    };
    (*slot).completion.set(Some(completion));
}
