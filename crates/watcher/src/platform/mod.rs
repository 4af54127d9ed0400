//! Platform-specific directory notification readers
//!
//! Each backend opens a directory for asynchronous change notification and
//! delivers read completions on the thread that armed the read. Records are
//! always left in the buffer in the layout described in [`crate::decoder`].

use crate::buffer::NotificationBuffer;
use dirwatch_core::NotifyFilter;
use std::io;
use std::path::Path;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(windows)]
pub mod windows;

/// Reader used by [`crate::WatchLoop`] on this platform
#[cfg(target_os = "linux")]
pub type NativeReader = linux::InotifyReader;

/// Reader used by [`crate::WatchLoop`] on this platform
#[cfg(windows)]
pub type NativeReader = windows::ReadDirectoryReader;

/// How a pending read ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Records (or an overflow, when no bytes came back) were delivered
    Success,

    /// The read was cancelled
    Aborted,

    /// Any other OS error code
    Failed(u32),
}

/// Outcome of one armed read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: CompletionStatus,

    /// Bytes written into the buffer; 0 on success means overflow
    pub bytes: usize,
}

impl Completion {
    pub fn success(bytes: usize) -> Self {
        Self { status: CompletionStatus::Success, bytes }
    }

    pub fn aborted() -> Self {
        Self { status: CompletionStatus::Aborted, bytes: 0 }
    }

    pub fn failed(code: u32) -> Self {
        Self { status: CompletionStatus::Failed(code), bytes: 0 }
    }
}

/// Asynchronous change reads against one open directory
///
/// Every method is called from the single worker thread that owns the
/// reader, except `open`, which may run on the thread starting the watch.
pub trait DirectoryReader: Send + Sized + 'static {
    /// Open `root` for asynchronous change notification
    fn open(root: &Path) -> io::Result<Self>;

    /// False once the OS handle is closed or the watched root went away
    fn is_valid(&self) -> bool;

    /// Arm one read into `buffer`
    ///
    /// # Safety
    ///
    /// The OS may write into `buffer`'s storage until [`wait`](Self::wait)
    /// returns a completion for this read or [`close`](Self::close) returns.
    /// Until then the caller must not prepare, clear, read or drop the buffer.
    unsafe fn begin_read(
        &mut self,
        buffer: &mut NotificationBuffer,
        recursive: bool,
        filter: NotifyFilter,
    ) -> io::Result<()>;

    /// Wait up to `timeout` for the pending read to complete
    ///
    /// Returns `None` if nothing completed in time or no read is pending.
    fn wait(&mut self, buffer: &mut NotificationBuffer, timeout: Duration) -> Option<Completion>;

    /// Request cancellation of the pending read; its completion reports
    /// [`CompletionStatus::Aborted`]
    fn cancel(&mut self);

    /// Release the OS handle; idempotent
    fn close(&mut self);
}
