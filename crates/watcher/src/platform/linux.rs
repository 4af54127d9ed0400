//! inotify-based reader
//!
//! inotify has no notion of a pending read, so the reader emulates one: an
//! armed read is satisfied by the next batch of kernel events, which is
//! translated into notification records written into the caller's buffer.
//!
//! - `IN_MOVED_FROM` / `IN_MOVED_TO` become the two rename halves
//! - `IN_Q_OVERFLOW`, or a batch that does not fit the buffer, completes
//!   with zero bytes (overflow)
//! - Recursive watches register one inotify watch per directory and report
//!   names relative to the watch root

use super::{Completion, DirectoryReader};
use crate::buffer::NotificationBuffer;
use crate::decoder::{RecordAction, RecordWriter};
use dirwatch_core::NotifyFilter;
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Size of the raw inotify read buffer
const EVENT_BUFFER_SIZE: usize = 8192;

/// `ENOENT`, reported when the watched root disappears
const ROOT_GONE_CODE: u32 = 2;

/// One kernel event, detached from the read buffer
#[derive(Debug, Clone)]
struct RawEvent {
    wd: WatchDescriptor,
    mask: EventMask,
    cookie: u32,
    name: Option<OsString>,
}

/// Emulated asynchronous reader over an inotify instance
pub struct InotifyReader {
    root: PathBuf,
    inotify: Option<Inotify>,

    /// Watched directories, relative to `root` (empty for the root itself)
    dirs: HashMap<WatchDescriptor, PathBuf>,
    root_wd: Option<WatchDescriptor>,

    /// Scope and filter the current watches were registered with
    registered: Option<(bool, NotifyFilter)>,

    /// A read is armed and has not completed yet
    pending: bool,

    /// `cancel` was called for the pending read
    cancelled: bool,

    /// The kernel reported the root deleted, moved or unwatched
    root_gone: bool,

    events: Vec<u8>,
}

impl InotifyReader {
    fn recursive(&self) -> bool {
        matches!(self.registered, Some((true, _)))
    }

    fn filter(&self) -> NotifyFilter {
        self.registered
            .map(|(_, filter)| filter)
            .unwrap_or_default()
    }

    /// (Re)register watches unless they already match `recursive` and `filter`
    fn register(&mut self, recursive: bool, filter: NotifyFilter) -> io::Result<()> {
        if self.registered == Some((recursive, filter)) {
            return Ok(());
        }

        let inotify = self.inotify.as_mut().ok_or_else(closed)?;
        for (wd, _) in self.dirs.drain() {
            let _ = inotify.watches().remove(wd);
        }

        self.registered = Some((recursive, filter));
        let root_wd = match self.add_watch(Path::new("")) {
            Ok(wd) => wd,
            Err(e) => {
                self.registered = None;
                return Err(e);
            }
        };
        self.root_wd = Some(root_wd);
        if recursive {
            self.watch_tree(Path::new(""));
        }

        debug!(
            "Registered {} inotify watch(es) under {}",
            self.dirs.len(),
            self.root.display()
        );
        Ok(())
    }

    fn add_watch(&mut self, rel: &Path) -> io::Result<WatchDescriptor> {
        let mask = watch_mask(self.filter(), self.recursive());
        let inotify = self.inotify.as_mut().ok_or_else(closed)?;
        let wd = inotify.watches().add(self.root.join(rel), mask)?;
        self.dirs.insert(wd.clone(), rel.to_path_buf());
        Ok(wd)
    }

    /// Everything strictly below `rel`, parents before children, with
    /// whether each entry is a directory
    fn scan(&self, rel: &Path) -> Vec<(PathBuf, bool)> {
        WalkDir::new(self.root.join(rel))
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let sub = entry.path().strip_prefix(&self.root).ok()?.to_path_buf();
                Some((sub, entry.file_type().is_dir()))
            })
            .collect()
    }

    /// Watch every directory strictly below `rel`
    fn watch_tree(&mut self, rel: &Path) -> Vec<(PathBuf, bool)> {
        let entries = self.scan(rel);
        for (sub, _) in entries.iter().filter(|(_, is_dir)| *is_dir) {
            if let Err(e) = self.add_watch(sub) {
                debug!("Could not watch {}: {}", sub.display(), e);
            }
        }
        entries
    }

    /// A directory was added to the tree, by creation or by moving it in
    ///
    /// Returns the entries already inside it. Anything created there before
    /// the new watch took effect never produces a kernel event.
    fn watch_new_dir(&mut self, rel: &Path) -> Vec<(PathBuf, bool)> {
        match self.add_watch(rel) {
            Ok(_) => self.watch_tree(rel),
            Err(e) => {
                debug!("Could not watch new directory {}: {}", rel.display(), e);
                Vec::new()
            }
        }
    }

    /// A watched directory moved within the tree; rewrite stored paths
    fn rebase(&mut self, old: &Path, new: &Path) {
        for dir in self.dirs.values_mut() {
            if let Ok(rest) = dir.strip_prefix(old) {
                *dir = new.join(rest);
            }
        }
    }

    /// A watched directory left the tree; stop watching it
    fn forget(&mut self, old: &Path) {
        let stale: Vec<WatchDescriptor> = self
            .dirs
            .iter()
            .filter(|(_, dir)| dir.starts_with(old))
            .map(|(wd, _)| wd.clone())
            .collect();

        for wd in stale {
            self.dirs.remove(&wd);
            if let Some(inotify) = self.inotify.as_mut() {
                let _ = inotify.watches().remove(wd);
            }
        }
    }

    /// Drain one batch of kernel events without blocking
    fn read_batch(&mut self) -> io::Result<(Vec<RawEvent>, bool)> {
        let inotify = self.inotify.as_mut().ok_or_else(closed)?;
        let events = match inotify.read_events(&mut self.events) {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((Vec::new(), false)),
            Err(e) => return Err(e),
        };

        let mut overflow = false;
        let mut batch = Vec::new();
        for event in events {
            if event.mask.contains(EventMask::Q_OVERFLOW) {
                overflow = true;
                continue;
            }
            batch.push(RawEvent {
                wd: event.wd,
                mask: event.mask,
                cookie: event.cookie,
                name: event.name.map(|n| n.to_os_string()),
            });
        }
        Ok((batch, overflow))
    }

    /// Block until the inotify descriptor is readable or `timeout` passes
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let inotify = self.inotify.as_ref().ok_or_else(closed)?;
        let mut fd = libc::pollfd {
            fd: inotify.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // Round up so a sub-millisecond remainder still blocks
        let millis = timeout.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `fd` is one valid pollfd that outlives the call
        let ready = unsafe { libc::poll(&mut fd, 1, millis) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(ready > 0)
    }

    /// Turn a batch of kernel events into records, maintaining watches
    fn translate(&mut self, batch: Vec<RawEvent>) -> Vec<(RecordAction, String)> {
        let filter = self.filter();
        let recursive = self.recursive();
        let mut records = Vec::new();
        let mut moved_dirs: HashMap<u32, PathBuf> = HashMap::new();

        for event in batch {
            let is_root = self.root_wd.as_ref() == Some(&event.wd);
            if event.mask.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF | EventMask::IGNORED) {
                if is_root {
                    if !self.root_gone {
                        warn!("Watched root {} went away", self.root.display());
                    }
                    self.root_gone = true;
                } else if event.mask.contains(EventMask::IGNORED) {
                    self.dirs.remove(&event.wd);
                }
                continue;
            }

            let (Some(dir), Some(name)) = (self.dirs.get(&event.wd), event.name.as_ref()) else {
                continue;
            };
            let rel = dir.join(name);
            let is_dir = event.mask.contains(EventMask::ISDIR);
            let name_flag = if is_dir {
                NotifyFilter::DIR_NAME
            } else {
                NotifyFilter::FILE_NAME
            };
            let reports_names = filter.contains(name_flag);
            let text = rel.to_string_lossy().into_owned();
            trace!("inotify {:?} {}", event.mask, text);

            if event.mask.contains(EventMask::CREATE) {
                let inside = if is_dir && recursive {
                    self.watch_new_dir(&rel)
                } else {
                    Vec::new()
                };
                if reports_names {
                    records.push((RecordAction::Added, text));
                }
                for (sub, sub_is_dir) in inside {
                    let flag = if sub_is_dir {
                        NotifyFilter::DIR_NAME
                    } else {
                        NotifyFilter::FILE_NAME
                    };
                    if filter.contains(flag) {
                        records.push((RecordAction::Added, sub.to_string_lossy().into_owned()));
                    }
                }
            } else if event.mask.contains(EventMask::DELETE) {
                if reports_names {
                    records.push((RecordAction::Removed, text));
                }
            } else if event.mask.contains(EventMask::MOVED_FROM) {
                if is_dir && recursive {
                    moved_dirs.insert(event.cookie, rel);
                }
                if reports_names {
                    records.push((RecordAction::RenamedOld, text));
                }
            } else if event.mask.contains(EventMask::MOVED_TO) {
                if is_dir && recursive {
                    match moved_dirs.remove(&event.cookie) {
                        Some(old) => self.rebase(&old, &rel),
                        None => {
                            self.watch_new_dir(&rel);
                        }
                    }
                }
                if reports_names {
                    records.push((RecordAction::RenamedNew, text));
                }
            } else if event.mask.intersects(EventMask::MODIFY | EventMask::ATTRIB | EventMask::ACCESS) {
                records.push((RecordAction::Modified, text));
            }
        }

        for old in moved_dirs.into_values() {
            self.forget(&old);
        }
        records
    }
}

impl DirectoryReader for InotifyReader {
    fn open(root: &Path) -> io::Result<Self> {
        if !fs::metadata(root)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        // Fail early on permission problems; watches are added when the first
        // read is armed and the filter is known
        fs::read_dir(root)?;

        Ok(Self {
            root: root.to_path_buf(),
            inotify: Some(Inotify::init()?),
            dirs: HashMap::new(),
            root_wd: None,
            registered: None,
            pending: false,
            cancelled: false,
            root_gone: false,
            events: vec![0u8; EVENT_BUFFER_SIZE],
        })
    }

    fn is_valid(&self) -> bool {
        self.inotify.is_some() && !self.root_gone && self.root.is_dir()
    }

    unsafe fn begin_read(
        &mut self,
        _buffer: &mut NotificationBuffer,
        recursive: bool,
        filter: NotifyFilter,
    ) -> io::Result<()> {
        if !self.is_valid() {
            return Err(closed());
        }
        self.register(recursive, filter)?;
        self.pending = true;
        self.cancelled = false;
        Ok(())
    }

    fn wait(&mut self, buffer: &mut NotificationBuffer, timeout: Duration) -> Option<Completion> {
        if !self.pending {
            thread::sleep(timeout);
            return None;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.cancelled {
                self.pending = false;
                self.cancelled = false;
                return Some(Completion::aborted());
            }

            let (batch, mut overflow) = match self.read_batch() {
                Ok(read) => read,
                Err(e) => {
                    warn!("inotify read failed: {}", e);
                    self.pending = false;
                    return Some(Completion::failed(e.raw_os_error().unwrap_or(0) as u32));
                }
            };

            let records = self.translate(batch);
            let mut writer = RecordWriter::new(buffer.as_mut_bytes());
            for (action, name) in &records {
                if !writer.push(*action, name) {
                    overflow = true;
                    break;
                }
            }

            if overflow {
                self.pending = false;
                return Some(Completion::success(0));
            }
            if !writer.is_empty() {
                self.pending = false;
                return Some(Completion::success(writer.len()));
            }
            if self.root_gone {
                self.pending = false;
                return Some(Completion::failed(ROOT_GONE_CODE));
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if let Err(e) = self.wait_readable(deadline - now) {
                warn!("Waiting on inotify failed: {}", e);
                self.pending = false;
                return Some(Completion::failed(e.raw_os_error().unwrap_or(0) as u32));
            }
        }
    }

    fn cancel(&mut self) {
        if self.pending {
            self.cancelled = true;
        }
    }

    fn close(&mut self) {
        if let Some(inotify) = self.inotify.take() {
            if let Err(e) = inotify.close() {
                debug!("Closing inotify instance failed: {}", e);
            }
        }
        self.dirs.clear();
        self.root_wd = None;
        self.registered = None;
        self.pending = false;
        self.cancelled = false;
    }
}

impl Drop for InotifyReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Kernel mask for a filter
///
/// Name events are always requested in recursive mode so new directories can
/// be picked up even when the caller does not want them reported.
fn watch_mask(filter: NotifyFilter, recursive: bool) -> WatchMask {
    let mut mask = WatchMask::DELETE_SELF | WatchMask::MOVE_SELF | WatchMask::ONLYDIR;

    if recursive || filter.intersects(NotifyFilter::FILE_NAME | NotifyFilter::DIR_NAME) {
        mask |= WatchMask::CREATE | WatchMask::DELETE | WatchMask::MOVED_FROM | WatchMask::MOVED_TO;
    }
    if filter.intersects(NotifyFilter::SIZE | NotifyFilter::LAST_WRITE) {
        mask |= WatchMask::MODIFY;
    }
    if filter.intersects(NotifyFilter::ATTRIBUTES | NotifyFilter::CREATION | NotifyFilter::SECURITY) {
        mask |= WatchMask::ATTRIB;
    }
    if filter.contains(NotifyFilter::LAST_ACCESS) {
        mask |= WatchMask::ACCESS;
    }
    mask
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "watched directory is no longer available")
}
