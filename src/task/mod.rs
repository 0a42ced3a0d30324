// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//! Task and TaskInfo data model, plus the bandwidth backlog and global
//! stats types the task manager maintains.

pub mod manager;

use crate::backend::SharedBackend;
use crate::errors::ErrorCode;
use crate::job::ProcessCredentials;
use crate::resource::ResourceInfo;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

/// `Copy/Move/Remove/RemoteTransfer/Noop/Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TaskKind {
    Copy,
    Move,
    Remove,
    RemoteTransfer,
    Noop,
    Unknown,
}

/// `Pending -> Running -> {Finished, FinishedWithError}`; no reverse
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    FinishedWithError,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::FinishedWithError)
    }
}

/// Mutable progress fields, guarded by `TaskInfo`'s own reader-writer lock:
/// shared for stats reads, exclusive for updates.
#[derive(Debug, Clone)]
struct Progress {
    status: TaskStatus,
    task_error: ErrorCode,
    sys_errno: i32,
    total_bytes: u64,
    sent_bytes: u64,
    bandwidth: f64,
}

impl Default for Progress {
    fn default() -> Progress {
        Progress {
            status: TaskStatus::Pending,
            task_error: ErrorCode::Success,
            sys_errno: 0,
            total_bytes: 0,
            sent_bytes: 0,
            bandwidth: f64::NAN,
        }
    }
}

/// An opaque, move-only handle to the continuation of an in-flight RPC.
/// Owned exclusively by the active transferor until its completion callback
/// fires; only restored into `TaskInfo.context` on rollback paths.
pub struct RpcContext(pub Box<dyn std::any::Any + Send>);

/// `task_stats`: a point-in-time snapshot of a task's progress.
#[derive(Debug, Clone, Copy)]
pub struct TaskStats {
    pub status: TaskStatus,
    pub total_bytes: u64,
    pub pending_bytes: u64,
    pub task_error: ErrorCode,
    pub sys_errno: i32,
}

/// An admitted I/O request with a lifecycle and accounting.
pub struct TaskInfo {
    pub id: u64,
    pub kind: TaskKind,
    pub is_remote_initiated: bool,
    pub credentials: ProcessCredentials,
    pub src_backend: SharedBackend,
    pub src_info: ResourceInfo,
    pub dst_backend: SharedBackend,
    pub dst_info: ResourceInfo,
    pub context: Mutex<Option<RpcContext>>,
    progress: RwLock<Progress>,
}

impl TaskInfo {
    pub fn new(
        id: u64, kind: TaskKind, is_remote_initiated: bool, credentials: ProcessCredentials,
        src_backend: SharedBackend, src_info: ResourceInfo, dst_backend: SharedBackend, dst_info: ResourceInfo,
        total_bytes: u64,
    ) -> TaskInfo {
        let mut progress = Progress::default();
        progress.total_bytes = total_bytes;

        TaskInfo {
            id,
            kind,
            is_remote_initiated,
            credentials,
            src_backend,
            src_info,
            dst_backend,
            dst_info,
            context: Mutex::new(None),
            progress: RwLock::new(progress),
        }
    }

    fn progress(&self) -> std::sync::RwLockReadGuard<'_, Progress> {
        self.progress.read().expect("task progress lock poisoned")
    }

    fn progress_mut(&self) -> std::sync::RwLockWriteGuard<'_, Progress> {
        self.progress.write().expect("task progress lock poisoned")
    }

    pub fn status(&self) -> TaskStatus { self.progress().status }

    pub fn total_bytes(&self) -> u64 { self.progress().total_bytes }

    pub fn sent_bytes(&self) -> u64 { self.progress().sent_bytes }

    pub fn bandwidth(&self) -> f64 { self.progress().bandwidth }

    /// `Pending -> Running`. Called by the worker thread on closure entry.
    pub fn mark_running(&self) {
        let mut progress = self.progress_mut();
        debug_assert_eq!(progress.status, TaskStatus::Pending);
        progress.status = TaskStatus::Running;
    }

    /// Records bytes sent so far; never lets `sent_bytes` exceed
    /// `total_bytes`, clamping instead of panicking since a directory's
    /// `total_bytes` starts out unknown (0) until packed.
    pub fn add_sent_bytes(&self, n: u64) {
        let mut progress = self.progress_mut();
        progress.sent_bytes = progress.sent_bytes.saturating_add(n);
        if progress.total_bytes != 0 && progress.sent_bytes > progress.total_bytes {
            progress.sent_bytes = progress.total_bytes;
        }
    }

    pub fn set_total_bytes(&self, total: u64) { self.progress_mut().total_bytes = total; }

    pub fn set_bandwidth(&self, mib_per_sec: f64) { self.progress_mut().bandwidth = mib_per_sec; }

    /// `Running -> {Finished, FinishedWithError}`.
    pub fn finish(&self, task_error: ErrorCode, sys_errno: i32) {
        let mut progress = self.progress_mut();
        progress.status = if task_error.is_success() { TaskStatus::Finished } else { TaskStatus::FinishedWithError };
        progress.task_error = task_error;
        progress.sys_errno = sys_errno;
    }

    pub fn stats(&self) -> TaskStats {
        let progress = self.progress();
        let pending_bytes = if progress.total_bytes == 0 {
            0
        } else {
            progress.total_bytes.saturating_sub(progress.sent_bytes)
        };

        TaskStats {
            status: progress.status,
            total_bytes: progress.total_bytes,
            pending_bytes,
            task_error: progress.task_error,
            sys_errno: progress.sys_errno,
        }
    }
}

/// `(src_nsid, dst_nsid) -> bounded ring buffer<f64>` of MiB/s samples.
pub struct BandwidthBacklog {
    capacity: usize,
    samples: RwLock<HashMap<(String, String), VecDeque<f64>>>,
}

impl BandwidthBacklog {
    pub fn new(capacity: usize) -> BandwidthBacklog {
        BandwidthBacklog { capacity: capacity.max(1), samples: RwLock::new(HashMap::new()) }
    }

    pub fn record(&self, src_nsid: &str, dst_nsid: &str, sample: f64) {
        if !sample.is_finite() {
            return;
        }

        let mut samples = self.samples.write().expect("bandwidth backlog poisoned");
        let key = (src_nsid.to_owned(), dst_nsid.to_owned());
        let ring = samples.entry(key).or_insert_with(VecDeque::new);
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// Average MiB/s for `(src_nsid, dst_nsid)`, or `None` if the backlog is
    /// empty for that key. Averaged over this pair's own buffer, not across
    /// the whole map, so a slow cross-node pull doesn't drag down the ETA
    /// for a fast local copy running at the same time.
    pub fn average(&self, src_nsid: &str, dst_nsid: &str) -> Option<f64> {
        let samples = self.samples.read().expect("bandwidth backlog poisoned");
        let ring = samples.get(&(src_nsid.to_owned(), dst_nsid.to_owned()))?;
        if ring.is_empty() {
            return None;
        }
        Some(ring.iter().sum::<f64>() / ring.len() as f64)
    }
}

/// `{running, pending, eta_seconds}`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GlobalStats {
    pub running: u32,
    pub pending: u32,
    pub eta_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_forward_only() {
        use crate::backend::{FilesystemFlavor, PosixFilesystemBackend};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let backend: SharedBackend =
            Arc::new(PosixFilesystemBackend::new("ns0", FilesystemFlavor::Posix, dir.path(), None).unwrap());

        let task = TaskInfo::new(
            1,
            TaskKind::Copy,
            false,
            ProcessCredentials { uid: 0, gid: 0, pid: 0 },
            backend.clone(),
            ResourceInfo::local_path("ns0", "a"),
            backend,
            ResourceInfo::local_path("ns0", "b"),
            100,
        );

        assert_eq!(task.status(), TaskStatus::Pending);
        task.mark_running();
        assert_eq!(task.status(), TaskStatus::Running);
        task.finish(ErrorCode::Success, 0);
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn sent_bytes_never_exceeds_total() {
        use crate::backend::{FilesystemFlavor, PosixFilesystemBackend};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let backend: SharedBackend =
            Arc::new(PosixFilesystemBackend::new("ns0", FilesystemFlavor::Posix, dir.path(), None).unwrap());

        let task = TaskInfo::new(
            1,
            TaskKind::Copy,
            false,
            ProcessCredentials { uid: 0, gid: 0, pid: 0 },
            backend.clone(),
            ResourceInfo::local_path("ns0", "a"),
            backend,
            ResourceInfo::local_path("ns0", "b"),
            100,
        );

        task.add_sent_bytes(1000);
        assert_eq!(task.sent_bytes(), 100);
    }

    #[test]
    fn bandwidth_backlog_is_bounded_and_averages_per_key() {
        let backlog = BandwidthBacklog::new(2);
        backlog.record("ns0", "ns1", 10.0);
        backlog.record("ns0", "ns1", 20.0);
        backlog.record("ns0", "ns1", 30.0);
        assert_eq!(backlog.average("ns0", "ns1"), Some(25.0));
        assert_eq!(backlog.average("ns1", "ns0"), None);
    }
}
