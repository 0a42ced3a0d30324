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
//! Task manager: admits requests as tasks, dispatches
//! them onto the worker pool, and answers status/ETA queries.

use super::{BandwidthBacklog, GlobalStats, TaskInfo, TaskKind, TaskStats};
use crate::backend::{ProcessMemoryBackend, RemoteBackend, SharedBackend};
use crate::errors::{Error, ErrorCode, Result};
use crate::job::ProcessCredentials;
use crate::namespace::NamespaceRegistry;
use crate::resource::{ResourceInfo, ResourceKind};
use crate::transferor::TransferorRegistry;
use crate::worker_pool::WorkerPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

fn resolve_backend(namespaces: &NamespaceRegistry, info: &ResourceInfo) -> Result<SharedBackend> {
    match info.kind {
        ResourceKind::Remote => Ok(Arc::new(RemoteBackend::new(info.nsid.clone()))),
        ResourceKind::MemoryRegion if info.nsid.is_empty() => Ok(Arc::new(ProcessMemoryBackend::new(""))),
        _ => namespaces.lookup(&info.nsid).ok_or_else(|| Error::new(ErrorCode::NoSuchNamespace)),
    }
}

/// Maps `task_id -> TaskInfo`, monotonically assigning ids under exclusive
/// access.
pub struct TaskManager {
    namespaces: Arc<NamespaceRegistry>,
    transferors: Arc<TransferorRegistry>,
    worker_pool: Arc<WorkerPool>,
    backlog: Arc<BandwidthBacklog>,
    next_id: AtomicU64,
    tasks: RwLock<HashMap<u64, Arc<TaskInfo>>>,
    dry_run: bool,
    dry_run_duration_ms: u64,
}

impl TaskManager {
    pub fn new(
        namespaces: Arc<NamespaceRegistry>, transferors: Arc<TransferorRegistry>, worker_pool: Arc<WorkerPool>,
        backlog: Arc<BandwidthBacklog>, dry_run: bool, dry_run_duration_ms: u64,
    ) -> TaskManager {
        TaskManager {
            namespaces,
            transferors,
            worker_pool,
            backlog,
            next_id: AtomicU64::new(1),
            tasks: RwLock::new(HashMap::new()),
            dry_run,
            dry_run_duration_ms,
        }
    }

    /// Admits a new task: resolves backends, looks up the matching
    /// transferor, validates, and submits it to the worker pool. Returns the
    /// assigned id immediately; the task itself runs asynchronously.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self, kind: TaskKind, is_remote_initiated: bool, credentials: ProcessCredentials, src: ResourceInfo, dst: ResourceInfo,
    ) -> Result<u64> {
        let src_backend = resolve_backend(&self.namespaces, &src)?;
        let dst_backend = resolve_backend(&self.namespaces, &dst)?;

        let effective_kind = if self.dry_run { TaskKind::Noop } else { kind };

        let transferor = if effective_kind == TaskKind::Noop {
            None
        } else {
            Some(
                self.transferors
                    .lookup(src.kind, dst.kind, is_remote_initiated)
                    .ok_or_else(|| Error::new(ErrorCode::NotSupported))?,
            )
        };

        let total_bytes = src_backend.get_size(&src).unwrap_or(0);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = Arc::new(TaskInfo::new(
            id, effective_kind, is_remote_initiated, credentials, src_backend, src, dst_backend, dst, total_bytes,
        ));

        if let Some(transferor) = &transferor {
            if !transferor.validate(&task) {
                return Err(Error::new(ErrorCode::BadArgs));
            }
        }

        self.tasks.write().expect("task map poisoned").insert(id, task.clone());
        self.dispatch(task, transferor);
        Ok(id)
    }

    fn dispatch(&self, task: Arc<TaskInfo>, transferor: Option<Arc<dyn crate::transferor::Transferor>>) {
        let backlog = self.backlog.clone();
        let dry_run_duration_ms = self.dry_run_duration_ms;
        let src_nsid = task.src_info.nsid.clone();
        let dst_nsid = task.dst_info.nsid.clone();

        let run_task = task.clone();
        let epilog_task = task.clone();
        let measured_bandwidth: Arc<std::sync::Mutex<Option<f64>>> = Arc::new(std::sync::Mutex::new(None));
        let measured_for_job = measured_bandwidth.clone();

        self.worker_pool.submit_with_epilog_and_forget(
            move || {
                run_task.mark_running();
                let started = Instant::now();

                let outcome = match &transferor {
                    Some(t) => t.transfer(&run_task),
                    None => {
                        std::thread::sleep(std::time::Duration::from_millis(dry_run_duration_ms));
                        Ok(())
                    },
                };

                let elapsed = started.elapsed().as_secs_f64().max(1e-6);
                let sent = run_task.sent_bytes() as f64 / (1024.0 * 1024.0);
                if sent > 0.0 {
                    *measured_for_job.lock().expect("bandwidth cell poisoned") = Some(sent / elapsed);
                }

                match outcome {
                    Ok(()) => run_task.finish(ErrorCode::Success, 0),
                    Err(e) => run_task.finish(e.code, e.sys_errno),
                }
            },
            move || {
                // Epilog runs on the same worker thread right after the
                // closure above: this is both the completion callback that
                // appends the bandwidth sample and, since it runs under the
                // same happens-before edge, what observers synchronizing
                // through `tasks`'s lock are guaranteed to see once the
                // task reaches a terminal state.
                if let Some(mib_per_sec) = *measured_bandwidth.lock().expect("bandwidth cell poisoned") {
                    epilog_task.set_bandwidth(mib_per_sec);
                    backlog.record(&src_nsid, &dst_nsid, mib_per_sec);
                }
            },
        );
    }

    pub fn find(&self, task_id: u64) -> Option<Arc<TaskInfo>> {
        self.tasks.read().expect("task map poisoned").get(&task_id).cloned()
    }

    pub fn stats(&self, task_id: u64) -> Result<TaskStats> {
        self.find(task_id).map(|t| t.stats()).ok_or_else(|| Error::new(ErrorCode::NoSuchTask))
    }

    pub fn erase(&self, task_id: u64) -> Result<()> {
        let mut tasks = self.tasks.write().expect("task map poisoned");
        let task = tasks.get(&task_id).ok_or_else(|| Error::new(ErrorCode::NoSuchTask))?;
        if !task.status().is_terminal() {
            return Err(Error::new(ErrorCode::TasksPending));
        }
        tasks.remove(&task_id);
        Ok(())
    }

    /// Counts tasks matching `predicate`, without holding the map lock while
    /// `predicate` runs (it only ever reads `TaskStats`, itself lock-guarded
    /// independently).
    pub fn count_if(&self, predicate: impl Fn(&TaskInfo) -> bool) -> usize {
        let tasks: Vec<_> = self.tasks.read().expect("task map poisoned").values().cloned().collect();
        tasks.iter().filter(|t| predicate(t)).count()
    }

    /// The global ETA is the slowest of the running tasks' own ETAs, each
    /// computed from that task's own `(src_nsid, dst_nsid)` pair average, not
    /// a single figure pooled across pairs — a slow cross-node pull running
    /// alongside a fast local copy shouldn't make the fast one look slower,
    /// and it shouldn't hide behind the fast one either. If any running
    /// task's pair has no bandwidth history yet, the whole estimate is
    /// undefined, so it comes back as `NaN` rather than understating the
    /// wait.
    pub fn global_stats(&self) -> GlobalStats {
        let tasks: Vec<_> = self.tasks.read().expect("task map poisoned").values().cloned().collect();

        let mut running = 0u32;
        let mut pending = 0u32;
        let mut eta_seconds = 0.0f64;

        for task in &tasks {
            match task.status() {
                super::TaskStatus::Running => {
                    running += 1;
                    let pending_mib = task.stats().pending_bytes as f64 / (1024.0 * 1024.0);
                    let task_eta = match self.backlog.average(&task.src_info.nsid, &task.dst_info.nsid) {
                        Some(avg) if avg > 0.0 => pending_mib / avg,
                        Some(_) => 0.0,
                        None => f64::NAN,
                    };
                    eta_seconds = if eta_seconds.is_nan() || task_eta.is_nan() { f64::NAN } else { eta_seconds.max(task_eta) };
                },
                super::TaskStatus::Pending => pending += 1,
                _ => {},
            }
        }

        GlobalStats { running, pending, eta_seconds }
    }

    /// `true` if any task is not yet in a terminal state; used by the
    /// shutdown control path to refuse with `TasksPending`.
    pub fn has_pending_tasks(&self) -> bool { self.count_if(|t| !t.status().is_terminal()) > 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilesystemFlavor, PosixFilesystemBackend};
    use crate::transferor::LocalPathToLocalTransferor;
    use tempfile::tempdir;

    fn manager_with_local_namespaces() -> (tempfile::TempDir, tempfile::TempDir, TaskManager) {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();

        let namespaces = Arc::new(NamespaceRegistry::new());
        namespaces
            .register("src", Arc::new(PosixFilesystemBackend::new("src", FilesystemFlavor::Posix, src_dir.path(), None).unwrap()))
            .unwrap();
        namespaces
            .register("dst", Arc::new(PosixFilesystemBackend::new("dst", FilesystemFlavor::Posix, dst_dir.path(), None).unwrap()))
            .unwrap();

        let mut transferors = TransferorRegistry::new();
        transferors.install(ResourceKind::LocalPath, ResourceKind::LocalPath, Arc::new(LocalPathToLocalTransferor));

        let manager = TaskManager::new(
            namespaces,
            Arc::new(transferors),
            Arc::new(WorkerPool::new(2)),
            Arc::new(BandwidthBacklog::new(20)),
            false,
            0,
        );

        (src_dir, dst_dir, manager)
    }

    #[test]
    fn submit_assigns_monotonic_ids() {
        let (src_dir, _dst_dir, manager) = manager_with_local_namespaces();
        std::fs::write(src_dir.path().join("a.txt"), b"x").unwrap();

        let creds = ProcessCredentials { uid: 0, gid: 0, pid: 0 };
        let id1 = manager
            .submit(TaskKind::Copy, false, creds, ResourceInfo::local_path("src", "a.txt"), ResourceInfo::local_path("dst", "a.txt"))
            .unwrap();
        let id2 = manager
            .submit(TaskKind::Copy, false, creds, ResourceInfo::local_path("src", "a.txt"), ResourceInfo::local_path("dst", "b.txt"))
            .unwrap();

        assert!(id2 > id1);
    }

    #[test]
    fn submit_rejects_unregistered_namespace() {
        let (_src_dir, _dst_dir, manager) = manager_with_local_namespaces();
        let creds = ProcessCredentials { uid: 0, gid: 0, pid: 0 };
        let err = manager
            .submit(TaskKind::Copy, false, creds, ResourceInfo::local_path("missing", "a"), ResourceInfo::local_path("dst", "a"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchNamespace);
    }

    #[test]
    fn task_reaches_a_terminal_state() {
        let (src_dir, dst_dir, manager) = manager_with_local_namespaces();
        std::fs::write(src_dir.path().join("a.txt"), b"hello").unwrap();

        let creds = ProcessCredentials { uid: 0, gid: 0, pid: 0 };
        let id = manager
            .submit(TaskKind::Copy, false, creds, ResourceInfo::local_path("src", "a.txt"), ResourceInfo::local_path("dst", "a.txt"))
            .unwrap();

        for _ in 0..50 {
            if manager.stats(id).unwrap().status.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let stats = manager.stats(id).unwrap();
        assert_eq!(stats.status, crate::task::TaskStatus::Finished);
        assert!(dst_dir.path().join("a.txt").exists());
    }

    #[test]
    fn completed_task_bandwidth_is_recorded() {
        let (src_dir, _dst_dir, manager) = manager_with_local_namespaces();
        std::fs::write(src_dir.path().join("a.txt"), b"hello").unwrap();

        let creds = ProcessCredentials { uid: 0, gid: 0, pid: 0 };
        let id = manager
            .submit(TaskKind::Copy, false, creds, ResourceInfo::local_path("src", "a.txt"), ResourceInfo::local_path("dst", "a.txt"))
            .unwrap();

        for _ in 0..50 {
            if manager.stats(id).unwrap().status.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let task = manager.find(id).unwrap();
        assert!(!task.bandwidth().is_nan());
        assert!(manager.backlog.average("src", "dst").is_some());
    }
}
