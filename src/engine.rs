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
//! Top-level daemon wiring: bundles the registries, the task manager, and
//! the control gate, and turns a [`Request`] into a [`Response`].
//!
//! This is the piece `src/bin/nornsd.rs` constructs once at startup and
//! hands to both the UDS listener and the peer RPC server.

use crate::backend::{FilesystemFlavor, PosixFilesystemBackend, ProcessMemoryBackend, SharedBackend};
use crate::config::Configuration;
use crate::control::{check_shutdown_precondition, AcceptGate};
use crate::errors::{Error, ErrorCode, Result};
use crate::job::JobRegistry;
use crate::namespace::NamespaceRegistry;
use crate::protocol::{BackendSpec, Request, Response};
use crate::resource::ResourceKind;
use crate::rpc::{RdmaEngine, TcpRdmaEngine};
use crate::task::manager::TaskManager;
use crate::task::BandwidthBacklog;
use crate::transferor::{
    LocalPathToLocalTransferor, LocalPathToRemoteTransferor, MemoryToLocalTransferor, MemoryToRemoteTransferor, RemoteToLocalTransferor,
    TransferorRegistry,
};
use crate::worker_pool::WorkerPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Engine {
    pub namespaces: Arc<NamespaceRegistry>,
    pub jobs: Arc<JobRegistry>,
    pub tasks: Arc<TaskManager>,
    pub accept_gate: Arc<AcceptGate>,
    shutting_down: AtomicBool,
}

impl Engine {
    pub fn new(config: &Configuration, runtime: tokio::runtime::Handle) -> Engine {
        let namespaces = Arc::new(NamespaceRegistry::new());
        let jobs = Arc::new(JobRegistry::new());
        let worker_pool = Arc::new(WorkerPool::new(config.workers));
        let backlog = Arc::new(BandwidthBacklog::new(config.bandwidth_backlog_capacity));

        let rdma_engine: Arc<dyn RdmaEngine> = Arc::new(TcpRdmaEngine::new());

        let mut transferors = TransferorRegistry::new();
        transferors.install(ResourceKind::LocalPath, ResourceKind::LocalPath, Arc::new(LocalPathToLocalTransferor));
        transferors.install(ResourceKind::MemoryRegion, ResourceKind::LocalPath, Arc::new(MemoryToLocalTransferor));
        transferors.install(
            ResourceKind::LocalPath,
            ResourceKind::Remote,
            Arc::new(LocalPathToRemoteTransferor::new(rdma_engine.clone(), runtime.clone())),
        );
        transferors.install(
            ResourceKind::MemoryRegion,
            ResourceKind::Remote,
            Arc::new(MemoryToRemoteTransferor::new(rdma_engine.clone(), runtime.clone())),
        );
        transferors.install(
            ResourceKind::Remote,
            ResourceKind::LocalPath,
            Arc::new(RemoteToLocalTransferor::new(rdma_engine, runtime)),
        );

        let tasks = Arc::new(TaskManager::new(
            namespaces.clone(),
            Arc::new(transferors),
            worker_pool,
            backlog,
            config.dry_run,
            config.dry_run_duration_ms,
        ));

        Engine { namespaces, jobs, tasks, accept_gate: Arc::new(AcceptGate::new()), shutting_down: AtomicBool::new(false) }
    }

    pub fn is_shutting_down(&self) -> bool { self.shutting_down.load(Ordering::SeqCst) }

    /// Shared by the `Shutdown` request handler and the signal handler
    /// installed in `main`: refuses while tasks are pending, otherwise
    /// flips the engine into shutting-down state.
    pub fn request_shutdown(&self) -> Result<()> {
        check_shutdown_precondition(&self.tasks)?;
        self.shutting_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn backend_from_spec(nsid: &str, spec: BackendSpec) -> Result<SharedBackend> {
        match spec {
            BackendSpec::Posix { flavor, mount, quota } => {
                Ok(Arc::new(PosixFilesystemBackend::new(nsid, flavor.into(), mount, quota)?))
            },
            BackendSpec::ProcessMemory => Ok(Arc::new(ProcessMemoryBackend::new(nsid))),
        }
    }

    /// Dispatches one request to completion. This is the single point every
    /// transport (UDS listener, peer control connections) funnels through.
    pub fn handle_request(&self, request: Request) -> Response {
        Response::from_result(self.handle(request))
    }

    fn handle(&self, request: Request) -> Result<Response> {
        match request {
            Request::Ping => Ok(Response::Ok),

            Request::GlobalStatus => Ok(Response::GlobalStats(self.tasks.global_stats())),

            Request::PauseAccept => {
                self.accept_gate.pause();
                Ok(Response::Ok)
            },

            Request::ResumeAccept => {
                self.accept_gate.resume();
                Ok(Response::Ok)
            },

            Request::Shutdown => {
                self.request_shutdown()?;
                Ok(Response::Ok)
            },

            Request::RegisterNamespace { nsid, backend } => {
                let backend = Self::backend_from_spec(&nsid, backend)?;
                self.namespaces.register(&nsid, backend)?;
                Ok(Response::Ok)
            },

            Request::UpdateNamespace { nsid, backend } => {
                let backend = Self::backend_from_spec(&nsid, backend)?;
                self.namespaces.update(&nsid, backend)?;
                Ok(Response::Ok)
            },

            Request::UnregisterNamespace { nsid } => {
                self.namespaces.unregister(&nsid)?;
                Ok(Response::Ok)
            },

            Request::RegisterJob { jobid, hosts, limits } => {
                self.jobs.register(jobid, hosts, limits)?;
                Ok(Response::Ok)
            },

            Request::UpdateJob { jobid, hosts, limits } => {
                self.jobs.update(jobid, hosts, limits)?;
                Ok(Response::Ok)
            },

            Request::UnregisterJob { jobid } => {
                self.jobs.unregister(jobid)?;
                Ok(Response::Ok)
            },

            Request::AddProcess { jobid, credentials } => {
                self.jobs.add_process(jobid, credentials)?;
                Ok(Response::Ok)
            },

            Request::RemoveProcess { jobid, credentials } => {
                self.jobs.remove_process(jobid, credentials)?;
                Ok(Response::Ok)
            },

            Request::SubmitTask { kind, credentials, src, dst } => {
                let task_id = self.tasks.submit(kind, false, credentials, src, dst)?;
                Ok(Response::TaskSubmitted { task_id })
            },

            Request::TaskStatus { task_id } => Ok(Response::TaskStats(self.tasks.stats(task_id)?)),

            // Peer-originated resource RPCs are served by `crate::rpc::handlers`
            // directly over the dedicated peer port, not through this
            // control-plane dispatcher; reaching here means a client sent one
            // over the wrong socket.
            Request::PeerResourceStat { .. } | Request::PeerPushResource { .. } | Request::PeerPullResource { .. } => {
                Err(Error::new(ErrorCode::Protocol))
            },
        }
    }
}
