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
//! Backend drivers: the storage-side half of a namespace.
//!
//! Namespaces can be backed by different storage kinds with different
//! capabilities, so `Backend` is expressed as a trait object
//! (`Arc<dyn Backend>`) rather than a fixed enum of variants.

mod posix;
mod process_memory;

pub use posix::{FilesystemFlavor, PosixFilesystemBackend};
pub use process_memory::{read_from_pid, write_to_pid, ProcessMemoryBackend};

use crate::errors::Result;
use crate::resource::{Resource, ResourceInfo};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// A storage driver plus its mount metadata, addressable by `nsid`.
///
/// Implementations must be safe to share across the worker pool and the
/// listener thread: namespace registration is exclusive, but lookups and
/// resource operations on an already-registered backend happen concurrently
/// from many threads.
pub trait Backend: Debug + Send + Sync {
    fn nsid(&self) -> &str;

    /// Whether the backend tracks quota/usage (POSIX-family backends do;
    /// process memory does not).
    fn is_tracked(&self) -> bool;

    /// Whether the backend currently holds no resources. Only meaningful
    /// for trackable, mount-based backends.
    fn is_empty(&self) -> bool;

    /// The backend's mount point, if it has one (process memory does not).
    fn mount(&self) -> Option<&Path>;

    /// Per-namespace quota in bytes, if tracked.
    fn quota(&self) -> Option<u64>;

    /// States which resource kinds this backend admits.
    fn accepts(&self, info: &ResourceInfo) -> bool;

    /// Creates a new resource, creating intermediate parent directories as
    /// required. `is_collection` tells path backends whether to create a
    /// directory or a plain file.
    fn new_resource(&self, info: &ResourceInfo, is_collection: bool) -> Result<Resource>;

    /// Resolves an existing resource. Must fail with `NoSuchTask`-adjacent
    /// *not-found* semantics (mapped by callers to `ErrorCode::BadArgs` with
    /// `sys_errno = ENOENT`) if a requested path escapes the backend's
    /// mount, even through a symlink — this is a security invariant, not a
    /// convenience check.
    fn get_resource(&self, info: &ResourceInfo) -> Result<Resource>;

    fn remove(&self, resource: &Resource) -> Result<()>;

    /// Size in bytes. `0` on failure is treated as non-fatal by callers.
    fn get_size(&self, info: &ResourceInfo) -> Result<u64>;

    fn describe(&self) -> String;
}

pub type SharedBackend = Arc<dyn Backend>;

/// Placeholder held in `TaskInfo.{src,dst}_backend` for the `Remote` side of
/// a task. A peer's resource has no local backend to speak of; the remote
/// transferors (G.3-G.5) never call into this, they dial the peer directly
/// via `ResourceInfo.peer_addr`. This exists only so `TaskInfo` can keep a
/// single non-optional backend field for both sides.
#[derive(Debug)]
pub struct RemoteBackend {
    nsid: String,
}

impl RemoteBackend {
    pub fn new(nsid: impl Into<String>) -> RemoteBackend { RemoteBackend { nsid: nsid.into() } }
}

impl Backend for RemoteBackend {
    fn nsid(&self) -> &str { &self.nsid }

    fn is_tracked(&self) -> bool { false }

    fn is_empty(&self) -> bool { true }

    fn mount(&self) -> Option<&Path> { None }

    fn quota(&self) -> Option<u64> { None }

    fn accepts(&self, info: &ResourceInfo) -> bool { info.kind == crate::resource::ResourceKind::Remote }

    fn new_resource(&self, _info: &ResourceInfo, _is_collection: bool) -> Result<Resource> {
        Err(crate::errors::Error::new(crate::errors::ErrorCode::NotSupported))
    }

    fn get_resource(&self, _info: &ResourceInfo) -> Result<Resource> {
        Err(crate::errors::Error::new(crate::errors::ErrorCode::NotSupported))
    }

    fn remove(&self, _resource: &Resource) -> Result<()> {
        Err(crate::errors::Error::new(crate::errors::ErrorCode::NotSupported))
    }

    fn get_size(&self, _info: &ResourceInfo) -> Result<u64> {
        Err(crate::errors::Error::new(crate::errors::ErrorCode::NotSupported))
    }

    fn describe(&self) -> String { format!("remote[{}]", self.nsid) }
}
