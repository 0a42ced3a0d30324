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
//! Resource descriptors: the typed things a task moves bytes between.
//!
//! A [`Resource`] is always resolved against a registered backend; a
//! [`ResourceInfo`] is the client-supplied, unresolved form used to look
//! one up.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Network address of a peer daemon. The concrete RDMA transport is out of
/// scope; we only need enough of an address to `lookup` an endpoint and dial
/// it over TCP for the reference `RdmaEngine` (see `crate::rpc`).
pub type NetAddr = SocketAddr;

/// An opaque handle to a region of memory registered with the RDMA engine.
/// Its only consumer is `crate::rpc::RdmaEngine`; the task engine treats it
/// as inert bytes to thread through the push/pull RPCs.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExposedMemoryHandle(pub Vec<u8>);

/// The kind of a resource, independent of which side (source/destination) it
/// plays. Drives transferor dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResourceKind {
    MemoryRegion,
    LocalPath,
    Remote,
    Unknown,
}

/// The client-supplied, unresolved description of a resource: enough to
/// look up the owning namespace's backend and ask it to `get` or `new` the
/// concrete [`Resource`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    pub nsid: String,
    pub name: PathBuf,
    pub address: u64,
    pub size: usize,
    pub peer_addr: Option<NetAddr>,
    pub is_collection: bool,
}

impl ResourceInfo {
    pub fn local_path(nsid: impl Into<String>, name: impl Into<PathBuf>) -> ResourceInfo {
        ResourceInfo {
            kind: ResourceKind::LocalPath,
            nsid: nsid.into(),
            name: name.into(),
            address: 0,
            size: 0,
            peer_addr: None,
            is_collection: false,
        }
    }

    pub fn memory_region(address: u64, size: usize) -> ResourceInfo {
        ResourceInfo {
            kind: ResourceKind::MemoryRegion,
            nsid: String::new(),
            name: PathBuf::new(),
            address,
            size,
            peer_addr: None,
            is_collection: false,
        }
    }

    pub fn remote(nsid: impl Into<String>, name: impl Into<PathBuf>, peer_addr: NetAddr) -> ResourceInfo {
        ResourceInfo {
            kind: ResourceKind::Remote,
            nsid: nsid.into(),
            name: name.into(),
            address: 0,
            size: 0,
            peer_addr: Some(peer_addr),
            is_collection: false,
        }
    }
}

/// A resolved resource: produced by a backend's `new_resource`/`get_resource`
/// from a [`ResourceInfo`]. Only meaningful while its parent backend stays
/// registered.
#[derive(Debug, Clone)]
pub enum Resource {
    MemoryRegion {
        nsid: String,
        address: u64,
        size: usize,
    },
    LocalPath {
        nsid: String,
        canonical_path: PathBuf,
        name: PathBuf,
        is_collection: bool,
    },
    Remote {
        nsid: String,
        address: NetAddr,
        name: PathBuf,
        buffers: ExposedMemoryHandle,
        is_collection: bool,
    },
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::MemoryRegion { .. } => ResourceKind::MemoryRegion,
            Resource::LocalPath { .. } => ResourceKind::LocalPath,
            Resource::Remote { .. } => ResourceKind::Remote,
        }
    }

    pub fn is_collection(&self) -> bool {
        match self {
            Resource::MemoryRegion { .. } => false,
            Resource::LocalPath { is_collection, .. } => *is_collection,
            Resource::Remote { is_collection, .. } => *is_collection,
        }
    }

    pub fn nsid(&self) -> &str {
        match self {
            Resource::MemoryRegion { nsid, .. } => nsid,
            Resource::LocalPath { nsid, .. } => nsid,
            Resource::Remote { nsid, .. } => nsid,
        }
    }
}
