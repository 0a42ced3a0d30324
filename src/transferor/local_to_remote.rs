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
//! G.3: local path -> remote node. Directories are packed into a USTAR
//! archive first so the wire only ever carries one byte stream.
//!
//! `transfer` handles the locally-initiated push only. The landing side —
//! accepting a push a peer initiates against us — is served directly by
//! `crate::rpc::handlers`, not through this trait, since that path runs
//! inside the async RPC server rather than the worker pool.

use super::Transferor;
use crate::archive;
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceKind};
use crate::rpc::RdmaEngine;
use crate::task::TaskInfo;
use std::sync::Arc;
use tokio::runtime::Handle;

pub struct LocalPathToRemoteTransferor {
    engine: Arc<dyn RdmaEngine>,
    runtime: Handle,
}

impl LocalPathToRemoteTransferor {
    pub fn new(engine: Arc<dyn RdmaEngine>, runtime: Handle) -> LocalPathToRemoteTransferor {
        LocalPathToRemoteTransferor { engine, runtime }
    }
}

impl Transferor for LocalPathToRemoteTransferor {
    fn validate(&self, task: &TaskInfo) -> bool {
        task.src_info.kind == ResourceKind::LocalPath && task.dst_info.kind == ResourceKind::Remote
    }

    fn transfer(&self, task: &TaskInfo) -> Result<()> {
        if task.is_remote_initiated {
            // A remote-initiated pull lands here only to stat the resource;
            // the actual byte transfer is served by the RPC handler.
            return Err(Error::new(ErrorCode::NotSupported));
        }

        let src = task.src_backend.get_resource(&task.src_info)?;
        let (src_path, is_collection) = match &src {
            Resource::LocalPath { canonical_path, is_collection, .. } => (canonical_path.clone(), *is_collection),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };

        let peer = task.dst_info.peer_addr.ok_or(Error::new(ErrorCode::BadArgs))?;
        let nsid = task.dst_info.nsid.clone();
        let name = task.dst_info.name.clone();

        let (send_path, size, cleanup) = if is_collection {
            let archive_path = archive::temp_archive_path();
            let size = archive::pack(&src_path, &archive_path)?;
            (archive_path, size, true)
        } else {
            let size = std::fs::metadata(&src_path).map_err(|e| Error::from_io(&e))?.len();
            (src_path.clone(), size, false)
        };

        task.set_total_bytes(size);

        let engine = self.engine.clone();
        let push_path = send_path.clone();
        let result = self.runtime.block_on(async move { engine.push(peer, &nsid, &name, &push_path, size, is_collection).await });

        if cleanup {
            let _ = std::fs::remove_file(&send_path);
        }

        result?;
        task.add_sent_bytes(size);
        Ok(())
    }
}
