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
//! G.5: remote node -> local path. The inverse of [`super::local_to_remote`]:
//! pulls a byte stream (archive or plain file) from a peer into a staging
//! file, then unpacks it into the destination resource.

use super::Transferor;
use crate::archive::{temp_archive_path, unpack};
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceKind};
use crate::rpc::RdmaEngine;
use crate::task::TaskInfo;
use std::sync::Arc;
use tokio::runtime::Handle;

pub struct RemoteToLocalTransferor {
    engine: Arc<dyn RdmaEngine>,
    runtime: Handle,
}

impl RemoteToLocalTransferor {
    pub fn new(engine: Arc<dyn RdmaEngine>, runtime: Handle) -> RemoteToLocalTransferor {
        RemoteToLocalTransferor { engine, runtime }
    }
}

impl Transferor for RemoteToLocalTransferor {
    fn validate(&self, task: &TaskInfo) -> bool {
        task.src_info.kind == ResourceKind::Remote && task.dst_info.kind == ResourceKind::LocalPath
    }

    fn transfer(&self, task: &TaskInfo) -> Result<()> {
        if task.is_remote_initiated {
            return Err(Error::new(ErrorCode::NotSupported));
        }

        let peer = task.src_info.peer_addr.ok_or(Error::new(ErrorCode::BadArgs))?;
        let nsid = task.src_info.nsid.clone();
        let name = task.src_info.name.clone();

        let staging_path = temp_archive_path();
        let engine = self.engine.clone();
        let pull_path = staging_path.clone();
        let result = self.runtime.block_on(async move { engine.pull(peer, &nsid, &name, &pull_path).await });

        let (size, is_collection) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = std::fs::remove_file(&staging_path);
                return Err(e);
            },
        };

        task.set_total_bytes(size);

        let dst = task.dst_backend.new_resource(&task.dst_info, is_collection)?;
        let dst_path = match &dst {
            Resource::LocalPath { canonical_path, .. } => canonical_path.clone(),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };

        let outcome = if is_collection {
            unpack(&staging_path, &dst_path)
        } else {
            std::fs::copy(&staging_path, &dst_path).map(|_| ()).map_err(|e| Error::from_io(&e))
        };

        let _ = std::fs::remove_file(&staging_path);
        outcome?;
        task.add_sent_bytes(size);
        Ok(())
    }
}
