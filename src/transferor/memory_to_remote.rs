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
//! G.4: process memory region -> remote node. The region is read into a
//! temporary file first, then pushed the same way a local path would be —
//! there's no way to stream directly from another process's address space
//! onto a TCP socket without an intermediate buffer.

use super::Transferor;
use crate::archive::temp_archive_path;
use crate::backend::read_from_pid;
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceKind};
use crate::rpc::RdmaEngine;
use crate::task::TaskInfo;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tokio::runtime::Handle;

pub struct MemoryToRemoteTransferor {
    engine: Arc<dyn RdmaEngine>,
    runtime: Handle,
}

impl MemoryToRemoteTransferor {
    pub fn new(engine: Arc<dyn RdmaEngine>, runtime: Handle) -> MemoryToRemoteTransferor {
        MemoryToRemoteTransferor { engine, runtime }
    }
}

impl Transferor for MemoryToRemoteTransferor {
    fn validate(&self, task: &TaskInfo) -> bool {
        task.src_info.kind == ResourceKind::MemoryRegion && task.dst_info.kind == ResourceKind::Remote
    }

    fn transfer(&self, task: &TaskInfo) -> Result<()> {
        if task.is_remote_initiated {
            return Err(Error::new(ErrorCode::NotSupported));
        }

        let src = task.src_backend.get_resource(&task.src_info)?;
        let (address, size) = match src {
            Resource::MemoryRegion { address, size, .. } => (address, size as u64),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };

        let peer = task.dst_info.peer_addr.ok_or(Error::new(ErrorCode::BadArgs))?;
        let nsid = task.dst_info.nsid.clone();
        let name = task.dst_info.name.clone();

        let staging_path = temp_archive_path();
        {
            let mut file = File::create(&staging_path).map_err(|e| Error::from_io(&e))?;
            let mut offset = 0u64;
            let mut buf = vec![0u8; 1 << 20];
            while offset < size {
                let n = ((size - offset) as usize).min(buf.len());
                read_from_pid(task.credentials.pid, address + offset, &mut buf[..n])?;
                file.write_all(&buf[..n]).map_err(|e| Error::from_io(&e))?;
                offset += n as u64;
            }
        }

        task.set_total_bytes(size);

        let engine = self.engine.clone();
        let push_path = staging_path.clone();
        let result = self.runtime.block_on(async move { engine.push(peer, &nsid, &name, &push_path, size, false).await });

        let _ = std::fs::remove_file(&staging_path);
        result?;
        task.add_sent_bytes(size);
        Ok(())
    }
}
