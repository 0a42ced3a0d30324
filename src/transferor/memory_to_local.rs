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
//! G.2: process memory region -> local path. Reads the client process's
//! address space directly via `process_vm_readv` and streams it into the
//! destination file in fixed-size chunks so progress can be reported as it
//! goes rather than only at completion.

use super::Transferor;
use crate::backend::read_from_pid;
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceKind};
use crate::task::TaskInfo;
use std::fs::File;
use std::io::Write;

const CHUNK_SIZE: usize = 1 << 20;

pub struct MemoryToLocalTransferor;

impl Transferor for MemoryToLocalTransferor {
    fn validate(&self, task: &TaskInfo) -> bool {
        task.src_info.kind == ResourceKind::MemoryRegion && task.dst_info.kind == ResourceKind::LocalPath
    }

    fn transfer(&self, task: &TaskInfo) -> Result<()> {
        let src = task.src_backend.get_resource(&task.src_info)?;
        let (address, size) = match src {
            Resource::MemoryRegion { address, size, .. } => (address, size as u64),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };

        let dst = task.dst_backend.new_resource(&task.dst_info, false)?;
        let dst_path = match &dst {
            Resource::LocalPath { canonical_path, .. } => canonical_path.clone(),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };

        task.set_total_bytes(size);
        let mut file = File::create(&dst_path).map_err(|e| Error::from_io(&e))?;

        let mut offset = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while offset < size {
            let n = ((size - offset) as usize).min(CHUNK_SIZE);
            read_from_pid(task.credentials.pid, address + offset, &mut buf[..n])?;
            file.write_all(&buf[..n]).map_err(|e| Error::from_io(&e))?;
            task.add_sent_bytes(n as u64);
            offset += n as u64;
        }

        Ok(())
    }
}
