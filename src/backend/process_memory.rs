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
//! The process-memory backend and the cross-process read/write primitive
//! the memory transferors build on.
//!
//! A memory region is resolved purely from the client-declared
//! `{address, size}` pair — there is no "mount" to escape, so this backend
//! is much thinner than the POSIX ones.

use super::Backend;
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceInfo, ResourceKind};
use std::path::Path;

#[derive(Debug)]
pub struct ProcessMemoryBackend {
    nsid: String,
}

impl ProcessMemoryBackend {
    pub fn new(nsid: impl Into<String>) -> ProcessMemoryBackend {
        ProcessMemoryBackend { nsid: nsid.into() }
    }
}

impl Backend for ProcessMemoryBackend {
    fn nsid(&self) -> &str { &self.nsid }

    fn is_tracked(&self) -> bool { false }

    fn is_empty(&self) -> bool { true }

    fn mount(&self) -> Option<&Path> { None }

    fn quota(&self) -> Option<u64> { None }

    fn accepts(&self, info: &ResourceInfo) -> bool { info.kind == ResourceKind::MemoryRegion }

    fn new_resource(&self, info: &ResourceInfo, _is_collection: bool) -> Result<Resource> {
        self.get_resource(info)
    }

    fn get_resource(&self, info: &ResourceInfo) -> Result<Resource> {
        if info.kind != ResourceKind::MemoryRegion {
            return Err(Error::new(ErrorCode::BadArgs));
        }
        Ok(Resource::MemoryRegion { nsid: self.nsid.clone(), address: info.address, size: info.size })
    }

    fn remove(&self, _resource: &Resource) -> Result<()> {
        // There is nothing to remove: the client process owns the memory.
        Ok(())
    }

    /// Returns the client-declared region size; process memory has no way
    /// to independently verify it ahead of the actual transfer.
    fn get_size(&self, info: &ResourceInfo) -> Result<u64> { Ok(info.size as u64) }

    fn describe(&self) -> String { format!("process-memory[{}]", self.nsid) }
}

/// Reads `buf.len()` bytes from `pid`'s address space at `address` into
/// `buf`, using `process_vm_readv` on Linux. On non-Linux targets this
/// falls back to `/proc/<pid>/mem`, which is a strictly degraded path (it
/// requires `PTRACE_ATTACH`-equivalent permissions the syscall does not)
/// kept only so the crate builds on non-Linux hosts.
pub fn read_from_pid(pid: u32, address: u64, buf: &mut [u8]) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        read_from_pid_linux(pid, address, buf)
    }
    #[cfg(not(target_os = "linux"))]
    {
        read_from_pid_proc_mem(pid, address, buf)
    }
}

/// Writes `buf` into `pid`'s address space at `address`, using
/// `process_vm_writev` on Linux.
pub fn write_to_pid(pid: u32, address: u64, buf: &[u8]) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        write_to_pid_linux(pid, address, buf)
    }
    #[cfg(not(target_os = "linux"))]
    {
        write_to_pid_proc_mem(pid, address, buf)
    }
}

#[cfg(target_os = "linux")]
fn read_from_pid_linux(pid: u32, address: u64, buf: &mut [u8]) -> Result<()> {
    let local_iov = libc::iovec { iov_base: buf.as_mut_ptr() as *mut libc::c_void, iov_len: buf.len() };
    let remote_iov = libc::iovec { iov_base: address as *mut libc::c_void, iov_len: buf.len() };

    let n = unsafe { libc::process_vm_readv(pid as libc::pid_t, &local_iov, 1, &remote_iov, 1, 0) };

    if n < 0 {
        return Err(Error::from_io(&std::io::Error::last_os_error()));
    }
    if n as usize != buf.len() {
        // A short read means the target memory wasn't fully mapped/readable;
        // refuse partial reads rather than returning a truncated buffer.
        return Err(Error::new(ErrorCode::SystemError));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn write_to_pid_linux(pid: u32, address: u64, buf: &[u8]) -> Result<()> {
    let local_iov = libc::iovec { iov_base: buf.as_ptr() as *mut libc::c_void, iov_len: buf.len() };
    let remote_iov = libc::iovec { iov_base: address as *mut libc::c_void, iov_len: buf.len() };

    let n = unsafe { libc::process_vm_writev(pid as libc::pid_t, &local_iov, 1, &remote_iov, 1, 0) };

    if n < 0 {
        return Err(Error::from_io(&std::io::Error::last_os_error()));
    }
    if n as usize != buf.len() {
        return Err(Error::new(ErrorCode::SystemError));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn read_from_pid_proc_mem(pid: u32, address: u64, buf: &mut [u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::{Read, Seek, SeekFrom};

    let mut file = OpenOptions::new()
        .read(true)
        .open(format!("/proc/{}/mem", pid))
        .map_err(|e| Error::from_io(&e))?;
    file.seek(SeekFrom::Start(address)).map_err(|e| Error::from_io(&e))?;
    file.read_exact(buf).map_err(|e| Error::from_io(&e))
}

#[cfg(not(target_os = "linux"))]
fn write_to_pid_proc_mem(pid: u32, address: u64, buf: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    let mut file = OpenOptions::new()
        .write(true)
        .open(format!("/proc/{}/mem", pid))
        .map_err(|e| Error::from_io(&e))?;
    file.seek(SeekFrom::Start(address)).map_err(|e| Error::from_io(&e))?;
    file.write_all(buf).map_err(|e| Error::from_io(&e))
}
