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
//! Wire protocol: the `Request`/`Response` message set and the
//! length-prefixed framing used both on the client-facing UDS socket and
//! the inter-node RPC TCP connections.
//!
//! Encoding is `bincode` over a 4-byte little-endian length prefix: a
//! fixed-size header announcing the payload length, then the payload.

use crate::backend::FilesystemFlavor;
use crate::errors::{Error, ErrorCode, Result};
use crate::job::{Host, NamespaceLimit, ProcessCredentials};
use crate::resource::{NetAddr, ResourceInfo};
use crate::task::{GlobalStats, TaskKind, TaskStats};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;

const MAX_MESSAGE_BYTES: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendSpec {
    Posix { flavor: PosixFlavorWire, mount: PathBuf, quota: Option<u64> },
    ProcessMemory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PosixFlavorWire {
    Posix,
    Lustre,
    NvmlDax,
}

impl From<PosixFlavorWire> for FilesystemFlavor {
    fn from(w: PosixFlavorWire) -> FilesystemFlavor {
        match w {
            PosixFlavorWire::Posix => FilesystemFlavor::Posix,
            PosixFlavorWire::Lustre => FilesystemFlavor::Lustre,
            PosixFlavorWire::NvmlDax => FilesystemFlavor::NvmlDax,
        }
    }
}

/// A client- or peer-originated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Ping,
    GlobalStatus,
    PauseAccept,
    ResumeAccept,
    Shutdown,

    RegisterNamespace { nsid: String, backend: BackendSpec },
    UpdateNamespace { nsid: String, backend: BackendSpec },
    UnregisterNamespace { nsid: String },

    RegisterJob { jobid: u32, hosts: Vec<Host>, limits: Vec<NamespaceLimit> },
    UpdateJob { jobid: u32, hosts: Vec<Host>, limits: Vec<NamespaceLimit> },
    UnregisterJob { jobid: u32 },
    AddProcess { jobid: u32, credentials: ProcessCredentials },
    RemoveProcess { jobid: u32, credentials: ProcessCredentials },

    SubmitTask { kind: TaskKind, credentials: ProcessCredentials, src: ResourceInfo, dst: ResourceInfo },
    TaskStatus { task_id: u64 },

    /// Peer-to-peer: does the named resource exist, and how big is it.
    PeerResourceStat { nsid: String, name: PathBuf },
    /// Peer-to-peer: "I am about to push you bytes for this resource."
    PeerPushResource { nsid: String, name: PathBuf, is_collection: bool, size: u64 },
    /// Peer-to-peer: "send me the bytes for this resource."
    PeerPullResource { nsid: String, name: PathBuf },
}

/// The matching response to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Err { code: ErrorCode, sys_errno: i32 },
    TaskSubmitted { task_id: u64 },
    TaskStats(TaskStats),
    GlobalStats(GlobalStats),
    PeerResourceInfo { size: u64, is_collection: bool },
}

impl Response {
    pub fn from_result(result: Result<Response>) -> Response {
        match result {
            Ok(response) => response,
            Err(e) => Response::Err { code: e.code, sys_errno: e.sys_errno },
        }
    }

    pub fn into_result(self) -> Result<Response> {
        match self {
            Response::Err { code, sys_errno } => Err(Error { code, sys_errno }),
            other => Ok(other),
        }
    }
}

fn io_err(e: std::io::Error) -> Error { Error::from_io(&e) }

/// Reads one length-prefixed, bincode-encoded message, tolerating `EINTR`
/// on both the length and body reads. A zero-length payload is a protocol
/// violation, not an empty message.
pub fn read_message<T: for<'de> Deserialize<'de>>(stream: &mut impl Read) -> Result<T> {
    let mut len_buf = [0u8; 4];
    read_exact_retrying(stream, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);

    if len == 0 || len > MAX_MESSAGE_BYTES {
        return Err(Error::new(ErrorCode::Protocol));
    }

    let mut body = vec![0u8; len as usize];
    read_exact_retrying(stream, &mut body)?;

    bincode::deserialize(&body).map_err(|_| Error::new(ErrorCode::Protocol))
}

/// Writes one length-prefixed, bincode-encoded message.
pub fn write_message<T: Serialize>(stream: &mut impl Write, message: &T) -> Result<()> {
    let body = bincode::serialize(message).map_err(|_| Error::new(ErrorCode::Protocol))?;
    if body.is_empty() || body.len() as u64 > MAX_MESSAGE_BYTES as u64 {
        return Err(Error::new(ErrorCode::Protocol));
    }

    let len = (body.len() as u32).to_le_bytes();
    write_all_retrying(stream, &len)?;
    write_all_retrying(stream, &body)
}

fn read_exact_retrying(stream: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => return Err(Error::new(ErrorCode::RpcRecvFailed)),
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        }
    }
    Ok(())
}

fn write_all_retrying(stream: &mut impl Write, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(Error::new(ErrorCode::RpcSendFailed)),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        }
    }
    Ok(())
}

pub fn peer_addr_of(info: &ResourceInfo) -> Option<NetAddr> { info.peer_addr }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_request_through_framing() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Request::Ping).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor).unwrap();
        assert!(matches!(decoded, Request::Ping));
    }

    #[test]
    fn rejects_a_zero_length_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let err = read_message::<Request>(&mut cursor).unwrap_err();
        assert_eq!(err.code, ErrorCode::Protocol);
    }

    #[test]
    fn response_result_conversion_round_trips() {
        let ok = Response::TaskSubmitted { task_id: 7 };
        assert!(matches!(ok.into_result(), Ok(Response::TaskSubmitted { task_id: 7 })));

        let err_response = Response::Err { code: ErrorCode::NoSuchTask, sys_errno: 0 };
        let result = err_response.into_result();
        assert_eq!(result.unwrap_err().code, ErrorCode::NoSuchTask);
    }
}
