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
//! The `RdmaEngine` abstraction and its reference TCP implementation.
//!
//! True RDMA transport is out of scope; a concrete
//! transport still has to exist for the transferors to call, so this ships
//! bytes inline over a plain TCP stream. It is not zero-copy — a documented
//! simplification, not an attempt at the real thing.

use crate::errors::{Error, ErrorCode, Result};
use crate::resource::NetAddr;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Control header exchanged before the raw byte stream of a push or pull.
/// Kept separate from [`crate::protocol::Request`] because this one rides
/// an async connection and is followed by a raw payload, not another framed
/// message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
enum Control {
    Push { nsid: String, name: std::path::PathBuf, is_collection: bool, size: u64 },
    Pull { nsid: String, name: std::path::PathBuf },
    Stat { nsid: String, name: std::path::PathBuf },
    StatReply { size: u64, is_collection: bool },
    PullReply { size: u64, is_collection: bool },
    Ack,
    Nack { code: ErrorCode },
}

/// Moves bytes to and from a peer daemon. The task engine only ever deals
/// in local file paths; an implementation is responsible for getting those
/// bytes across the wire however it likes.
#[async_trait]
pub trait RdmaEngine: Send + Sync {
    async fn push(&self, peer: NetAddr, nsid: &str, name: &Path, local_source: &Path, size: u64, is_collection: bool) -> Result<()>;

    /// Pulls a resource from `peer` into `local_dest`, returning its size
    /// and whether it was a collection (so the caller knows to unpack it).
    async fn pull(&self, peer: NetAddr, nsid: &str, name: &Path, local_dest: &Path) -> Result<(u64, bool)>;

    async fn stat(&self, peer: NetAddr, nsid: &str, name: &Path) -> Result<(u64, bool)>;
}

pub struct TcpRdmaEngine;

impl TcpRdmaEngine {
    pub fn new() -> TcpRdmaEngine { TcpRdmaEngine }
}

impl Default for TcpRdmaEngine {
    fn default() -> Self { Self::new() }
}

async fn write_control(stream: &mut TcpStream, control: &Control) -> Result<()> {
    let body = bincode::serialize(control).map_err(|_| Error::new(ErrorCode::Protocol))?;
    stream.write_u32_le(body.len() as u32).await.map_err(|e| Error::from_io(&e))?;
    stream.write_all(&body).await.map_err(|e| Error::from_io(&e))
}

async fn read_control(stream: &mut TcpStream) -> Result<Control> {
    let len = stream.read_u32_le().await.map_err(|e| Error::from_io(&e))?;
    if len == 0 || len > 64 * 1024 * 1024 {
        return Err(Error::new(ErrorCode::Protocol));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await.map_err(|e| Error::from_io(&e))?;
    bincode::deserialize(&body).map_err(|_| Error::new(ErrorCode::Protocol))
}

#[async_trait]
impl RdmaEngine for TcpRdmaEngine {
    async fn push(&self, peer: NetAddr, nsid: &str, name: &Path, local_source: &Path, size: u64, is_collection: bool) -> Result<()> {
        let mut stream = TcpStream::connect(peer).await.map_err(|_| Error::new(ErrorCode::ConnFailed))?;

        write_control(&mut stream, &Control::Push { nsid: nsid.to_owned(), name: name.to_owned(), is_collection, size }).await?;

        let mut file = tokio::fs::File::open(local_source).await.map_err(|e| Error::from_io(&e))?;
        let mut remaining = size;
        let mut buf = vec![0u8; 1 << 20];
        while remaining > 0 {
            let to_read = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..to_read]).await.map_err(|e| Error::from_io(&e))?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.map_err(|e| Error::from_io(&e))?;
            remaining -= n as u64;
        }

        match read_control(&mut stream).await? {
            Control::Ack => Ok(()),
            Control::Nack { code } => Err(Error::new(code)),
            _ => Err(Error::new(ErrorCode::Protocol)),
        }
    }

    async fn pull(&self, peer: NetAddr, nsid: &str, name: &Path, local_dest: &Path) -> Result<(u64, bool)> {
        let mut stream = TcpStream::connect(peer).await.map_err(|_| Error::new(ErrorCode::ConnFailed))?;
        write_control(&mut stream, &Control::Pull { nsid: nsid.to_owned(), name: name.to_owned() }).await?;

        let (size, is_collection) = match read_control(&mut stream).await? {
            Control::PullReply { size, is_collection } => (size, is_collection),
            Control::Nack { code } => return Err(Error::new(code)),
            _ => return Err(Error::new(ErrorCode::Protocol)),
        };

        let mut file = tokio::fs::File::create(local_dest).await.map_err(|e| Error::from_io(&e))?;
        let mut remaining = size;
        let mut buf = vec![0u8; 1 << 20];
        while remaining > 0 {
            let to_read = remaining.min(buf.len() as u64) as usize;
            let n = stream.read(&mut buf[..to_read]).await.map_err(|e| Error::from_io(&e))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await.map_err(|e| Error::from_io(&e))?;
            remaining -= n as u64;
        }

        Ok((size, is_collection))
    }

    async fn stat(&self, peer: NetAddr, nsid: &str, name: &Path) -> Result<(u64, bool)> {
        let mut stream = TcpStream::connect(peer).await.map_err(|_| Error::new(ErrorCode::ConnFailed))?;
        write_control(&mut stream, &Control::Stat { nsid: nsid.to_owned(), name: name.to_owned() }).await?;

        match read_control(&mut stream).await? {
            Control::StatReply { size, is_collection } => Ok((size, is_collection)),
            Control::Nack { code } => Err(Error::new(code)),
            _ => Err(Error::new(ErrorCode::Protocol)),
        }
    }
}

pub(crate) use Control as PeerControl;
