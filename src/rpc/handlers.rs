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
//! Server side of the peer RPC connection: the counterpart to
//! [`super::engine::TcpRdmaEngine`]'s client calls.

use super::engine::PeerControl as Control;
use crate::archive;
use crate::errors::{Error, ErrorCode};
use crate::namespace::NamespaceRegistry;
use crate::resource::ResourceInfo;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn write_control(stream: &mut TcpStream, control: &Control) -> std::io::Result<()> {
    let body = bincode::serialize(control).expect("control message always serializes");
    stream.write_u32_le(body.len() as u32).await?;
    stream.write_all(&body).await
}

async fn read_control(stream: &mut TcpStream) -> crate::errors::Result<Control> {
    let len = stream.read_u32_le().await.map_err(|e| Error::from_io(&e))?;
    if len == 0 || len > 64 * 1024 * 1024 {
        return Err(Error::new(ErrorCode::Protocol));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await.map_err(|e| Error::from_io(&e))?;
    bincode::deserialize(&body).map_err(|_| Error::new(ErrorCode::Protocol))
}

/// Serves a single peer connection to completion: reads one [`Control`]
/// header and handles it, then closes. Each connection carries exactly one
/// operation, matching the reference client in [`super::engine`].
pub async fn serve_peer_connection(mut stream: TcpStream, namespaces: Arc<NamespaceRegistry>) {
    let control = match read_control(&mut stream).await {
        Ok(c) => c,
        Err(_) => return,
    };

    let result = match control {
        Control::Stat { nsid, name } => handle_stat(&mut stream, &namespaces, &nsid, &name).await,
        Control::Push { nsid, name, is_collection, size } => handle_push(&mut stream, &namespaces, &nsid, &name, is_collection, size).await,
        Control::Pull { nsid, name } => handle_pull(&mut stream, &namespaces, &nsid, &name).await,
        _ => Err(Error::new(ErrorCode::Protocol)),
    };

    if let Err(e) = result {
        log::warn!("peer rpc connection failed: {}", e);
    }
}

async fn handle_stat(
    stream: &mut TcpStream, namespaces: &NamespaceRegistry, nsid: &str, name: &std::path::Path,
) -> crate::errors::Result<()> {
    let backend = namespaces.lookup(nsid).ok_or(Error::new(ErrorCode::NoSuchNamespace))?;
    let info = ResourceInfo::local_path(nsid, name);

    let reply = match backend.get_resource(&info) {
        Ok(resource) => {
            let size = backend.get_size(&info).unwrap_or(0);
            Control::StatReply { size, is_collection: resource.is_collection() }
        },
        Err(e) => Control::Nack { code: e.code },
    };

    write_control(stream, &reply).await.map_err(|e| Error::from_io(&e))
}

async fn handle_push(
    stream: &mut TcpStream, namespaces: &NamespaceRegistry, nsid: &str, name: &std::path::Path, is_collection: bool, size: u64,
) -> crate::errors::Result<()> {
    let backend = match namespaces.lookup(nsid) {
        Some(b) => b,
        None => return write_control(stream, &Control::Nack { code: ErrorCode::NoSuchNamespace }).await.map_err(|e| Error::from_io(&e)),
    };

    let staging_path = archive::temp_archive_path();
    if let Err(e) = drain_to_file(stream, &staging_path, size).await {
        let _ = tokio::fs::remove_file(&staging_path).await;
        return write_control(stream, &Control::Nack { code: e.code }).await.map_err(|e| Error::from_io(&e));
    }

    let info = ResourceInfo::local_path(nsid, name);
    let outcome = land_received_resource(&backend, &info, is_collection, &staging_path);
    let _ = std::fs::remove_file(&staging_path);

    match outcome {
        Ok(()) => write_control(stream, &Control::Ack).await.map_err(|e| Error::from_io(&e)),
        Err(e) => write_control(stream, &Control::Nack { code: e.code }).await.map_err(|e| Error::from_io(&e)),
    }
}

fn land_received_resource(
    backend: &crate::backend::SharedBackend, info: &ResourceInfo, is_collection: bool, staging_path: &std::path::Path,
) -> crate::errors::Result<()> {
    let resource = backend.new_resource(info, is_collection)?;
    let dest_path = match &resource {
        crate::resource::Resource::LocalPath { canonical_path, .. } => canonical_path.clone(),
        _ => return Err(Error::new(ErrorCode::BadArgs)),
    };

    if is_collection {
        archive::unpack(staging_path, &dest_path)
    } else {
        std::fs::copy(staging_path, &dest_path).map(|_| ()).map_err(|e| Error::from_io(&e))
    }
}

async fn handle_pull(
    stream: &mut TcpStream, namespaces: &NamespaceRegistry, nsid: &str, name: &std::path::Path,
) -> crate::errors::Result<()> {
    let backend = match namespaces.lookup(nsid) {
        Some(b) => b,
        None => return write_control(stream, &Control::Nack { code: ErrorCode::NoSuchNamespace }).await.map_err(|e| Error::from_io(&e)),
    };

    let info = ResourceInfo::local_path(nsid, name);
    let resource = match backend.get_resource(&info) {
        Ok(r) => r,
        Err(e) => return write_control(stream, &Control::Nack { code: e.code }).await.map_err(|e| Error::from_io(&e)),
    };

    let source_path = match &resource {
        crate::resource::Resource::LocalPath { canonical_path, .. } => canonical_path.clone(),
        _ => return write_control(stream, &Control::Nack { code: ErrorCode::BadArgs }).await.map_err(|e| Error::from_io(&e)),
    };

    let is_collection = resource.is_collection();
    let staging_path = archive::temp_archive_path();
    let size = if is_collection {
        archive::pack(&source_path, &staging_path)?
    } else {
        std::fs::metadata(&source_path).map_err(|e| Error::from_io(&e))?.len()
    };

    write_control(stream, &Control::PullReply { size, is_collection }).await.map_err(|e| Error::from_io(&e))?;

    let send_from = if is_collection { staging_path.clone() } else { source_path };
    let result = send_file(stream, &send_from, size).await;
    if is_collection {
        let _ = std::fs::remove_file(&staging_path);
    }
    result
}

async fn drain_to_file(stream: &mut TcpStream, dest: &std::path::Path, size: u64) -> crate::errors::Result<()> {
    let mut file = tokio::fs::File::create(dest).await.map_err(|e| Error::from_io(&e))?;
    let mut remaining = size;
    let mut buf = vec![0u8; 1 << 20];
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = stream.read(&mut buf[..to_read]).await.map_err(|e| Error::from_io(&e))?;
        if n == 0 {
            return Err(Error::new(ErrorCode::RpcRecvFailed));
        }
        file.write_all(&buf[..n]).await.map_err(|e| Error::from_io(&e))?;
        remaining -= n as u64;
    }
    Ok(())
}

async fn send_file(stream: &mut TcpStream, source: &std::path::Path, size: u64) -> crate::errors::Result<()> {
    let mut file = tokio::fs::File::open(source).await.map_err(|e| Error::from_io(&e))?;
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
    Ok(())
}
