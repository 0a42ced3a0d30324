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
//! USTAR archive packing, size estimation, and extraction.
//!
//! Used whenever a directory crosses a node boundary. There's no USTAR
//! writer in the dependency tree, so this module writes the headers
//! directly; the block-alignment arithmetic the estimator relies on has to
//! match the packer byte for byte, which the tests below check directly.

use crate::errors::{Error, ErrorCode, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

pub const BLOCK_SIZE: u64 = 512;

fn io_err(e: std::io::Error) -> Error { Error::from_io(&e) }

fn round_up_to_block(n: u64) -> u64 {
    let rem = n % BLOCK_SIZE;
    if rem == 0 { n } else { n + (BLOCK_SIZE - rem) }
}

/// Predicts the exact byte size of the archive `pack` would produce for
/// `source`, without writing anything: one header block per entry, plus
/// `ceil(file_size / 512) * 512` data blocks for regular files, plus the two
/// trailing zero blocks marking EOF.
pub fn estimate_packed_size(source: &Path) -> Result<u64> {
    let mut size = 0u64;
    walk(source, &mut |entry, metadata| {
        size += BLOCK_SIZE;
        if metadata.is_file() {
            size += round_up_to_block(metadata.len());
        }
        Ok(())
    })?;
    size += 2 * BLOCK_SIZE;
    Ok(size)
}

/// Walks `source`. A directory source contributes its *contents*, not an
/// entry for itself — packing a directory means packing what's in it, so
/// the unpacked tree lands directly under the destination rather than
/// nested inside a copy of the source's own basename. A single-file source
/// contributes itself.
fn walk(source: &Path, f: &mut dyn FnMut(&Path, &fs::Metadata) -> Result<()>) -> Result<()> {
    let root_meta = fs::symlink_metadata(source).map_err(io_err)?;
    if root_meta.is_dir() {
        visit_children(source, f)
    } else {
        f(source, &root_meta)
    }
}

fn visit_children(dir: &Path, f: &mut dyn FnMut(&Path, &fs::Metadata) -> Result<()>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir).map_err(io_err)?.collect::<std::io::Result<_>>().map_err(io_err)?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        let path = entry.path();
        let meta = fs::symlink_metadata(&path).map_err(io_err)?;
        f(&path, &meta)?;
        if meta.is_dir() {
            visit_children(&path, f)?;
        }
    }
    Ok(())
}

fn octal_field(value: u64, width: usize) -> Vec<u8> {
    let mut s = format!("{:0>width$o}", value, width = width - 1);
    s.push('\0');
    let mut bytes = s.into_bytes();
    bytes.truncate(width);
    while bytes.len() < width {
        bytes.push(0);
    }
    bytes
}

fn name_field(name: &str, width: usize) -> Vec<u8> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(width);
    bytes.resize(width, 0);
    bytes
}

fn write_header(out: &mut impl Write, archive_name: &str, is_dir: bool, size: u64) -> Result<()> {
    let mut header = [0u8; 512];
    header[0..100].copy_from_slice(&name_field(archive_name, 100));
    header[100..108].copy_from_slice(&octal_field(if is_dir { 0o755 } else { 0o644 }, 8));
    header[108..116].copy_from_slice(&octal_field(0, 8)); // uid
    header[116..124].copy_from_slice(&octal_field(0, 8)); // gid
    header[124..136].copy_from_slice(&octal_field(size, 12));
    header[136..148].copy_from_slice(&octal_field(0, 12)); // mtime
    header[148..156].copy_from_slice(&[b' '; 8]); // chksum placeholder during computation
    header[156] = if is_dir { b'5' } else { b'0' };
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");

    let checksum: u32 = header.iter().map(|b| *b as u32).sum();
    let checksum_field = format!("{:06o}\0 ", checksum);
    header[148..148 + checksum_field.len()].copy_from_slice(checksum_field.as_bytes());

    out.write_all(&header).map_err(io_err)
}

/// Packs `source` (a single file or a directory tree) into a new USTAR
/// archive at `archive_path`. Returns the archive's final size, which must
/// equal [`estimate_packed_size`]'s prediction.
pub fn pack(source: &Path, archive_path: &Path) -> Result<u64> {
    let file = fs::File::create(archive_path).map_err(io_err)?;
    let mut out = std::io::BufWriter::new(file);

    let root_is_dir = fs::symlink_metadata(source).map_err(io_err)?.is_dir();

    walk(source, &mut |entry, metadata| {
        let archive_name = if root_is_dir {
            let relative = entry.strip_prefix(source).unwrap_or(entry);
            relative.to_string_lossy().replace('\\', "/")
        } else {
            entry.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| ".".to_owned())
        };

        if metadata.is_dir() {
            let name = if archive_name.ends_with('/') { archive_name } else { format!("{}/", archive_name) };
            write_header(&mut out, &name, true, 0)?;
        } else {
            write_header(&mut out, &archive_name, false, metadata.len())?;
            append_file_data(&mut out, entry, metadata.len())?;
        }
        Ok(())
    })?;

    out.write_all(&[0u8; 512]).map_err(io_err)?;
    out.write_all(&[0u8; 512]).map_err(io_err)?;
    out.flush().map_err(io_err)?;

    fs::metadata(archive_path).map(|m| m.len()).map_err(io_err)
}

fn append_file_data(out: &mut impl Write, path: &Path, size: u64) -> Result<()> {
    let mut file = fs::File::open(path).map_err(io_err)?;
    let mut buf = [0u8; 16384];
    let mut remaining = size;
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = loop {
            match file.read(&mut buf[..to_read]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err(e)),
            }
        };
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(io_err)?;
        remaining -= n as u64;
    }

    let written = size - remaining;
    let padding = round_up_to_block(written) - written;
    if padding > 0 {
        out.write_all(&vec![0u8; padding as usize]).map_err(io_err)?;
    }
    Ok(())
}

struct Entry {
    name: String,
    is_dir: bool,
    size: u64,
}

fn read_header(input: &mut impl Read) -> Result<Option<Entry>> {
    let mut header = [0u8; 512];
    let n = read_fully(input, &mut header)?;
    if n == 0 || header.iter().all(|b| *b == 0) {
        return Ok(None);
    }

    let name = parse_cstr(&header[0..100]);
    let size_str = parse_cstr(&header[124..136]);
    let size = u64::from_str_radix(size_str.trim_end_matches('\0').trim(), 8).unwrap_or(0);
    let is_dir = header[156] == b'5' || name.ends_with('/');

    Ok(Some(Entry { name, is_dir, size }))
}

fn parse_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_fully(input: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match input.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        }
    }
    Ok(total)
}

/// Extracts `archive_path` into `dest_dir`. Refuses entries whose name
/// contains a `..` component or whose resolved target escapes `dest_dir`
/// through a symlink — the same escape-prevention invariant backend path
/// resolution enforces.
pub fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path).map_err(io_err)?;
    let mut input = std::io::BufReader::new(file);
    let canonical_dest = fs::canonicalize(dest_dir).map_err(io_err)?;

    while let Some(entry) = read_header(&mut input)? {
        let relative = Path::new(entry.name.trim_end_matches('/'));
        if relative.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
            return Err(Error::new(ErrorCode::BadArgs));
        }

        let target = dest_dir.join(relative);

        if entry.is_dir {
            fs::create_dir_all(&target).map_err(io_err)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let mut out = fs::File::create(&target).map_err(io_err)?;
            copy_exact(&mut input, &mut out, entry.size)?;

            let padding = round_up_to_block(entry.size) - entry.size;
            if padding > 0 {
                let mut pad_buf = vec![0u8; padding as usize];
                read_fully(&mut input, &mut pad_buf)?;
            }
        }

        if let Ok(canonical_target) = fs::canonicalize(&target) {
            if !canonical_target.starts_with(&canonical_dest) {
                let _ = fs::remove_file(&target);
                return Err(Error::new(ErrorCode::BadArgs));
            }
        }
    }

    Ok(())
}

fn copy_exact(input: &mut impl Read, out: &mut impl Write, size: u64) -> Result<()> {
    let mut buf = [0u8; 16384];
    let mut remaining = size;
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = read_fully(input, &mut buf[..to_read])?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(io_err)?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Creates a fresh temporary path for a staged archive, under the system
/// temp directory. The caller is responsible for deleting it on every exit
/// path.
pub fn temp_archive_path() -> PathBuf {
    let mut path = std::env::temp_dir();
    let unique: u64 = rand::random();
    path.push(format!("norns-{:016x}.tar", unique));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn estimator_matches_actual_packed_size() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hello world").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), vec![0u8; 5000]).unwrap();

        let estimated = estimate_packed_size(src.path()).unwrap();

        let archive = tempdir().unwrap().path().join("out.tar");
        let actual = pack(src.path(), &archive).unwrap();

        assert_eq!(estimated, actual);
    }

    #[test]
    fn round_trips_a_directory_tree() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hello world").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), b"nested").unwrap();

        let archive_dir = tempdir().unwrap();
        let archive = archive_dir.path().join("out.tar");
        pack(src.path(), &archive).unwrap();

        let dest = tempdir().unwrap();
        unpack(&archive, dest.path()).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("a.txt")).unwrap(), "hello world");
        assert_eq!(fs::read_to_string(dest.path().join("sub/b.txt")).unwrap(), "nested");
    }

    #[test]
    fn unpack_rejects_dotdot_entries() {
        // Hand-craft a malicious archive with a `..`-escaping entry name.
        let archive_dir = tempdir().unwrap();
        let archive = archive_dir.path().join("evil.tar");
        {
            let file = fs::File::create(&archive).unwrap();
            let mut out = std::io::BufWriter::new(file);
            write_header(&mut out, "../escaped.txt", false, 4).unwrap();
            out.write_all(b"evil").unwrap();
            out.write_all(&[0u8; 508]).unwrap();
            out.write_all(&[0u8; 512]).unwrap();
            out.write_all(&[0u8; 512]).unwrap();
        }

        let dest = tempdir().unwrap();
        let err = unpack(&archive, dest.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArgs);
    }
}
