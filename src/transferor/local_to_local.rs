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
//! G.1: local path -> local path. Both resources live under backends on this
//! node, so no wire is involved; a move tries a plain rename first and only
//! falls back to copy-then-remove when the two mounts differ.

use super::Transferor;
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceKind};
use crate::task::{TaskInfo, TaskKind};
use std::fs;
use std::path::Path;

pub struct LocalPathToLocalTransferor;

impl Transferor for LocalPathToLocalTransferor {
    fn validate(&self, task: &TaskInfo) -> bool {
        task.src_info.kind == ResourceKind::LocalPath && task.dst_info.kind == ResourceKind::LocalPath
    }

    fn transfer(&self, task: &TaskInfo) -> Result<()> {
        let src = task.src_backend.get_resource(&task.src_info)?;
        let src_path = match &src {
            Resource::LocalPath { canonical_path, .. } => canonical_path.clone(),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };
        let is_collection = src.is_collection();

        let dst = task.dst_backend.new_resource(&task.dst_info, is_collection)?;
        let dst_path = match &dst {
            Resource::LocalPath { canonical_path, .. } => canonical_path.clone(),
            _ => return Err(Error::new(ErrorCode::BadArgs)),
        };

        match task.kind {
            TaskKind::Copy => copy_tree(task, &src_path, &dst_path),
            TaskKind::Move => move_tree(task, &src_path, &dst_path),
            TaskKind::Remove => {
                task.src_backend.remove(&src)?;
                Ok(())
            },
            _ => Err(Error::new(ErrorCode::BadArgs)),
        }
    }
}

fn total_size(path: &Path) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| total_size(&e.path())).sum())
            .unwrap_or(0),
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}

fn copy_tree(task: &TaskInfo, src: &Path, dst: &Path) -> Result<()> {
    task.set_total_bytes(total_size(src));
    copy_tree_inner(task, src, dst)
}

fn copy_tree_inner(task: &TaskInfo, src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|e| Error::from_io(&e))?;
    if meta.is_dir() {
        fs::create_dir_all(dst).map_err(|e| Error::from_io(&e))?;
        let mut entries: Vec<_> =
            fs::read_dir(src).map_err(|e| Error::from_io(&e))?.collect::<std::io::Result<_>>().map_err(|e| Error::from_io(&e))?;
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            copy_tree_inner(task, &entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        let n = fs::copy(src, dst).map_err(|e| Error::from_io(&e))?;
        task.add_sent_bytes(n);
    }
    Ok(())
}

fn move_tree(task: &TaskInfo, src: &Path, dst: &Path) -> Result<()> {
    let size = total_size(src);
    task.set_total_bytes(size);

    match fs::rename(src, dst) {
        Ok(()) => {
            task.add_sent_bytes(size);
            Ok(())
        },
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            copy_tree_inner(task, src, dst)?;
            fs::remove_dir_all(src).or_else(|_| fs::remove_file(src)).map_err(|e| Error::from_io(&e))
        },
        Err(e) => Err(Error::from_io(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilesystemFlavor, PosixFilesystemBackend};
    use crate::job::ProcessCredentials;
    use crate::resource::ResourceInfo;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn task(src_dir: &Path, dst_dir: &Path, kind: TaskKind) -> TaskInfo {
        let src_backend: crate::backend::SharedBackend =
            Arc::new(PosixFilesystemBackend::new("src", FilesystemFlavor::Posix, src_dir, None).unwrap());
        let dst_backend: crate::backend::SharedBackend =
            Arc::new(PosixFilesystemBackend::new("dst", FilesystemFlavor::Posix, dst_dir, None).unwrap());

        TaskInfo::new(
            1,
            kind,
            false,
            ProcessCredentials { uid: 0, gid: 0, pid: 0 },
            src_backend,
            ResourceInfo::local_path("src", "a.txt"),
            dst_backend,
            ResourceInfo::local_path("dst", "a.txt"),
            0,
        )
    }

    #[test]
    fn copies_a_single_file() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        fs::write(src_dir.path().join("a.txt"), b"payload").unwrap();

        let task = task(src_dir.path(), dst_dir.path(), TaskKind::Copy);
        let transferor = LocalPathToLocalTransferor;
        assert!(transferor.validate(&task));
        transferor.transfer(&task).unwrap();

        assert_eq!(fs::read_to_string(dst_dir.path().join("a.txt")).unwrap(), "payload");
        assert_eq!(task.sent_bytes(), 7);
    }

    #[test]
    fn moves_across_mounts_with_copy_then_remove_fallback() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        fs::write(src_dir.path().join("a.txt"), b"payload").unwrap();

        let task = task(src_dir.path(), dst_dir.path(), TaskKind::Move);
        let transferor = LocalPathToLocalTransferor;
        transferor.transfer(&task).unwrap();

        assert!(!src_dir.path().join("a.txt").exists());
        assert_eq!(fs::read_to_string(dst_dir.path().join("a.txt")).unwrap(), "payload");
    }
}
