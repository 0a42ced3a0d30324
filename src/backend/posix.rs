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
//! POSIX-mount-backed backends: plain filesystems, Lustre, and DAX-mounted
//! persistent memory.
//!
//! Lustre and NVML-DAX only differ from a plain POSIX mount in how they
//! describe themselves and account for quota, not in the actual I/O path,
//! so rather than three near-identical structs this backend is
//! parameterized by a [`FilesystemFlavor`] tag; `describe()` and
//! `accepts()` are the only places the flavor ever matters.

use super::Backend;
use crate::errors::{Error, ErrorCode, Result};
use crate::resource::{Resource, ResourceInfo, ResourceKind};
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemFlavor {
    Posix,
    Lustre,
    NvmlDax,
}

impl FilesystemFlavor {
    fn label(self) -> &'static str {
        match self {
            FilesystemFlavor::Posix => "posix-filesystem",
            FilesystemFlavor::Lustre => "lustre",
            FilesystemFlavor::NvmlDax => "nvml-dax",
        }
    }
}

#[derive(Debug)]
pub struct PosixFilesystemBackend {
    nsid: String,
    flavor: FilesystemFlavor,
    mount: PathBuf,
    canonical_mount: PathBuf,
    quota: Option<u64>,
}

impl PosixFilesystemBackend {
    pub fn new(nsid: impl Into<String>, flavor: FilesystemFlavor, mount: impl Into<PathBuf>, quota: Option<u64>) -> Result<PosixFilesystemBackend> {
        let mount = mount.into();
        let canonical_mount = fs::canonicalize(&mount).map_err(|e| Error::from_io(&e))?;
        Ok(PosixFilesystemBackend { nsid: nsid.into(), flavor, mount, canonical_mount, quota })
    }

    /// Lexically joins `name` onto the mount, rejecting any `..` component
    /// that would walk above the mount root. This runs before we ever touch
    /// the filesystem, so a request can't even be used to probe outside the
    /// namespace via a very long chain of `../../..`.
    fn safe_join(&self, name: &Path) -> Option<PathBuf> {
        let mut stack: Vec<std::ffi::OsString> = Vec::new();
        for component in name.components() {
            match component {
                Component::Normal(part) => stack.push(part.to_os_string()),
                Component::CurDir => {},
                Component::ParentDir => {
                    if stack.pop().is_none() {
                        return None;
                    }
                },
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        let mut result = self.mount.clone();
        for part in stack {
            result.push(part);
        }
        Some(result)
    }

    /// Resolves symlinks in an existing path and checks the result still
    /// lives under the mount. This is the actual security invariant: a
    /// lexically clean path can still point outside the mount via a
    /// symlink planted inside it.
    fn canonical_within_mount(&self, candidate: &Path) -> Option<PathBuf> {
        let canonical = fs::canonicalize(candidate).ok()?;
        if canonical.starts_with(&self.canonical_mount) {
            Some(canonical)
        } else {
            None
        }
    }
}

impl Backend for PosixFilesystemBackend {
    fn nsid(&self) -> &str { &self.nsid }

    fn is_tracked(&self) -> bool { true }

    fn is_empty(&self) -> bool {
        fs::read_dir(&self.mount).map(|mut it| it.next().is_none()).unwrap_or(true)
    }

    fn mount(&self) -> Option<&Path> { Some(&self.mount) }

    fn quota(&self) -> Option<u64> { self.quota }

    fn accepts(&self, info: &ResourceInfo) -> bool { info.kind == ResourceKind::LocalPath }

    fn new_resource(&self, info: &ResourceInfo, is_collection: bool) -> Result<Resource> {
        let candidate = self.safe_join(&info.name).ok_or(Error::new(ErrorCode::BadArgs))?;

        let parent = if is_collection { candidate.as_path() } else {
            candidate.parent().unwrap_or(&self.mount)
        };
        fs::create_dir_all(parent).map_err(|e| Error::from_io(&e))?;

        if !is_collection && !candidate.exists() {
            fs::File::create(&candidate).map_err(|e| Error::from_io(&e))?;
        }

        let canonical = self.canonical_within_mount(&candidate).ok_or(Error::new(ErrorCode::BadArgs))?;

        Ok(Resource::LocalPath {
            nsid: self.nsid.clone(),
            canonical_path: canonical,
            name: info.name.clone(),
            is_collection,
        })
    }

    fn get_resource(&self, info: &ResourceInfo) -> Result<Resource> {
        let candidate = self.safe_join(&info.name).ok_or_else(not_found)?;
        let canonical = self.canonical_within_mount(&candidate).ok_or_else(not_found)?;

        let metadata = fs::metadata(&canonical).map_err(|_| not_found())?;

        Ok(Resource::LocalPath {
            nsid: self.nsid.clone(),
            canonical_path: canonical,
            name: info.name.clone(),
            is_collection: metadata.is_dir(),
        })
    }

    fn remove(&self, resource: &Resource) -> Result<()> {
        match resource {
            Resource::LocalPath { canonical_path, is_collection, .. } => {
                let result = if *is_collection {
                    fs::remove_dir_all(canonical_path)
                } else {
                    fs::remove_file(canonical_path)
                };
                result.map_err(|e| Error::from_io(&e))
            },
            _ => Err(Error::new(ErrorCode::BadArgs)),
        }
    }

    fn get_size(&self, info: &ResourceInfo) -> Result<u64> {
        let candidate = self.safe_join(&info.name).ok_or_else(not_found)?;
        let canonical = self.canonical_within_mount(&candidate).ok_or_else(not_found)?;
        let metadata = fs::metadata(&canonical).map_err(|_| not_found())?;
        if metadata.is_dir() {
            // Unresolved until packed; callers treat 0 as "unknown".
            Ok(0)
        } else {
            Ok(metadata.len())
        }
    }

    fn describe(&self) -> String {
        format!("{}[{}]@{}", self.flavor.label(), self.nsid, self.mount.display())
    }
}

fn not_found() -> Error { Error::new(ErrorCode::BadArgs) }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn backend() -> (tempfile::TempDir, PosixFilesystemBackend) {
        let dir = tempdir().unwrap();
        let backend = PosixFilesystemBackend::new("ns0", FilesystemFlavor::Posix, dir.path(), Some(16384)).unwrap();
        (dir, backend)
    }

    #[test]
    fn new_resource_creates_parent_dirs() {
        let (_dir, backend) = backend();
        let info = ResourceInfo::local_path("ns0", "a/b/c/file");
        let resource = backend.new_resource(&info, false).unwrap();
        match resource {
            Resource::LocalPath { is_collection, .. } => assert!(!is_collection),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn get_resource_rejects_dotdot_escape() {
        let (_dir, backend) = backend();
        let info = ResourceInfo::local_path("ns0", "../../../etc/passwd");
        let err = backend.get_resource(&info).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArgs);
    }

    #[test]
    fn get_resource_rejects_symlink_escape() {
        let (dir, backend) = backend();
        let outside = tempdir().unwrap();
        let secret = outside.path().join("secret");
        fs::write(&secret, b"nope").unwrap();

        let link = dir.path().join("escape");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let info = ResourceInfo::local_path("ns0", "escape");
        let err = backend.get_resource(&info).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArgs);
    }

    #[test]
    fn get_size_is_zero_for_directories() {
        let (_dir, backend) = backend();
        let info = ResourceInfo::local_path("ns0", "subdir");
        backend.new_resource(&info, true).unwrap();
        assert_eq!(backend.get_size(&info).unwrap(), 0);
    }
}
