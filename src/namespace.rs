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
//! Namespace registry: maps `nsid -> backend`.

use crate::backend::SharedBackend;
use crate::errors::{Error, ErrorCode, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Maps `nsid -> backend`. Reads (lookups) are shared; registration and
/// unregistration take exclusive access.
#[derive(Default)]
pub struct NamespaceRegistry {
    backends: RwLock<HashMap<String, SharedBackend>>,
}

impl NamespaceRegistry {
    pub fn new() -> NamespaceRegistry { NamespaceRegistry::default() }

    pub fn register(&self, nsid: &str, backend: SharedBackend) -> Result<()> {
        if nsid.is_empty() {
            return Err(Error::new(ErrorCode::BadArgs));
        }

        let mut backends = self.backends.write().expect("namespace registry poisoned");
        if backends.contains_key(nsid) {
            return Err(Error::new(ErrorCode::NamespaceExists));
        }
        backends.insert(nsid.to_owned(), backend);
        Ok(())
    }

    /// Reserved: validates that the namespace exists, then always returns
    /// *not-supported*. Swapping a live namespace's backend out from under
    /// in-flight tasks isn't safe, so this stays a no-op rather than
    /// inventing replace semantics.
    pub fn update(&self, nsid: &str, _backend: SharedBackend) -> Result<()> {
        let backends = self.backends.read().expect("namespace registry poisoned");
        if !backends.contains_key(nsid) {
            return Err(Error::new(ErrorCode::NoSuchNamespace));
        }
        Err(Error::new(ErrorCode::NotSupported))
    }

    pub fn unregister(&self, nsid: &str) -> Result<()> {
        let mut backends = self.backends.write().expect("namespace registry poisoned");
        if backends.remove(nsid).is_none() {
            return Err(Error::new(ErrorCode::NoSuchNamespace));
        }
        Ok(())
    }

    pub fn lookup(&self, nsid: &str) -> Option<SharedBackend> {
        let backends = self.backends.read().expect("namespace registry poisoned");
        backends.get(nsid).cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.read().expect("namespace registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilesystemFlavor, PosixFilesystemBackend};
    use std::sync::Arc;

    fn dummy_backend(nsid: &str) -> SharedBackend {
        let dir = tempfile::tempdir().unwrap();
        // Leak the tempdir so the mount stays alive for the test's duration.
        let path = dir.into_path();
        Arc::new(PosixFilesystemBackend::new(nsid, FilesystemFlavor::Posix, path, None).unwrap())
    }

    #[test]
    fn register_then_duplicate_fails() {
        let registry = NamespaceRegistry::new();
        registry.register("ns0", dummy_backend("ns0")).unwrap();
        let err = registry.register("ns0", dummy_backend("ns0")).unwrap_err();
        assert_eq!(err.code, ErrorCode::NamespaceExists);
    }

    #[test]
    fn unregister_missing_fails() {
        let registry = NamespaceRegistry::new();
        let err = registry.unregister("missing").unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchNamespace);
    }

    #[test]
    fn update_is_not_supported() {
        let registry = NamespaceRegistry::new();
        registry.register("ns0", dummy_backend("ns0")).unwrap();
        let err = registry.update("ns0", dummy_backend("ns0")).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotSupported);
    }

    #[test]
    fn lookup_after_unregister_is_none() {
        let registry = NamespaceRegistry::new();
        registry.register("ns0", dummy_backend("ns0")).unwrap();
        registry.unregister("ns0").unwrap();
        assert!(registry.lookup("ns0").is_none());
    }
}
