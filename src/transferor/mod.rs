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
//! Transferor registry and the five concrete strategies
//!

mod local_to_local;
mod local_to_remote;
mod memory_to_local;
mod memory_to_remote;
mod remote_to_local;

pub use local_to_local::LocalPathToLocalTransferor;
pub use local_to_remote::LocalPathToRemoteTransferor;
pub use memory_to_local::MemoryToLocalTransferor;
pub use memory_to_remote::MemoryToRemoteTransferor;
pub use remote_to_local::RemoteToLocalTransferor;

use crate::errors::Result;
use crate::resource::ResourceKind;
use crate::task::TaskInfo;
use std::collections::HashMap;
use std::sync::Arc;

/// A strategy that moves bytes for a given `(src_kind, dst_kind)` pair.
pub trait Transferor: Send + Sync {
    fn validate(&self, task: &TaskInfo) -> bool;

    /// Performs the transfer, updating `task`'s progress fields as bytes
    /// move. Returns `Ok(())` on success; any failure is surfaced as the
    /// task's terminal error by the caller, not retried.
    fn transfer(&self, task: &TaskInfo) -> Result<()>;
}

/// Dispatch matrix indexed by `(src_kind, dst_kind)`. Lookup for
/// remote-initiated tasks uses the swapped order `(dst_kind, src_kind)`
/// because the initiating side has already acted.
#[derive(Default)]
pub struct TransferorRegistry {
    strategies: HashMap<(ResourceKind, ResourceKind), Arc<dyn Transferor>>,
}

impl TransferorRegistry {
    pub fn new() -> TransferorRegistry { TransferorRegistry::default() }

    pub fn install(&mut self, src: ResourceKind, dst: ResourceKind, strategy: Arc<dyn Transferor>) {
        self.strategies.insert((src, dst), strategy);
    }

    pub fn lookup(&self, src: ResourceKind, dst: ResourceKind, remote_initiated: bool) -> Option<Arc<dyn Transferor>> {
        let key = if remote_initiated { (dst, src) } else { (src, dst) };
        self.strategies.get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_swaps_order_for_remote_initiated_tasks() {
        let mut registry = TransferorRegistry::new();
        let strategy: Arc<dyn Transferor> = Arc::new(LocalPathToLocalTransferor);
        registry.install(ResourceKind::LocalPath, ResourceKind::LocalPath, strategy);

        assert!(registry.lookup(ResourceKind::LocalPath, ResourceKind::LocalPath, false).is_some());
        assert!(registry.lookup(ResourceKind::Remote, ResourceKind::MemoryRegion, false).is_none());
    }
}
