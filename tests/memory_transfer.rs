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
//! Exercises the process-memory backend against the current process's own
//! address space: `process_vm_readv` on Linux permits a process to read its
//! own memory the same way it would read another process's, so this needs
//! no helper child process to be a faithful end-to-end check.

use norns::config::Configuration;
use norns::engine::Engine;
use norns::job::ProcessCredentials;
use norns::protocol::{BackendSpec, PosixFlavorWire, Request, Response};
use norns::resource::ResourceInfo;
use norns::task::TaskKind;
use std::sync::Arc;

fn test_engine() -> (tokio::runtime::Runtime, Arc<Engine>) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = Configuration::default();
    let engine = Arc::new(Engine::new(&config, runtime.handle().clone()));
    (runtime, engine)
}

#[test]
#[cfg(target_os = "linux")]
fn copies_a_region_of_the_current_process_into_a_local_file() {
    let (_rt, engine) = test_engine();
    let dst = tempfile::tempdir().unwrap();

    let response = engine.handle_request(Request::RegisterNamespace {
        nsid: "dst".into(),
        backend: BackendSpec::Posix { flavor: PosixFlavorWire::Posix, mount: dst.path().to_owned(), quota: None },
    });
    assert!(matches!(response, Response::Ok));

    // A stack buffer with a recognizable pattern; its address, taken from
    // inside this same process, is what the region descriptor points at.
    let pattern: [u8; 4096] = {
        let mut buf = [0u8; 4096];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        buf
    };
    let address = pattern.as_ptr() as u64;

    let submitted = engine.handle_request(Request::SubmitTask {
        kind: TaskKind::Copy,
        credentials: ProcessCredentials { uid: 0, gid: 0, pid: std::process::id() },
        src: ResourceInfo::memory_region(address, pattern.len()),
        dst: ResourceInfo::local_path("dst", "region.bin"),
    });
    let task_id = match submitted {
        Response::TaskSubmitted { task_id } => task_id,
        other => panic!("unexpected response: {:?}", other),
    };

    let stats = loop {
        match engine.handle_request(Request::TaskStatus { task_id }) {
            Response::TaskStats(stats) if stats.status.is_terminal() => break stats,
            Response::TaskStats(_) => std::thread::sleep(std::time::Duration::from_millis(10)),
            other => panic!("unexpected response: {:?}", other),
        }
    };
    assert_eq!(stats.status, norns::task::TaskStatus::Finished, "memory copy did not finish cleanly: {:?}", stats);
    assert_eq!(stats.total_bytes, pattern.len() as u64);
    assert_eq!(stats.pending_bytes, 0, "all bytes should have been sent by the time the task finished");

    let copied = std::fs::read(dst.path().join("region.bin")).unwrap();
    assert_eq!(copied, pattern);

    // Keep `pattern` alive through the whole transfer; the backend only
    // holds its address, not a reference, so an early drop would be a
    // genuine use-after-free of the source.
    drop(pattern);
}
