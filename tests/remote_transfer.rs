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
//! Exercises an actual directory push across the peer RPC wire between two
//! independently wired engines bound to different localhost ports.

use norns::config::Configuration;
use norns::engine::Engine;
use norns::job::ProcessCredentials;
use norns::protocol::{BackendSpec, PosixFlavorWire, Request, Response};
use norns::resource::ResourceInfo;
use norns::task::TaskKind;
use std::sync::Arc;

fn creds() -> ProcessCredentials { ProcessCredentials { uid: 0, gid: 0, pid: std::process::id() } }

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pushes_a_directory_tree_to_a_peer_node() {
    let sender_dir = tempfile::tempdir().unwrap();
    let receiver_dir = tempfile::tempdir().unwrap();

    std::fs::write(sender_dir.path().join("a.txt"), b"hello").unwrap();
    std::fs::create_dir(sender_dir.path().join("sub")).unwrap();
    std::fs::write(sender_dir.path().join("sub/b.txt"), b"world").unwrap();

    let mut receiver_config = Configuration::default();
    receiver_config.peer_listen_addr = "127.0.0.1:0".parse().unwrap();
    let receiver_engine = Arc::new(Engine::new(&receiver_config, tokio::runtime::Handle::current()));
    let receiver_listener = tokio::net::TcpListener::bind(receiver_config.peer_listen_addr).await.unwrap();
    let receiver_addr = receiver_listener.local_addr().unwrap();
    tokio::spawn(norns::rpc::run_peer_server(receiver_listener, receiver_engine.namespaces.clone()));

    assert!(matches!(
        receiver_engine.handle_request(Request::RegisterNamespace {
            nsid: "landing".into(),
            backend: BackendSpec::Posix { flavor: PosixFlavorWire::Posix, mount: receiver_dir.path().to_owned(), quota: None },
        }),
        Response::Ok
    ));

    let sender_config = Configuration::default();
    let sender_engine = Arc::new(Engine::new(&sender_config, tokio::runtime::Handle::current()));
    assert!(matches!(
        sender_engine.handle_request(Request::RegisterNamespace {
            nsid: "source".into(),
            backend: BackendSpec::Posix { flavor: PosixFlavorWire::Posix, mount: sender_dir.path().to_owned(), quota: None },
        }),
        Response::Ok
    ));

    let submitted = sender_engine.handle_request(Request::SubmitTask {
        kind: TaskKind::Copy,
        credentials: creds(),
        src: ResourceInfo::local_path("source", "."),
        dst: ResourceInfo::remote("landing", "pushed", receiver_addr),
    });
    let task_id = match submitted {
        Response::TaskSubmitted { task_id } => task_id,
        other => panic!("unexpected response: {:?}", other),
    };

    for _ in 0..100 {
        match sender_engine.handle_request(Request::TaskStatus { task_id }) {
            Response::TaskStats(stats) if stats.status.is_terminal() => break,
            _ => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
        }
    }

    let stats = match sender_engine.handle_request(Request::TaskStatus { task_id }) {
        Response::TaskStats(stats) => stats,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(stats.status, norns::task::TaskStatus::Finished, "push task did not finish cleanly: {:?}", stats);

    assert_eq!(std::fs::read_to_string(receiver_dir.path().join("pushed/a.txt")).unwrap(), "hello");
    assert_eq!(std::fs::read_to_string(receiver_dir.path().join("pushed/sub/b.txt")).unwrap(), "world");
}
