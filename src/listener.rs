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
//! Client-facing control listener: a Unix domain socket, accepted one
//! connection at a time on the calling thread (the listener itself is
//! not part of the parallel worker pool; only task execution is).

use crate::engine::Engine;
use crate::protocol::{read_message, write_message, Request};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;

pub fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    UnixListener::bind(socket_path)
}

/// Accepts connections until `shutdown_requested` flags the engine as
/// shutting down. Each connection is served synchronously to completion
/// before the next `accept()` call.
pub fn run(listener: UnixListener, engine: Arc<Engine>) {
    for incoming in listener.incoming() {
        if engine.is_shutting_down() {
            break;
        }

        match incoming {
            Ok(stream) => serve_connection(stream, &engine),
            Err(e) => log::warn!("failed to accept control connection: {}", e),
        }
    }
}

fn serve_connection(mut stream: UnixStream, engine: &Engine) {
    loop {
        let request: Request = match read_message(&mut stream) {
            Ok(r) => r,
            Err(_) => return,
        };

        let gate_check =
            if matches!(request, Request::SubmitTask { .. }) { engine.accept_gate.check() } else { Ok(()) };

        let response = match gate_check {
            Ok(()) => engine.handle_request(request),
            Err(e) => crate::protocol::Response::Err { code: e.code, sys_errno: e.sys_errno },
        };

        if write_message(&mut stream, &response).is_err() {
            return;
        }
    }
}
