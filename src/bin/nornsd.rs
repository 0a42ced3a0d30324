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
//! `nornsd`: the per-node staging daemon entrypoint.

use clap::Parser;
use norns::config::Configuration;
use norns::engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "nornsd", about = "Per-node I/O staging daemon")]
struct Cli {
    /// Path to a YAML configuration file. Missing values fall back to
    /// defaults; there is no required key.
    #[arg(long, env = "NORNS_CONFIG")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = norns::logging::init();

    let config = match &cli.config {
        Some(path) => match Configuration::load(path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("failed to load configuration from {}: {}", path.display(), e);
                std::process::exit(1);
            },
        },
        None => Configuration::default(),
    };

    if let Some(pidfile) = &config.pidfile {
        if let Err(e) = std::fs::write(pidfile, std::process::id().to_string()) {
            log::warn!("failed to write pidfile {}: {}", pidfile.display(), e);
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the async runtime backing the peer rpc layer");

    let engine = Arc::new(Engine::new(&config, runtime.handle().clone()));

    install_signal_handlers(engine.clone());

    let peer_listener = runtime
        .block_on(tokio::net::TcpListener::bind(config.peer_listen_addr))
        .unwrap_or_else(|e| panic!("failed to bind peer rpc listener on {}: {}", config.peer_listen_addr, e));

    let peer_namespaces = engine.namespaces.clone();
    runtime.spawn(norns::rpc::run_peer_server(peer_listener, peer_namespaces));

    let control_listener = norns::listener::bind(&config.global_socket)
        .unwrap_or_else(|e| panic!("failed to bind control socket {}: {}", config.global_socket.display(), e));

    log::info!(
        "nornsd listening: control={} peer={} workers={}",
        config.global_socket.display(),
        config.peer_listen_addr,
        config.workers
    );

    norns::listener::run(control_listener, engine);

    if let Some(pidfile) = &config.pidfile {
        let _ = std::fs::remove_file(pidfile);
    }
}

/// Installs a `SIGTERM`/`SIGINT` handler that flips the engine into
/// shutting-down state; the control listener notices on its next loop
/// iteration and stops accepting. It does not forcibly interrupt
/// in-flight tasks.
fn install_signal_handlers(engine: Arc<Engine>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGTERM, SIGINT]).expect("failed to register signal handlers");
    std::thread::spawn(move || {
        for signal in signals.forever() {
            log::info!("received signal {}, shutting down", signal);
            engine.accept_gate.pause();
            if engine.request_shutdown().is_err() {
                log::warn!("tasks still pending; deferring shutdown");
                engine.accept_gate.resume();
                continue;
            }
            break;
        }
    });
}
