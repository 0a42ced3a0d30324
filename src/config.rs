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
//! Daemon configuration.
//!
//! The exact YAML schema is intentionally unspecified by the task engine;
//! this module only fixes the keys the engine itself consumes. Loading goes
//! through the `config` crate layered behind a plain `Configuration` struct,
//! pointed at YAML.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

fn default_workers() -> usize { 8 }
fn default_dry_run() -> bool { false }
fn default_dry_run_duration_ms() -> u64 { 250 }
fn default_bandwidth_backlog_capacity() -> usize { 20 }
fn default_global_socket() -> PathBuf { PathBuf::from("/tmp/norns.sock") }
fn default_peer_listen_addr() -> SocketAddr { "0.0.0.0:50505".parse().expect("valid default address") }

/// Daemon-wide configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Unix-domain socket the request/response protocol listens on. The only
    /// option a conforming config file is required to set; everything else
    /// below has a usable default.
    #[serde(default = "default_global_socket")]
    pub global_socket: PathBuf,

    /// Worker-pool thread count.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Address the peer-to-peer RPC server binds for inter-node pushes and
    /// pulls.
    #[serde(default = "default_peer_listen_addr")]
    pub peer_listen_addr: SocketAddr,

    /// When set, every admitted task is rewritten to `Noop` and merely
    /// sleeps for `dry_run_duration_ms`, split into two phases.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    #[serde(default = "default_dry_run_duration_ms")]
    pub dry_run_duration_ms: u64,

    /// Capacity of each `(src_nsid, dst_nsid)` bandwidth ring buffer.
    #[serde(default = "default_bandwidth_backlog_capacity")]
    pub bandwidth_backlog_capacity: usize,

    /// Optional pidfile path, written on startup and removed on clean exit.
    pub pidfile: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            global_socket: default_global_socket(),
            workers: default_workers(),
            peer_listen_addr: default_peer_listen_addr(),
            dry_run: default_dry_run(),
            dry_run_duration_ms: default_dry_run_duration_ms(),
            bandwidth_backlog_capacity: default_bandwidth_backlog_capacity(),
            pidfile: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(config::ConfigError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read configuration file: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Configuration {
    /// Loads configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let source = config::File::from(path).format(config::FileFormat::Yaml);
        let built = config::Config::builder()
            .add_source(source)
            .build()
            .map_err(ConfigError::Parse)?;
        built.try_deserialize().map_err(ConfigError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Configuration::default();
        assert_eq!(cfg.workers, 8);
        assert!(!cfg.dry_run);
        assert_eq!(cfg.bandwidth_backlog_capacity, 20);
    }
}
