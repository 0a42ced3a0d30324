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
//! Worker pool: a bounded pool of OS threads executing task
//! closures, with an optional epilog run immediately after on the same
//! thread.
//!
//! The engine core is a parallel-OS-thread model
//! with no cooperative-suspend single-thread runtime, so this is built on
//! `std::thread` plus a bounded `crossbeam_channel`, not a `tokio` task
//! pool — `crossbeam-channel` is the same crate `RGB-WG-rgb-node` reaches
//! for to move work between native threads.

use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool of `n` worker threads, processing queued closures in FIFO
/// order. Parallelism is limited only by `n`; queue depth is bounded by the
/// channel capacity so a slow pool applies backpressure to submitters
/// instead of growing without limit.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(n: usize) -> WorkerPool {
        assert!(n > 0, "worker pool must have at least one thread");

        // Queue capacity beyond "one in flight per worker" just smooths
        // bursts; it isn't a correctness requirement.
        let (sender, receiver) = bounded::<Job>(n * 32);

        let handles = (0..n)
            .map(|idx| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("norns-worker-{}", idx))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool { sender: Some(sender), handles }
    }

    /// Submits a closure to run on the next available worker thread.
    pub fn submit_and_forget<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Box::new(job));
    }

    /// Submits a closure and an epilog that runs immediately after it on the
    /// same worker thread. Any subsequent observer synchronizing through the
    /// task-manager's lock is guaranteed to see the epilog's effects (the
    /// lock acquire/release pair is the happens-before edge
    /// requires).
    pub fn submit_with_epilog_and_forget<F, E>(&self, job: F, epilog: E)
    where
        F: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.send(Box::new(move || {
            job();
            epilog();
        }));
    }

    fn send(&self, job: Job) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }

    /// Drains the queue and joins every worker thread. Closures already
    /// queued still run; no new ones may be submitted afterward.
    pub fn stop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) { self.stop(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_work() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            pool.submit_and_forget(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn epilog_runs_after_closure_on_same_thread() {
        let pool = WorkerPool::new(2);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order1 = order.clone();
        let order2 = order.clone();
        pool.submit_with_epilog_and_forget(
            move || order1.lock().unwrap().push("job"),
            move || order2.lock().unwrap().push("epilog"),
        );

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*order.lock().unwrap(), vec!["job", "epilog"]);
    }
}
