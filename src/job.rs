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
//! Job registry: maps `jobid -> {hosts, quotas, processes}`.

use crate::errors::{Error, ErrorCode, Result};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Host(pub String);

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NamespaceLimit {
    pub nsid: String,
    pub quota: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProcessCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub hosts: Vec<Host>,
    pub limits: Vec<NamespaceLimit>,
    pub processes: HashSet<ProcessCredentials>,
}

impl Job {
    fn validate(hosts: &[Host], limits: &[NamespaceLimit]) -> Result<()> {
        if hosts.is_empty() || limits.is_empty() {
            return Err(Error::new(ErrorCode::BadArgs));
        }
        Ok(())
    }
}

/// Maps `jobid -> Job`. Registration lifecycle is
/// `register -> update* -> (add/remove process)* -> unregister`.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<u32, Job>>,
}

impl JobRegistry {
    pub fn new() -> JobRegistry { JobRegistry::default() }

    pub fn register(&self, jobid: u32, hosts: Vec<Host>, limits: Vec<NamespaceLimit>) -> Result<()> {
        Job::validate(&hosts, &limits)?;

        let mut jobs = self.jobs.write().expect("job registry poisoned");
        if jobs.contains_key(&jobid) {
            return Err(Error::new(ErrorCode::BadArgs));
        }
        jobs.insert(jobid, Job { hosts, limits, processes: HashSet::new() });
        Ok(())
    }

    pub fn update(&self, jobid: u32, hosts: Vec<Host>, limits: Vec<NamespaceLimit>) -> Result<()> {
        Job::validate(&hosts, &limits)?;

        let mut jobs = self.jobs.write().expect("job registry poisoned");
        let job = jobs.get_mut(&jobid).ok_or(Error::new(ErrorCode::NoSuchJob))?;
        job.hosts = hosts;
        job.limits = limits;
        Ok(())
    }

    pub fn unregister(&self, jobid: u32) -> Result<()> {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        // Unregister succeeds even if processes remain attached; there is
        // no cross-reference to an in-flight task that would forbid it.
        jobs.remove(&jobid).ok_or(Error::new(ErrorCode::NoSuchJob)).map(|_| ())
    }

    pub fn add_process(&self, jobid: u32, creds: ProcessCredentials) -> Result<()> {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        let job = jobs.get_mut(&jobid).ok_or(Error::new(ErrorCode::NoSuchJob))?;
        job.processes.insert(creds);
        Ok(())
    }

    pub fn remove_process(&self, jobid: u32, creds: ProcessCredentials) -> Result<()> {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        let job = jobs.get_mut(&jobid).ok_or(Error::new(ErrorCode::NoSuchJob))?;
        job.processes.remove(&creds);
        Ok(())
    }

    pub fn quota_for(&self, jobid: u32, nsid: &str) -> Option<u32> {
        let jobs = self.jobs.read().expect("job registry poisoned");
        jobs.get(&jobid)?.limits.iter().find(|l| l.nsid == nsid).map(|l| l.quota)
    }

    pub fn contains(&self, jobid: u32) -> bool {
        self.jobs.read().expect("job registry poisoned").contains_key(&jobid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> (Vec<Host>, Vec<NamespaceLimit>) {
        (vec![Host("node0".into())], vec![NamespaceLimit { nsid: "ns0".into(), quota: 16384 }])
    }

    #[test]
    fn register_requires_nonempty_hosts_and_limits() {
        let registry = JobRegistry::new();
        let err = registry.register(1, vec![], vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArgs);
    }

    #[test]
    fn unregister_deletes_even_with_processes_attached() {
        let registry = JobRegistry::new();
        let (hosts, lims) = limits();
        registry.register(1, hosts, lims).unwrap();
        registry.add_process(1, ProcessCredentials { uid: 0, gid: 0, pid: 42 }).unwrap();
        registry.unregister(1).unwrap();
        assert!(!registry.contains(1));
    }

    #[test]
    fn add_process_requires_existing_job() {
        let registry = JobRegistry::new();
        let err = registry.add_process(99, ProcessCredentials { uid: 0, gid: 0, pid: 1 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchJob);
    }
}
