// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-parameter job sequencing shared by the exporter and importer.
//!
//! A parameter has at most one job in progress and one queued behind it.
//! Submitting while a job is queued replaces the queued one; the replaced
//! closure is dropped unexecuted, which resolves whatever promise it owned
//! as cancelled. The running job holds a [`LinkCompletion`]; dropping it
//! starts the queued successor on the dropping thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Work scheduled on a parameter link.
pub type LinkJob = Box<dyn FnOnce(LinkCompletion) + Send + 'static>;

/// What [`ParameterLinks::submit`] did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSubmit {
    /// The link was idle; the job ran on the calling thread.
    Started,
    /// Queued behind the job in progress.
    Queued,
    /// Queued, cancelling a previously queued job.
    Replaced,
}

#[derive(Default)]
struct LinkData {
    in_progress: bool,
    queued: Option<LinkJob>,
}

#[derive(Default)]
struct LinkTable {
    links: HashMap<String, LinkData>,
    cancelled: u64,
}

#[derive(Clone, Default)]
pub struct ParameterLinks {
    table: Arc<Mutex<LinkTable>>,
}

impl ParameterLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, param: &str, job: LinkJob) -> LinkSubmit {
        let replaced = {
            let mut table = self.table.lock();
            let link = table.links.entry(param.to_string()).or_default();
            if link.in_progress {
                let replaced = link.queued.replace(job);
                if replaced.is_some() {
                    table.cancelled += 1;
                }
                Some(replaced)
            } else {
                link.in_progress = true;
                drop(table);
                job(LinkCompletion {
                    table: Arc::clone(&self.table),
                    param: param.to_string(),
                });
                return LinkSubmit::Started;
            }
        };

        match replaced {
            Some(Some(stale)) => {
                tracing::debug!(param, "[ParameterLinks] Superseded queued job");
                drop(stale);
                LinkSubmit::Replaced
            }
            _ => LinkSubmit::Queued,
        }
    }

    pub fn in_progress(&self, param: &str) -> bool {
        self.table
            .lock()
            .links
            .get(param)
            .is_some_and(|link| link.in_progress)
    }

    pub fn has_queued(&self, param: &str) -> bool {
        self.table
            .lock()
            .links
            .get(param)
            .is_some_and(|link| link.queued.is_some())
    }

    /// Drop every queued job. Jobs already in progress run to completion.
    pub fn cancel_queued(&self) -> usize {
        let stale: Vec<LinkJob> = {
            let mut table = self.table.lock();
            let stale: Vec<LinkJob> = table
                .links
                .values_mut()
                .filter_map(|link| link.queued.take())
                .collect();
            table.cancelled += stale.len() as u64;
            stale
        };
        let count = stale.len();
        drop(stale);
        count
    }

    /// Queued jobs dropped without running so far.
    pub fn cancelled_jobs(&self) -> u64 {
        self.table.lock().cancelled
    }
}

impl std::fmt::Debug for ParameterLinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("ParameterLinks")
            .field("links", &table.links.len())
            .field("cancelled", &table.cancelled)
            .finish()
    }
}

/// Marks the end of a job's enqueue phase for one parameter.
#[must_use = "dropping the completion releases the parameter link"]
pub struct LinkCompletion {
    table: Arc<Mutex<LinkTable>>,
    param: String,
}

impl LinkCompletion {
    pub fn param(&self) -> &str {
        &self.param
    }
}

impl Drop for LinkCompletion {
    fn drop(&mut self) {
        let next = {
            let mut table = self.table.lock();
            match table.links.get_mut(&self.param) {
                Some(link) => match link.queued.take() {
                    Some(job) => Some(job),
                    None => {
                        table.links.remove(&self.param);
                        None
                    }
                },
                None => None,
            }
        };
        if let Some(job) = next {
            job(LinkCompletion {
                table: Arc::clone(&self.table),
                param: std::mem::take(&mut self.param),
            });
        }
    }
}

impl std::fmt::Debug for LinkCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCompletion").field("param", &self.param).finish()
    }
}
