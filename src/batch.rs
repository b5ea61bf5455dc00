//! Per-asset results for batch operations, and the optional parallel map that
//! produces them.
//!
//! # Error policy
//! A batch never stops at the first bad asset.  Each item gets its own
//! [`BatchEntry`] holding either its output or its error; callers decide what
//! to print.  Operations that must be all-or-nothing (repacking) do not use a
//! `BatchReport` at all.
//!
//! # Parallelism
//! With the `parallel` feature, [`run_batch`] maps items on Rayon's global
//! pool.  Output order always matches input order.

use std::collections::BTreeMap;
use std::fmt;

/// A short, stable, snake_case label for an error, used to count failures.
pub trait Categorize {
    fn category(&self) -> &'static str;
}

impl Categorize for std::io::Error {
    fn category(&self) -> &'static str {
        "io"
    }
}

#[derive(Debug)]
pub struct BatchEntry<T, E> {
    /// File name or asset label the entry is about.
    pub name:   String,
    pub result: Result<T, E>,
}

#[derive(Debug)]
pub struct BatchReport<T, E> {
    pub entries: Vec<BatchEntry<T, E>>,
}

impl<T, E> Default for BatchReport<T, E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T, E> BatchReport<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, result: Result<T, E>) {
        self.entries.push(BatchEntry { name: name.into(), result });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|t| (e.name.as_str(), t)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &E)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.name.as_str(), err)))
    }
}

impl<T, E: Categorize> BatchReport<T, E> {
    pub fn failure_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for (_, err) in self.failures() {
            *counts.entry(err.category()).or_insert(0) += 1;
        }
        counts
    }
}

impl<T, E: fmt::Display> BatchReport<T, E> {
    /// One line: `12/14 succeeded, 2 failed`.
    pub fn summary(&self) -> String {
        format!("{}/{} succeeded, {} failed", self.succeeded(), self.len(), self.failed())
    }
}

/// Apply `f` to every `(name, item)` pair and collect the results in order.
pub fn run_batch<I, T, E, F>(items: Vec<(String, I)>, f: F) -> BatchReport<T, E>
where
    I: Send,
    T: Send,
    E: Send,
    F: Fn(I) -> Result<T, E> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    let entries = {
        use rayon::prelude::*;
        items
            .into_par_iter()
            .map(|(name, item)| BatchEntry { result: f(item), name })
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let entries = items
        .into_iter()
        .map(|(name, item)| BatchEntry { result: f(item), name })
        .collect();

    BatchReport { entries }
}
