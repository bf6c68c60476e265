use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{load_with_fallback, FetchError, JobSource, LoadOutcome};
use crate::storage::SharedStore;

#[derive(Debug)]
pub struct FetchReport {
    pub generation: u64,
    pub result: Result<LoadOutcome, FetchError>,
}

/// Runs loads off the UI thread.
///
/// Requests are never cancelled; every one reports back, and the caller
/// applies reports in arrival order so the last to resolve wins.
pub struct FetchWorker {
    source: Arc<dyn JobSource>,
    store: SharedStore,
    fallback: bool,
    tx: Sender<FetchReport>,
    rx: Receiver<FetchReport>,
    generation: u64,
    in_flight: usize,
}

impl FetchWorker {
    pub fn new(source: Arc<dyn JobSource>, store: SharedStore, fallback: bool) -> Self {
        let (tx, rx) = unbounded();
        Self {
            source,
            store,
            fallback,
            tx,
            rx,
            generation: 0,
            in_flight: 0,
        }
    }

    pub fn request(&mut self) -> Result<u64> {
        self.generation += 1;
        let generation = self.generation;
        let source = Arc::clone(&self.source);
        let store = Arc::clone(&self.store);
        let fallback = self.fallback;
        let tx = self.tx.clone();
        thread::Builder::new()
            .name(format!("jobtui-fetch-{generation}"))
            .spawn(move || {
                let result = load_with_fallback(&*source, &*store, fallback);
                if tx.send(FetchReport { generation, result }).is_err() {
                    tracing::debug!(generation, "fetch finished after the receiver closed");
                }
            })
            .context("spawning fetch thread")?;
        self.in_flight += 1;
        tracing::debug!(generation, in_flight = self.in_flight, "fetch requested");
        Ok(generation)
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn latest_generation(&self) -> u64 {
        self.generation
    }

    /// Drains finished loads and returns the one that resolved last.
    pub fn try_recv(&mut self) -> Option<FetchReport> {
        let mut latest = None;
        while let Ok(report) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            latest = Some(report);
        }
        latest
    }

    /// Blocks until the next load resolves.
    pub fn recv(&mut self) -> Option<FetchReport> {
        if self.in_flight == 0 {
            return None;
        }
        let report = self.rx.recv().ok()?;
        self.in_flight -= 1;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample;
    use crate::source::tests::ScriptedSource;
    use crate::storage::MemoryStore;

    #[test]
    fn reports_every_request() -> Result<()> {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![sample("A", "Org", "", "")]),
            Ok(vec![sample("A", "Org", "", ""), sample("B", "Org", "", "")]),
        ]));
        let mut worker = FetchWorker::new(source, MemoryStore::shared(), true);
        assert!(!worker.is_loading());
        worker.request()?;
        let first = worker.recv().expect("first report");
        assert_eq!(first.generation, 1);
        worker.request()?;
        assert!(worker.is_loading());
        let second = worker.recv().expect("second report");
        assert_eq!(second.generation, 2);
        assert_eq!(second.result.map(|o| o.records.len()).ok(), Some(2));
        assert!(!worker.is_loading());
        assert!(worker.try_recv().is_none());
        Ok(())
    }

    #[test]
    fn try_recv_keeps_only_latest_arrival() -> Result<()> {
        let source = Arc::new(ScriptedSource::new(vec![Ok(Vec::new())]));
        let mut worker = FetchWorker::new(source, MemoryStore::shared(), false);
        worker.request()?;
        worker.request()?;
        while worker.is_loading() {
            if worker.try_recv().is_some() {
                continue;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(worker.latest_generation(), 2);
        Ok(())
    }
}
