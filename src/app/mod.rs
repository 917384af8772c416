//! The facade the interactive side talks to.
//!
//! `App` owns the index, the workers and the event channel. Every call
//! returns immediately; outcomes arrive later as [`Event`]s drained with
//! [`App::poll_events`].

pub mod errors;
pub mod task_runner;

use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex, PoisonError, RwLock},
    thread::JoinHandle,
};

use crate::{
    config::Config,
    lock::{PassLock, StopSignal},
    semantic::{
        DocumentExtractor, Embedder, HttpEmbedder, IncrementalIndexer, IndexStore, PassPlan,
        PassReport, SearchEngine, SearchError, SearchResults, TextExtractor,
    },
    storage::BackendLocal,
};

pub use errors::AppError;
pub use task_runner::{Event, IndexStatus, PassKind};

/// Capacity of the worker -> interactive side channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// A pass was already running; nothing was queued.
    AlreadyRunning,
}

pub struct App {
    config: Arc<RwLock<Config>>,
    store: Arc<IndexStore>,
    indexer: Arc<IncrementalIndexer>,
    engine: Arc<SearchEngine>,
    pass_lock: PassLock,
    /// Stops the continuous worker
    continuous_stop: StopSignal,
    /// Stops everything, on-demand passes included
    shutdown: StopSignal,
    events_tx: mpsc::SyncSender<Event>,
    events_rx: Mutex<mpsc::Receiver<Event>>,
    continuous: Mutex<Option<JoinHandle<()>>>,
    on_demand: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Build an app talking to the configured embedding service.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let embedder = HttpEmbedder::from_config(&config)?;
        Self::new(config, Arc::new(embedder), Arc::new(DocumentExtractor))
    }

    /// Build an app with the given collaborators. Loads the persisted index.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self, AppError> {
        let backend = Arc::new(BackendLocal::new(config.base_path())?);
        let store = Arc::new(IndexStore::open(backend, &config.index_file));

        let indexer = Arc::new(IncrementalIndexer::from_config(
            &config,
            store.clone(),
            embedder.clone(),
            extractor,
        ));
        let engine = Arc::new(SearchEngine::from_config(&config, store.clone(), embedder));

        let (events_tx, events_rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            indexer,
            engine,
            pass_lock: PassLock::new(),
            continuous_stop: StopSignal::new(),
            shutdown: StopSignal::new(),
            events_tx,
            events_rx: Mutex::new(events_rx),
            continuous: Mutex::new(None),
            on_demand: Mutex::new(vec![]),
        })
    }

    pub fn config(&self) -> Arc<RwLock<Config>> {
        self.config.clone()
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn is_indexing(&self) -> bool {
        self.pass_lock.is_busy()
    }

    fn worker_context(&self) -> task_runner::WorkerContext {
        task_runner::WorkerContext {
            config: self.config.clone(),
            indexer: self.indexer.clone(),
            pass_lock: self.pass_lock.clone(),
            events: self.events_tx.clone(),
        }
    }

    /// Start the background worker. Returns false if it is already running
    /// or was stopped before.
    pub fn start_continuous_indexing(&self) -> bool {
        if self.continuous_stop.is_stopped() {
            return false;
        }

        let mut handle = self.continuous.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return false;
        }

        *handle = Some(task_runner::spawn_continuous(
            self.worker_context(),
            self.continuous_stop.clone(),
        ));
        true
    }

    /// Stop the background worker and wait for it to exit. A pass in flight
    /// ends after the current file and still saves. Safe to call repeatedly.
    pub fn stop_continuous_indexing(&self) {
        if self.continuous_stop.stop() {
            log::info!("stopping continuous indexing");
        }

        let handle = self
            .continuous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.join() {
                log::error!("continuous worker panicked: {err:?}");
            }
        }
    }

    /// Stop every worker, on-demand passes included, and wait for them. A
    /// pass in flight ends after the current file and still saves.
    pub fn shutdown(&self) {
        self.shutdown.stop();
        self.stop_continuous_indexing();

        let handles = std::mem::take(
            &mut *self.on_demand.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(err) = handle.join() {
                log::error!("on-demand worker panicked: {err:?}");
            }
        }
    }

    /// Index `roots` in the background. Turned away without queuing while
    /// any pass runs. The roots are remembered so the continuous pass keeps
    /// them up to date from then on.
    pub fn start_manual_index(&self, roots: Vec<PathBuf>) -> TriggerOutcome {
        let Some(permit) = self.pass_lock.try_acquire() else {
            log::info!("indexing already in progress, ignoring request");
            return TriggerOutcome::AlreadyRunning;
        };

        let plan = PassPlan::on_demand(absolute_roots(roots));
        let handle =
            task_runner::spawn_on_demand(self.worker_context(), plan, self.shutdown.clone(), permit);

        let mut handles = self.on_demand.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);

        TriggerOutcome::Started
    }

    /// Index `roots` on the calling thread.
    pub fn run_manual_index_blocking(&self, roots: Vec<PathBuf>) -> Result<PassReport, AppError> {
        let permit = self.pass_lock.try_acquire().ok_or(AppError::PassInProgress)?;
        let roots = absolute_roots(roots);
        task_runner::remember_roots(&self.config, &roots);
        let plan = PassPlan::on_demand(roots);
        task_runner::run_pass(
            &self.worker_context(),
            PassKind::OnDemand,
            &plan,
            &self.shutdown,
            permit,
        )
    }

    /// Run one continuous-style pass over the configured folders on the
    /// calling thread.
    pub fn run_pass_blocking(&self) -> Result<PassReport, AppError> {
        let permit = self.pass_lock.try_acquire().ok_or(AppError::PassInProgress)?;
        let plan = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            PassPlan::continuous(&config)
        };
        task_runner::run_pass(
            &self.worker_context(),
            PassKind::Continuous,
            &plan,
            &self.shutdown,
            permit,
        )
    }

    /// Search in the background; the outcome arrives as an event.
    pub fn search(&self, query: &str) {
        task_runner::spawn_search(self.engine.clone(), self.events_tx.clone(), query.to_string());
    }

    pub fn search_blocking(&self, query: &str) -> Result<SearchResults, SearchError> {
        self.engine.search(query)
    }

    /// Drain every pending event without waiting.
    pub fn poll_events(&self) -> Vec<Event> {
        let rx = self.events_rx.lock().unwrap_or_else(PoisonError::into_inner);
        rx.try_iter().collect()
    }
}

fn absolute_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    roots
        .into_iter()
        .map(|root| std::path::absolute(&root).unwrap_or(root))
        .collect()
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
