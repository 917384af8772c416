use std::{
    path::PathBuf,
    sync::{mpsc, Arc, PoisonError, RwLock},
    thread::JoinHandle,
    time::Duration,
};

use crate::{
    config::Config,
    lock::{PassLock, PassPermit, StopSignal},
    semantic::{IncrementalIndexer, PassPlan, PassReport, SearchEngine, SearchResults},
};

use super::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Continuous,
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Idle,
    Indexing(PassKind),
}

/// Messages from the workers to the interactive side.
#[derive(Debug, Clone)]
pub enum Event {
    StatusChanged(IndexStatus),
    PassFinished { kind: PassKind, report: PassReport },
    PassFailed { kind: PassKind, error: String },
    ResultsReady { query: String, results: SearchResults },
    SearchFailed { query: String, error: String },
}

/// Everything a worker thread needs, cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<RwLock<Config>>,
    pub indexer: Arc<IncrementalIndexer>,
    pub pass_lock: PassLock,
    pub events: mpsc::SyncSender<Event>,
}

/// Never blocks a worker: if the interactive side is not draining the
/// channel, the event is dropped.
pub fn send_event(events: &mpsc::SyncSender<Event>, event: Event) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::TrySendError::Full(event)) => {
            log::warn!("event channel full, dropping {event:?}");
        }
        Err(mpsc::TrySendError::Disconnected(_)) => {
            log::debug!("event receiver gone");
        }
    }
}

/// Run one pass while holding `permit`, reporting progress as events.
pub fn run_pass(
    ctx: &WorkerContext,
    kind: PassKind,
    plan: &PassPlan,
    stop: &StopSignal,
    permit: PassPermit,
) -> Result<PassReport, AppError> {
    send_event(&ctx.events, Event::StatusChanged(IndexStatus::Indexing(kind)));

    let result = ctx.indexer.run_pass(plan, stop);
    drop(permit);

    match &result {
        Ok(report) => send_event(
            &ctx.events,
            Event::PassFinished {
                kind,
                report: report.clone(),
            },
        ),
        Err(err) => {
            log::error!("{kind:?} pass failed: {err}");
            send_event(
                &ctx.events,
                Event::PassFailed {
                    kind,
                    error: err.to_string(),
                },
            );
        }
    }
    send_event(&ctx.events, Event::StatusChanged(IndexStatus::Idle));

    Ok(result?)
}

/// Long-lived worker: a pass, then an idle period, until stopped.
pub fn spawn_continuous(ctx: WorkerContext, stop: StopSignal) -> JoinHandle<()> {
    std::thread::spawn(move || {
        log::info!("continuous indexing started");

        loop {
            if stop.is_stopped() {
                break;
            }

            match ctx.pass_lock.try_acquire() {
                Some(permit) => {
                    let plan = {
                        let config = ctx.config.read().unwrap_or_else(|e| e.into_inner());
                        PassPlan::continuous(&config)
                    };
                    // failures were already reported as events
                    let _ = run_pass(&ctx, PassKind::Continuous, &plan, &stop, permit);
                }
                None => log::debug!("another pass is running, skipping this cycle"),
            }

            let interval = {
                let config = ctx.config.read().unwrap_or_else(|e| e.into_inner());
                Duration::from_secs(config.indexing.interval_secs)
            };
            if stop.wait_timeout(interval) {
                break;
            }
        }

        log::info!("continuous indexing stopped");
    })
}

/// Add `roots` to the folders the continuous pass keeps fresh, persisting
/// the config when anything changed.
pub fn remember_roots(config: &RwLock<Config>, roots: &[PathBuf]) {
    let mut config = config.write().unwrap_or_else(PoisonError::into_inner);
    if config.add_extra_roots(roots) {
        if let Err(err) = config.save() {
            log::error!("failed to remember indexed folders: {err:#}");
        }
    }
}

/// Short-lived worker for one on-demand pass. The permit was taken by the
/// caller, so a concurrent trigger has already been turned away.
///
/// The returned handle finishes once the pass, and its final save, is done.
pub fn spawn_on_demand(
    ctx: WorkerContext,
    plan: PassPlan,
    stop: StopSignal,
    permit: PassPermit,
) -> JoinHandle<()> {
    let events = ctx.events.clone();
    let pass_handle = std::thread::spawn(move || {
        remember_roots(&ctx.config, &plan.text_roots);
        let _ = run_pass(&ctx, PassKind::OnDemand, &plan, &stop, permit);
    });

    // handle thread panics
    std::thread::spawn(move || {
        if let Err(err) = pass_handle.join() {
            log::error!("on-demand pass panicked: {err:?}");
            send_event(
                &events,
                Event::PassFailed {
                    kind: PassKind::OnDemand,
                    error: "indexing pass panicked".to_string(),
                },
            );
            send_event(&events, Event::StatusChanged(IndexStatus::Idle));
        }
    })
}

/// Short-lived worker for one query.
pub fn spawn_search(engine: Arc<SearchEngine>, events: mpsc::SyncSender<Event>, query: String) {
    std::thread::spawn(move || {
        let event = match engine.search(&query) {
            Ok(results) => Event::ResultsReady { query, results },
            Err(err) => {
                log::warn!("search for {query:?} failed: {err}");
                Event::SearchFailed {
                    query,
                    error: err.to_string(),
                }
            }
        };
        send_event(&events, event);
    });
}
