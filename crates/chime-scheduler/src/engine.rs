use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chime_core::{
    clock::{current_minute, floor_minute, unix_now},
    config::SchedulerConfig,
};
use tokio::{
    sync::watch,
    time::{Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::Dispatcher,
    error::Result,
    store::{IndexKey, Page, TaskFilter, TaskRow, TaskStore},
    types::{Task, TaskKey, TaskState},
};

/// Drives execution: fires the tasks of each minute and periodically replays
/// `pending` tasks whose minute has already passed.
#[derive(Clone)]
pub struct SchedulerEngine {
    store: Arc<dyn TaskStore>,
    dispatcher: Dispatcher,
    config: SchedulerConfig,
    last_tick: Arc<AtomicI64>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn TaskStore>, dispatcher: Dispatcher, config: SchedulerConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
            last_tick: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    /// Main loop. Ticks every `tick_interval_secs` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_secs = self.config.tick_interval_secs,
            catchup_mins = self.config.catchup_interval_mins,
            "scheduler engine started"
        );

        if self.config.catchup_on_start {
            self.spawn_catchup();
        }

        let mut ticks = tokio::time::interval(Duration::from_secs(
            self.config.tick_interval_secs.max(1),
        ));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut catchups = (self.config.catchup_interval_mins > 0).then(|| {
            let every = Duration::from_secs(self.config.catchup_interval_mins * 60);
            let mut i = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            i.set_missed_tick_behavior(MissedTickBehavior::Delay);
            i
        });

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    if let Err(e) = self.tick_at(current_minute()) {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = next_catchup(&mut catchups) => {
                    self.spawn_catchup();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch every `pending` task due at `minute`. Returns how many were
    /// handed to the dispatcher. A minute is only processed once.
    pub fn tick_at(&self, minute: i64) -> Result<usize> {
        let minute = floor_minute(minute);
        if self.last_tick.load(Ordering::SeqCst) == minute {
            debug!(minute, "minute already processed");
            return Ok(0);
        }

        let index = IndexKey::TriggerAt(minute);
        let filter = TaskFilter::state(TaskState::Pending);
        let dispatched = self.drain(|cursor| {
            self.store
                .query(&index, &filter, cursor, self.config.page_size)
        })?;

        self.last_tick.store(minute, Ordering::SeqCst);
        if dispatched > 0 {
            info!(minute, dispatched, "tick dispatched tasks");
        }
        Ok(dispatched)
    }

    /// Dispatch every `pending` task due at or before `now`. Safe to call
    /// repeatedly; the claim step keeps a task from running twice.
    pub fn catchup(&self, now: i64) -> Result<usize> {
        let filter = TaskFilter::due(now);
        let dispatched =
            self.drain(|cursor| self.store.scan(&filter, cursor, self.config.page_size))?;
        info!(dispatched, "catchup pass finished");
        Ok(dispatched)
    }

    fn spawn_catchup(&self) {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = engine.catchup(unix_now()) {
                error!("catchup pass aborted: {e}");
            }
        });
    }

    /// Follow the page cursor until exhausted and dispatch every decodable row.
    fn drain<F>(&self, mut fetch: F) -> Result<usize>
    where
        F: FnMut(Option<&TaskKey>) -> Result<Page<TaskRow>>,
    {
        let mut cursor: Option<TaskKey> = None;
        let mut dispatched = 0;
        loop {
            let page = fetch(cursor.as_ref())?;
            for row in page.items {
                let key = row.key();
                let task = match Task::try_from(row) {
                    Ok(t) => t,
                    Err(e) => {
                        error!(task = %key, "skipping undecodable task: {e}");
                        continue;
                    }
                };
                match self.dispatcher.dispatch(task) {
                    Ok(()) => dispatched += 1,
                    Err(e) => warn!(task = %key, "dispatch rejected: {e}"),
                }
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(dispatched)
    }
}

/// Resolves on the next periodic catchup, or never when it is disabled.
async fn next_catchup(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}
