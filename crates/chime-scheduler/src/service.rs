use std::sync::Arc;

use chime_core::clock::{floor_minute, unix_now, SECONDS_PER_MINUTE};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::{
    error::{Result, SchedulerError},
    schedule::normalize_trigger_at,
    store::{IndexKey, TaskFilter, TaskRow, TaskStore},
    types::{CreateTaskRequest, Task, TaskKey, TaskRef, TaskState},
};

/// One page of a status listing.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPage {
    pub tasks: Vec<Task>,
    /// Pass back as `start_from` to get the following page.
    pub next: Option<TaskKey>,
}

/// Create, reschedule and inspect tasks. This is what the HTTP layer talks to.
#[derive(Clone)]
pub struct SchedulerService {
    store: Arc<dyn TaskStore>,
    page_size: usize,
}

impl SchedulerService {
    pub fn new(store: Arc<dyn TaskStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn create(&self, req: CreateTaskRequest) -> Result<Task> {
        self.create_at(req, unix_now())
    }

    /// Validate and persist a new `pending` task, resolving relative trigger
    /// specs against `now`.
    #[instrument(skip(self, req), fields(tag = %req.tag))]
    pub fn create_at(&self, req: CreateTaskRequest, now: i64) -> Result<Task> {
        let task = Task::from_request(req, now)?;
        if let Err(e) = self.store.put(&task) {
            error!(task = %task.key(), "failed to store task: {e}");
            return Err(SchedulerError::StoreFailed);
        }
        info!(task = %task.key(), callback = %task.callback, "task created");
        Ok(task)
    }

    pub fn reschedule(
        &self,
        task_ref: &TaskRef,
        trigger_at: Option<&str>,
        include_all: bool,
    ) -> Result<Vec<Task>> {
        self.reschedule_at(task_ref, trigger_at, include_all, unix_now())
    }

    /// Copy the referenced tasks to a new trigger minute.
    ///
    /// Only `failed` tasks are moved unless `include_all` is set. Without a
    /// trigger spec the copies fire at the next minute. Each copy is written
    /// on its own; a write failure stops the call but keeps earlier copies.
    #[instrument(skip(self), fields(task = %task_ref))]
    pub fn reschedule_at(
        &self,
        task_ref: &TaskRef,
        trigger_at: Option<&str>,
        include_all: bool,
        now: i64,
    ) -> Result<Vec<Task>> {
        let new_trigger_at = match trigger_at {
            Some(spec) => normalize_trigger_at(spec, now)?,
            None => floor_minute(now) + SECONDS_PER_MINUTE,
        };

        let candidates = match task_ref.as_key() {
            Some(key) => vec![self.get_task(&key)?],
            None => {
                let filter = match task_ref.trigger_at {
                    Some(ts) => TaskFilter::at_minute(ts),
                    None => TaskFilter::default(),
                };
                self.collect_tag(&task_ref.tag, &filter)?
            }
        };

        let mut moved = Vec::new();
        for task in candidates {
            if !include_all && task.task_state != TaskState::Failed {
                continue;
            }
            let copy = task.rescheduled(new_trigger_at);
            if let Err(e) = self.store.put(&copy) {
                error!(task = %copy.key(), "failed to store rescheduled task: {e}");
                return Err(SchedulerError::StoreFailed);
            }
            info!(from = %task.key(), to = %copy.key(), "task rescheduled");
            moved.push(copy);
        }
        Ok(moved)
    }

    pub fn status(
        &self,
        task_ref: Option<&TaskRef>,
        start_from: Option<&TaskKey>,
        future_only: bool,
    ) -> Result<StatusPage> {
        self.status_at(task_ref, start_from, future_only, unix_now())
    }

    /// List tasks.
    ///
    /// - exact key: that task, or `NotFound`
    /// - `tag@ts`: every occurrence of the tag at that minute, or `NotFound`;
    ///   `future_only` can only narrow this to nothing
    /// - `tag`: occurrences of the tag, `trigger_at >= now` with `future_only`
    /// - nothing: every task, `trigger_at` after the current minute with `future_only`
    pub fn status_at(
        &self,
        task_ref: Option<&TaskRef>,
        start_from: Option<&TaskKey>,
        future_only: bool,
        now: i64,
    ) -> Result<StatusPage> {
        let page = match task_ref {
            Some(r) => {
                if let Some(key) = r.as_key() {
                    return Ok(StatusPage {
                        tasks: vec![self.get_task(&key)?],
                        next: None,
                    });
                }
                let mut filter = match r.trigger_at {
                    Some(ts) => TaskFilter::at_minute(ts),
                    None => TaskFilter::default(),
                };
                if future_only {
                    // keep the minute bound of `tag@ts`
                    filter.trigger_at_gte = Some(filter.trigger_at_gte.map_or(now, |g| g.max(now)));
                }
                let page = self.lookup(self.store.query(
                    &IndexKey::Tag(r.tag.clone()),
                    &filter,
                    start_from,
                    self.page_size,
                ))?;
                if r.trigger_at.is_some() && start_from.is_none() && page.items.is_empty() {
                    return Err(SchedulerError::NotFound { id: r.to_string() });
                }
                page
            }
            None => {
                let filter = if future_only {
                    TaskFilter::after(floor_minute(now))
                } else {
                    TaskFilter::default()
                };
                self.lookup(self.store.scan(&filter, start_from, self.page_size))?
            }
        };

        Ok(StatusPage {
            tasks: decode_rows(page.items),
            next: page.next,
        })
    }

    fn get_task(&self, key: &TaskKey) -> Result<Task> {
        let row = self
            .lookup(self.store.get(key))?
            .ok_or_else(|| SchedulerError::NotFound { id: key.format() })?;
        Task::try_from(row).map_err(|e| {
            error!(task = %key, "stored task is unreadable: {e}");
            SchedulerError::LookupFailed
        })
    }

    /// Every occurrence of `tag` matching `filter`, across all pages.
    fn collect_tag(&self, tag: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        let index = IndexKey::Tag(tag.to_string());
        let mut tasks = Vec::new();
        let mut cursor: Option<TaskKey> = None;
        loop {
            let page = self.lookup(self.store.query(&index, filter, cursor.as_ref(), self.page_size))?;
            tasks.extend(decode_rows(page.items));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tasks)
    }

    /// Log a read failure and replace it with the opaque lookup error.
    fn lookup<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            error!("task lookup failed: {e}");
            SchedulerError::LookupFailed
        })
    }
}

fn decode_rows(rows: Vec<TaskRow>) -> Vec<Task> {
    rows.into_iter()
        .filter_map(|row| {
            let key = row.key();
            Task::try_from(row)
                .map_err(|e| error!(task = %key, "leaving out unreadable task: {e}"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::store::{testing::FlakyStore, SqliteTaskStore};

    const NOW: i64 = 1_700_000_000;
    const MINUTE: i64 = 1_699_999_980;

    fn service(page_size: usize) -> (Arc<SqliteTaskStore>, SchedulerService) {
        let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        (store.clone(), SchedulerService::new(store, page_size))
    }

    fn request(tag: &str, trigger_at: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            trigger_at: trigger_at.into(),
            tag: tag.into(),
            callback: "https://example.com/hook".into(),
            ..Default::default()
        }
    }

    fn set_state(store: &SqliteTaskStore, task: &Task, state: TaskState) {
        let mut t = task.clone();
        t.task_state = state;
        store.put(&t).unwrap();
    }

    #[test]
    fn create_persists_pending_task() {
        let (store, svc) = service(10);
        let task = svc.create_at(request("report", "+5m"), NOW).unwrap();
        assert_eq!(task.trigger_at, MINUTE + 300);
        let row = store.get(&task.key()).unwrap().unwrap();
        assert_eq!(Task::try_from(row).unwrap(), task);
    }

    #[test]
    fn create_rejects_invalid_input_without_writing() {
        let (store, svc) = service(10);
        let err = svc.create_at(request("bad-tag", "+5m"), NOW).unwrap_err();
        assert!(err.is_validation());
        let page = store.scan(&TaskFilter::default(), None, 10).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn reschedule_moves_failed_or_all() {
        let (store, svc) = service(2);
        let states = [TaskState::Failed, TaskState::Successful, TaskState::Failed];
        let mut originals = Vec::new();
        for (n, state) in states.into_iter().enumerate() {
            let mut t = svc
                .create_at(request("nightly", &format!("+{}m", n + 1)), NOW)
                .unwrap();
            set_state(&store, &t, state);
            t.task_state = state;
            originals.push(t);
        }

        let target = (MINUTE + 3_600).to_string();
        let moved = svc
            .reschedule_at(&TaskRef::tag("nightly"), Some(&target), false, NOW)
            .unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|t| t.trigger_at == MINUTE + 3_600));
        assert!(moved.iter().all(|t| t.task_state == TaskState::Pending));

        // the copies are the failed tasks, identity kept
        let mut ids: Vec<_> = moved.iter().map(|t| t.unique_id.clone()).collect();
        ids.sort();
        let mut failed = vec![originals[0].unique_id.clone(), originals[2].unique_id.clone()];
        failed.sort();
        assert_eq!(ids, failed);

        // the successful task is untouched and was not copied
        let kept = Task::try_from(store.get(&originals[1].key()).unwrap().unwrap()).unwrap();
        assert_eq!(kept, originals[1]);
        let copy = TaskKey::new(MINUTE + 3_600, "nightly", originals[1].unique_id.clone());
        assert!(store.get(&copy).unwrap().is_none());

        let moved = svc
            .reschedule_at(&TaskRef::tag("nightly"), Some("+2h"), true, NOW)
            .unwrap();
        // three originals plus the two copies from the first call
        assert_eq!(moved.len(), 5);
        assert!(moved.iter().all(|t| t.trigger_at == MINUTE + 7_200));
    }

    #[test]
    fn reschedule_all_rewrites_every_state() {
        let (store, svc) = service(10);
        let states = [TaskState::Failed, TaskState::Successful, TaskState::Failed];
        for (n, state) in states.into_iter().enumerate() {
            let t = svc
                .create_at(request("daily", &format!("+{}m", n + 1)), NOW)
                .unwrap();
            set_state(&store, &t, state);
        }
        let moved = svc
            .reschedule_at(&TaskRef::tag("daily"), Some("+1d"), true, NOW)
            .unwrap();
        assert_eq!(moved.len(), 3);
    }

    #[test]
    fn reschedule_exact_key() {
        let (store, svc) = service(10);
        let t = svc.create_at(request("once", "+1m"), NOW).unwrap();
        set_state(&store, &t, TaskState::Failed);

        let r = TaskRef::parse(&t.key().format()).unwrap();
        let moved = svc.reschedule_at(&r, None, false, NOW).unwrap();
        assert_eq!(moved.len(), 1);
        // no trigger spec: next minute
        assert_eq!(moved[0].trigger_at, MINUTE + 60);
        assert_eq!(moved[0].unique_id, t.unique_id);

        let missing = TaskRef::parse("once+ffff@600").unwrap();
        assert!(matches!(
            svc.reschedule_at(&missing, None, false, NOW),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn reschedule_rejects_bad_time() {
        let (_store, svc) = service(10);
        assert!(matches!(
            svc.reschedule_at(&TaskRef::tag("x"), Some("yesterday"), false, NOW),
            Err(SchedulerError::InvalidTimeSpec(_))
        ));
    }

    #[test]
    fn status_modes() {
        let (_store, svc) = service(10);
        let a1 = svc.create_at(request("alpha", "+1m"), NOW).unwrap();
        let a2 = svc.create_at(request("alpha", "+1m"), NOW).unwrap();
        let a3 = svc.create_at(request("alpha", "+10m"), NOW).unwrap();
        svc.create_at(request("beta", "+2m"), NOW).unwrap();

        // exact
        let r = TaskRef::parse(&a3.key().format()).unwrap();
        let page = svc.status_at(Some(&r), None, false, NOW).unwrap();
        assert_eq!(page.tasks, vec![a3.clone()]);
        assert!(page.next.is_none());

        // tag at a minute
        let r = TaskRef::parse(&format!("alpha@{}", a1.trigger_at)).unwrap();
        let page = svc.status_at(Some(&r), None, false, NOW).unwrap();
        let mut ids: Vec<_> = page.tasks.iter().map(|t| t.unique_id.clone()).collect();
        ids.sort();
        let mut expected = vec![a1.unique_id.clone(), a2.unique_id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        // a minute reference stays pinned to its minute under future_only
        let r = TaskRef::parse(&format!("alpha@{}", a3.trigger_at)).unwrap();
        let page = svc.status_at(Some(&r), None, true, NOW).unwrap();
        assert_eq!(page.tasks, vec![a3.clone()]);

        let r = TaskRef::parse("alpha@600").unwrap();
        assert!(matches!(
            svc.status_at(Some(&r), None, false, NOW),
            Err(SchedulerError::NotFound { .. })
        ));

        // tag only, future filter relative to a later clock
        let r = TaskRef::tag("alpha");
        assert_eq!(svc.status_at(Some(&r), None, false, NOW).unwrap().tasks.len(), 3);
        let later = MINUTE + 120;
        let page = svc.status_at(Some(&r), None, true, later).unwrap();
        assert_eq!(page.tasks, vec![a3]);

        // everything
        assert_eq!(svc.status_at(None, None, false, NOW).unwrap().tasks.len(), 4);
        assert_eq!(svc.status_at(None, None, true, later).unwrap().tasks.len(), 1);
    }

    #[test]
    fn status_exact_missing_is_not_found() {
        let (_store, svc) = service(10);
        let r = TaskRef::parse("ghost+abc@600").unwrap();
        assert!(matches!(
            svc.status_at(Some(&r), None, false, NOW),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn status_pages_follow_next() {
        let (_store, svc) = service(3);
        for n in 0..8 {
            svc.create_at(request("pager", &format!("+{}m", n % 3 + 1)), NOW)
                .unwrap();
        }
        let all = SchedulerService::new(svc.store.clone(), 100)
            .status_at(None, None, false, NOW)
            .unwrap()
            .tasks;
        assert_eq!(all.len(), 8);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = svc.status_at(None, cursor.as_ref(), false, NOW).unwrap();
            assert!(page.tasks.len() <= 3);
            seen.extend(page.tasks);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, all);
    }

    #[test]
    fn unreadable_rows_are_left_out() {
        let (store, svc) = service(10);
        let good = svc.create_at(request("mix", "+1m"), NOW).unwrap();
        let bad = svc.create_at(request("mix", "+2m"), NOW).unwrap();
        store
            .conn()
            .execute(
                "UPDATE tasks SET callback_method = 'PATCH' WHERE unique_id = ?1",
                [&bad.unique_id],
            )
            .unwrap();

        let page = svc
            .status_at(Some(&TaskRef::tag("mix")), None, false, NOW)
            .unwrap();
        assert_eq!(page.tasks, vec![good]);

        let r = TaskRef::parse(&bad.key().format()).unwrap();
        assert!(matches!(
            svc.status_at(Some(&r), None, false, NOW),
            Err(SchedulerError::LookupFailed)
        ));
    }

    #[test]
    fn reschedule_write_failure_keeps_earlier_copies() {
        let store = Arc::new(FlakyStore::new());
        let svc = SchedulerService::new(store.clone(), 10);
        for n in 1..=3 {
            let mut t = svc
                .create_at(request("batch", &format!("+{n}m")), NOW)
                .unwrap();
            t.task_state = TaskState::Failed;
            store.inner.put(&t).unwrap();
        }
        store.puts_left.store(1, Ordering::SeqCst);

        let target = MINUTE + 3_600;
        assert!(matches!(
            svc.reschedule_at(&TaskRef::tag("batch"), Some(&target.to_string()), false, NOW),
            Err(SchedulerError::StoreFailed)
        ));

        let page = store
            .inner
            .query(&IndexKey::TriggerAt(target), &TaskFilter::default(), None, 10)
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].task_state, "pending");
        // originals are all still there
        let page = store
            .inner
            .query(&IndexKey::Tag("batch".into()), &TaskFilter::state(TaskState::Failed), None, 10)
            .unwrap();
        assert_eq!(page.items.len(), 3);
    }
}
