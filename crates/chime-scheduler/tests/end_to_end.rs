// Full path from task creation to a persisted callback result, against a
// real HTTP stub.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, http::StatusCode, routing::post, Router};
use chime_core::config::{CallbackConfig, SchedulerConfig};
use chime_scheduler::{
    CreateTaskRequest, Dispatcher, Executor, HttpTransport, SchedulerEngine, SchedulerService,
    SqliteTaskStore, Task, TaskRef, TaskState, TaskStore,
};

async fn hook(State(hits): State<Arc<AtomicUsize>>, body: String) -> (StatusCode, String) {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, format!("got {body}"))
}

async fn start_stub() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route("/hook", post(hook)).with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), hits)
}

#[tokio::test]
async fn created_task_fires_and_records_success() {
    let (callback, hits) = start_stub().await;

    let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
    let transport = Arc::new(HttpTransport::new(&CallbackConfig::default()).unwrap());
    let executor = Executor::new(store.clone(), transport);
    let dispatcher = Dispatcher::spawn(executor, 4, 16);
    let engine = SchedulerEngine::new(store.clone(), dispatcher, SchedulerConfig::default());
    let service = SchedulerService::new(store.clone(), 100);

    let task = service
        .create(CreateTaskRequest {
            trigger_at: "+1m".into(),
            tag: "e2e".into(),
            callback: callback.clone(),
            callback_method: Some("POST".into()),
            payload: "order=7".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(task.task_state, TaskState::Pending);

    assert_eq!(engine.tick_at(task.trigger_at).unwrap(), 1);

    let done = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let row = store.get(&task.key()).unwrap().expect("task row");
            let current = Task::try_from(row).unwrap();
            if current.task_state != TaskState::Pending && current.task_state != TaskState::Running {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task never finished");

    assert_eq!(done.task_state, TaskState::Successful);
    assert_eq!(done.response_status, Some(200));
    assert_eq!(done.response_body.as_deref(), Some("got order=7"));
    assert!(done.executed_at.is_some());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // visible through the status facade under its wire id
    let r = TaskRef::parse(&task.key().to_string()).unwrap();
    let page = service.status(Some(&r), None, false).unwrap();
    assert_eq!(page.tasks, vec![done]);
}
