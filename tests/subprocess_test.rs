use async_trait::async_trait;
use flowline::dsl::builder::ProcessBuilder;
use flowline::error::EngineError;
use flowline::runtime::context::Args;
use flowline::runtime::engine::Engine;
use flowline::runtime::interceptor::TaskInterceptor;
use flowline::runtime::order::OrderState;
use flowline::runtime::task::Task;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn args(pairs: &[(&str, serde_json::Value)]) -> Args {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[derive(Default)]
struct Collect {
    tasks: Mutex<Vec<Task>>,
}

#[async_trait]
impl TaskInterceptor for Collect {
    async fn intercept(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.tasks.lock().unwrap().extend_from_slice(tasks);
        Ok(())
    }
}

async fn setup() -> (Engine, Arc<Collect>) {
    let collect = Arc::new(Collect::default());
    let engine = Engine::in_memory().with_interceptor(collect.clone());

    let child = ProcessBuilder::new("sign")
        .start("start")
        .task("sign").assignee("signer").build()
        .end("end")
        .connect("start", "sign")
        .connect("sign", "end")
        .build();
    engine.deploy(child).await.unwrap();

    let parent = ProcessBuilder::new("purchase")
        .start("start")
        .sub_process("contract", "sign")
        .task("confirm").assignee("buyer").build()
        .end("end")
        .connect("start", "contract")
        .connect("contract", "confirm")
        .connect("confirm", "end")
        .build();
    engine.deploy(parent).await.unwrap();
    (engine, collect)
}

#[tokio::test]
async fn test_child_end_resumes_parent() {
    let (engine, collect) = setup().await;
    let parent = engine.start_instance_by_id(
        "purchase",
        Some("alice"),
        args(&[("signer", json!("sam")), ("buyer", json!("alice"))]),
    ).await.unwrap();

    // The parent itself waits without tasks
    assert!(engine.active_tasks(parent.id).await.unwrap().is_empty());

    let produced = collect.tasks.lock().unwrap().clone();
    assert_eq!(produced.len(), 1);
    let sign = &produced[0];
    assert_eq!(sign.task_name, "sign");
    assert_ne!(sign.order_id, parent.id);

    let child = engine.get_order(sign.order_id).await.unwrap();
    assert_eq!(child.parent_order_id, Some(parent.id));
    assert_eq!(child.parent_node_name.as_deref(), Some("contract"));
    assert_eq!(child.process_id, "sign");

    let next = engine.execute_task(sign.id, "sam", Args::new()).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].task_name, "confirm");
    assert_eq!(next[0].order_id, parent.id);
    assert_eq!(engine.get_order(child.id).await.unwrap().state, OrderState::Finished);
    assert_eq!(engine.get_order(parent.id).await.unwrap().state, OrderState::Active);

    engine.execute_task(next[0].id, "alice", Args::new()).await.unwrap();
    assert_eq!(engine.get_order(parent.id).await.unwrap().state, OrderState::Finished);
}

#[tokio::test]
async fn test_automatic_child_finishes_parent_in_one_call() {
    let engine = Engine::in_memory();
    let child = ProcessBuilder::new("noop")
        .start("start")
        .end("end")
        .connect("start", "end")
        .build();
    engine.deploy(child).await.unwrap();

    let parent = ProcessBuilder::new("wrapper")
        .start("start")
        .sub_process("inner", "noop")
        .end("end")
        .connect("start", "inner")
        .connect("inner", "end")
        .build();
    engine.deploy(parent).await.unwrap();

    let order = engine.start_instance_by_id("wrapper", None, Args::new()).await.unwrap();
    assert_eq!(order.state, OrderState::Finished);
}

#[tokio::test]
async fn test_finish_instance_resumes_parent() {
    let (engine, collect) = setup().await;
    let parent = engine.start_instance_by_id(
        "purchase",
        None,
        args(&[("signer", json!("sam")), ("buyer", json!("alice"))]),
    ).await.unwrap();
    let child_id = collect.tasks.lock().unwrap()[0].order_id;

    let tasks = engine.finish_instance_by_id(child_id, Some("admin")).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_name, "confirm");
    assert_eq!(tasks[0].order_id, parent.id);

    let history = engine.history_tasks(child_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operator.as_deref(), Some("admin"));

    let err = engine.finish_instance_by_id(child_id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)), "got {err:?}");
}

#[tokio::test]
async fn test_missing_sub_process_is_not_found() {
    let engine = Engine::in_memory();
    let parent = ProcessBuilder::new("dangling")
        .start("start")
        .sub_process("inner", "ghost")
        .end("end")
        .connect("start", "inner")
        .connect("inner", "end")
        .build();
    // Deploys with a warning; fails only when reached
    engine.deploy(parent).await.unwrap();
    assert_eq!(engine.registry().unresolved_references(), vec![("dangling".to_string(), "ghost".to_string())]);

    let err = engine.start_instance_by_id("dangling", None, Args::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "process", .. }), "got {err:?}");
}
