use flowline::dsl::builder::ProcessBuilder;
use flowline::dsl::PerformType;
use flowline::error::EngineError;
use flowline::runtime::context::Args;
use flowline::runtime::engine::Engine;
use flowline::runtime::order::OrderState;
use flowline::runtime::storage::InMemoryStateStore;
use flowline::runtime::task::Task;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn args(pairs: &[(&str, serde_json::Value)]) -> Args {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn task_for<'a>(tasks: &'a [Task], node: &str, actor: &str) -> &'a Task {
    tasks.iter()
        .find(|t| t.task_name == node && t.actor_ids.iter().any(|a| a == actor))
        .unwrap_or_else(|| panic!("no {node} task for {actor}"))
}

async fn setup() -> (Engine, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Engine::new(store.clone());

    // start -> fork -> [review (ALL), audit (ANY)] -> join -> end
    let definition = ProcessBuilder::new("contract")
        .start("start")
        .fork("fork")
        .task("review")
            .assignee("reviewers")
            .perform_type(PerformType::All)
            .build()
        .task("audit")
            .assignee("auditor")
            .build()
        .join("join")
        .end("end")
        .connect("start", "fork")
        .connect("fork", "review")
        .connect("fork", "audit")
        .connect("review", "join")
        .connect("audit", "join")
        .connect("join", "end")
        .build();
    engine.deploy(definition).await.expect("Deploy failed");
    (engine, store)
}

#[tokio::test]
async fn test_all_tasks_and_join_finish_once() {
    let (engine, store) = setup().await;
    let order = engine.start_instance_by_id(
        "contract",
        None,
        args(&[("reviewers", json!(["r1", "r2"])), ("auditor", json!("a1"))]),
    ).await.unwrap();

    let tasks = engine.active_tasks(order.id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    let r1 = task_for(&tasks, "review", "r1").clone();
    let r2 = task_for(&tasks, "review", "r2").clone();
    let a1 = task_for(&tasks, "audit", "a1").clone();
    assert_eq!(r1.actor_ids.len(), 1);
    assert_eq!(r1.perform_type, PerformType::All);
    assert_eq!(store.join_count(order.id, "task:review"), Some(2));

    // r1 cannot complete r2's copy
    let err = engine.execute_task(r2.id, "r1", Args::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden { .. }));

    // First reviewer: siblings still open, nothing moves
    assert!(engine.execute_task(r1.id, "r1", Args::new()).await.unwrap().is_empty());
    assert_eq!(store.join_count(order.id, "task:review"), Some(1));
    assert_eq!(store.join_count(order.id, "join:join"), None);

    // Audit branch reaches the join first
    assert!(engine.execute_task(a1.id, "a1", Args::new()).await.unwrap().is_empty());
    assert_eq!(store.join_count(order.id, "join:join"), Some(1));
    assert_eq!(engine.get_order(order.id).await.unwrap().state, OrderState::Active);

    // Last reviewer drains both counters and the order ends
    assert!(engine.execute_task(r2.id, "r2", Args::new()).await.unwrap().is_empty());
    assert_eq!(store.join_count(order.id, "task:review"), None);
    assert_eq!(store.join_count(order.id, "join:join"), None);
    assert_eq!(engine.get_order(order.id).await.unwrap().state, OrderState::Finished);
    assert_eq!(engine.history_tasks(order.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_all_without_actors_is_rejected() {
    let (engine, _) = setup().await;
    let err = engine.start_instance_by_id("contract", None, args(&[("auditor", json!("a1"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn test_concurrent_all_completions_release_one_successor() {
    let engine = Engine::in_memory();
    let definition = ProcessBuilder::new("vote")
        .start("start")
        .task("vote")
            .assignee("voters")
            .perform_type(PerformType::All)
            .build()
        .task("tally").assignee("clerk").build()
        .end("end")
        .connect("start", "vote")
        .connect("vote", "tally")
        .connect("tally", "end")
        .build();
    engine.deploy(definition).await.unwrap();

    let voters: Vec<String> = (1..=8).map(|i| format!("v{i}")).collect();
    let order = engine.start_instance_by_id(
        "vote",
        None,
        args(&[("voters", json!(voters)), ("clerk", json!("c"))]),
    ).await.unwrap();
    let tasks = engine.active_tasks(order.id).await.unwrap();
    assert_eq!(tasks.len(), 8);

    let mut handles = Vec::new();
    for task in tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let operator = task.actor_ids[0].clone();
            engine.execute_task(task.id, &operator, Args::new()).await
        }));
    }

    let mut produced = Vec::new();
    for handle in handles {
        produced.extend(handle.await.unwrap().expect("Every vote completes"));
    }
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].task_name, "tally");

    let active = engine.active_tasks(order.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, produced[0].id);
}

#[tokio::test]
async fn test_implicit_fork_follows_every_enabled_output() {
    let engine = Engine::in_memory();
    let definition = ProcessBuilder::new("notify")
        .start("start")
        .task("email").assignee("owner").build()
        .task("sms").assignee("owner").build()
        .task("call").assignee("owner").build()
        .end("end")
        .connect("start", "email")
        .connect("start", "sms")
        .connect_if("start", "call", "${urgent} == true")
        .connect("email", "end")
        .connect("sms", "end")
        .connect("call", "end")
        .build();
    engine.deploy(definition).await.unwrap();

    let order = engine.start_instance_by_id(
        "notify",
        None,
        args(&[("owner", json!("o")), ("urgent", json!(false))]),
    ).await.unwrap();
    let mut names: Vec<String> = engine.active_tasks(order.id).await.unwrap()
        .into_iter()
        .map(|t| t.task_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["email", "sms"]);

    let order = engine.start_instance_by_id(
        "notify",
        None,
        args(&[("owner", json!("o")), ("urgent", json!(true))]),
    ).await.unwrap();
    assert_eq!(engine.active_tasks(order.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_condition_on_missing_variable_fails() {
    let engine = Engine::in_memory();
    let definition = ProcessBuilder::new("gate")
        .start("start")
        .task("a").build()
        .end("end")
        .connect_if("start", "a", "${amount} > 10")
        .connect("a", "end")
        .build();
    engine.deploy(definition).await.unwrap();

    let err = engine.start_instance_by_id("gate", None, Args::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "got {err:?}");

    let missing = engine.execute_task(Uuid::new_v4(), "x", Args::new()).await.unwrap_err();
    assert!(matches!(missing, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_branch_finishing_concurrently_with_end_keeps_order_closed() {
    let engine = Engine::in_memory();
    // start -> fork -> [quick -> end, slow -> after -> end]
    let definition = ProcessBuilder::new("race")
        .start("start")
        .fork("fork")
        .task("quick").build()
        .task("slow").build()
        .task("after").build()
        .end("end")
        .connect("start", "fork")
        .connect("fork", "quick")
        .connect("fork", "slow")
        .connect("quick", "end")
        .connect("slow", "after")
        .connect("after", "end")
        .build();
    engine.deploy(definition).await.unwrap();

    for _ in 0..20 {
        let order = engine.start_instance_by_id("race", None, Args::new()).await.unwrap();
        let mut handles = Vec::new();
        for task in engine.active_tasks(order.id).await.unwrap() {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.execute_task(task.id, "u", Args::new()).await
            }));
        }
        for handle in handles {
            // The slow branch may lose to the end and find its order closed
            let _ = handle.await.unwrap();
        }

        let order = engine.get_order(order.id).await.unwrap();
        assert_eq!(order.state, OrderState::Finished);
        assert!(engine.active_tasks(order.id).await.unwrap().is_empty());
    }
}
