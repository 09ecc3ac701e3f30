use flowline::dsl::builder::ProcessBuilder;
use flowline::dsl::PerformType;
use flowline::error::EngineError;
use flowline::runtime::context::Args;
use flowline::runtime::engine::Engine;
use flowline::runtime::storage::InMemoryStateStore;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn args(pairs: &[(&str, serde_json::Value)]) -> Args {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

async fn leave_engine() -> Engine {
    let engine = Engine::in_memory();
    let definition = ProcessBuilder::new("leave")
        .start("start")
        .task("apply").assignee("applicant").build()
        .task("approve").assignee("approver").build()
        .end("end")
        .connect("start", "apply")
        .connect("apply", "approve")
        .connect("approve", "end")
        .build();
    engine.deploy(definition).await.unwrap();
    engine
}

#[tokio::test]
async fn test_withdraw_restores_completed_task() {
    let engine = leave_engine().await;
    let order = engine.start_instance_by_id(
        "leave",
        None,
        args(&[("applicant", json!("alice")), ("approver", json!("bob"))]),
    ).await.unwrap();
    let apply = engine.active_tasks(order.id).await.unwrap().remove(0);

    // Still live
    let err = engine.withdraw_task(apply.id, "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)), "got {err:?}");

    let approve = engine.execute_task(apply.id, "alice", Args::new()).await.unwrap().remove(0);

    let err = engine.withdraw_task(apply.id, "mallory").await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden { .. }), "got {err:?}");

    let restored = engine.withdraw_task(apply.id, "alice").await.unwrap();
    assert_eq!(restored.id, apply.id);
    assert_eq!(restored.task_name, "apply");
    assert_eq!(restored.actor_ids, vec!["alice".to_string()]);
    assert!(engine.get_history_task(apply.id).await.is_err());

    // Downstream work stays where it is
    let active = engine.active_tasks(order.id).await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|t| t.id == approve.id));

    // And the restored task completes like any other
    let next = engine.execute_task(apply.id, "alice", Args::new()).await.unwrap();
    assert_eq!(next[0].task_name, "approve");
}

#[tokio::test]
async fn test_withdraw_unknown_task_is_not_found() {
    let engine = leave_engine().await;
    let err = engine.withdraw_task(Uuid::new_v4(), "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_withdraw_on_terminated_order_is_illegal() {
    let engine = leave_engine().await;
    let order = engine.start_instance_by_id(
        "leave",
        None,
        args(&[("applicant", json!("alice")), ("approver", json!("bob"))]),
    ).await.unwrap();
    let apply = engine.active_tasks(order.id).await.unwrap().remove(0);
    engine.execute_task(apply.id, "alice", Args::new()).await.unwrap();
    engine.terminate_by_id(order.id, Some("admin")).await.unwrap();

    let err = engine.withdraw_task(apply.id, "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)), "got {err:?}");
}

#[tokio::test]
async fn test_withdraw_reopens_all_counter() {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Engine::new(store.clone());
    let definition = ProcessBuilder::new("review")
        .start("start")
        .task("review")
            .assignee("reviewers")
            .perform_type(PerformType::All)
            .build()
        .task("publish").assignee("editor").build()
        .end("end")
        .connect("start", "review")
        .connect("review", "publish")
        .connect("publish", "end")
        .build();
    engine.deploy(definition).await.unwrap();

    let order = engine.start_instance_by_id(
        "review",
        None,
        args(&[("reviewers", json!("r1,r2")), ("editor", json!("ed"))]),
    ).await.unwrap();
    let tasks = engine.active_tasks(order.id).await.unwrap();
    let r1 = tasks.iter().find(|t| t.actor_ids == ["r1"]).unwrap().clone();
    let r2 = tasks.iter().find(|t| t.actor_ids == ["r2"]).unwrap().clone();

    engine.execute_task(r1.id, "r1", Args::new()).await.unwrap();
    assert_eq!(store.join_count(order.id, "task:review"), Some(1));

    engine.withdraw_task(r1.id, "r1").await.unwrap();
    assert_eq!(store.join_count(order.id, "task:review"), Some(2));

    // r2 alone is no longer enough
    assert!(engine.execute_task(r2.id, "r2", Args::new()).await.unwrap().is_empty());
    let next = engine.execute_task(r1.id, "r1", Args::new()).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].task_name, "publish");
}

// start -> fork -> [a, b] -> join -> c -> end
async fn parallel_engine() -> (Engine, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::new());
    let engine = Engine::new(store.clone());
    let definition = ProcessBuilder::new("parallel")
        .start("start")
        .fork("fork")
        .task("a").build()
        .task("b").build()
        .join("join")
        .task("c").build()
        .end("end")
        .connect("start", "fork")
        .connect("fork", "a")
        .connect("fork", "b")
        .connect("a", "join")
        .connect("b", "join")
        .connect("join", "c")
        .connect("c", "end")
        .build();
    engine.deploy(definition).await.unwrap();
    (engine, store)
}

fn named(tasks: &[flowline::runtime::task::Task], name: &str) -> Uuid {
    tasks.iter().find(|t| t.task_name == name).unwrap_or_else(|| panic!("no {name} task")).id
}

#[tokio::test]
async fn test_withdraw_gives_join_arrival_back() {
    let (engine, store) = parallel_engine().await;
    let order = engine.start_instance_by_id("parallel", None, Args::new()).await.unwrap();
    let tasks = engine.active_tasks(order.id).await.unwrap();
    let (a, b) = (named(&tasks, "a"), named(&tasks, "b"));

    engine.execute_task(a, "u1", Args::new()).await.unwrap();
    assert_eq!(store.join_count(order.id, "join:join"), Some(1));

    engine.withdraw_task(a, "u1").await.unwrap();
    assert_eq!(store.join_count(order.id, "join:join"), Some(2));

    // b alone does not pass the join any more
    assert!(engine.execute_task(b, "u2", Args::new()).await.unwrap().is_empty());
    let next = engine.execute_task(a, "u1", Args::new()).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].task_name, "c");
}

#[tokio::test]
async fn test_withdraw_past_merged_join_is_illegal() {
    let (engine, store) = parallel_engine().await;
    let order = engine.start_instance_by_id("parallel", None, Args::new()).await.unwrap();
    let tasks = engine.active_tasks(order.id).await.unwrap();
    let (a, b) = (named(&tasks, "a"), named(&tasks, "b"));

    engine.execute_task(a, "u1", Args::new()).await.unwrap();
    let c = engine.execute_task(b, "u2", Args::new()).await.unwrap().remove(0);

    // b merged the join; a's arrival was used up by it
    for (task_id, operator) in [(b, "u2"), (a, "u1")] {
        let err = engine.withdraw_task(task_id, operator).await.unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)), "got {err:?}");
        assert!(engine.get_history_task(task_id).await.is_ok());
    }
    assert_eq!(store.join_count(order.id, "join:join"), None);
    let active = engine.active_tasks(order.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, c.id);

    // A fresh round through the fork still waits for both branches
    let round = engine.execute_and_jump_task(c.id, "u3", Args::new(), Some("fork")).await.unwrap();
    assert_eq!(round.len(), 2);
    assert!(engine.execute_task(named(&round, "a"), "u1", Args::new()).await.unwrap().is_empty());
    let next = engine.execute_task(named(&round, "b"), "u2", Args::new()).await.unwrap();
    assert_eq!(next[0].task_name, "c");
}

#[tokio::test]
async fn test_withdraw_after_all_siblings_merged_is_illegal() {
    let engine = Engine::in_memory();
    let definition = ProcessBuilder::new("review")
        .start("start")
        .task("review")
            .assignee("reviewers")
            .perform_type(PerformType::All)
            .build()
        .task("publish").build()
        .end("end")
        .connect("start", "review")
        .connect("review", "publish")
        .connect("publish", "end")
        .build();
    engine.deploy(definition).await.unwrap();

    let order = engine.start_instance_by_id("review", None, args(&[("reviewers", json!("r1,r2"))])).await.unwrap();
    let tasks = engine.active_tasks(order.id).await.unwrap();
    let r1 = tasks.iter().find(|t| t.actor_ids == ["r1"]).unwrap().id;
    let r2 = tasks.iter().find(|t| t.actor_ids == ["r2"]).unwrap().id;

    engine.execute_task(r1, "r1", Args::new()).await.unwrap();
    engine.execute_task(r2, "r2", Args::new()).await.unwrap();

    let err = engine.withdraw_task(r2, "r2").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)), "got {err:?}");
    let err = engine.withdraw_task(r1, "r1").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)), "got {err:?}");

    // Still exactly one successor
    let active = engine.active_tasks(order.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].task_name, "publish");
}
