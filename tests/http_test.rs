use flowline::dsl::builder::ProcessBuilder;
use flowline::runtime::context::Args;
use flowline::runtime::engine::Engine;
use flowline::runtime::order::OrderState;

#[tokio::test]
#[ignore] // needs network access
async fn test_http_action() {
    // start -> req(http GET httpbin) -> check -> end
    let definition = ProcessBuilder::new("http-test")
        .start("start")
        .custom("req", "http")
            .param("url", "https://httpbin.org/get")
            .param("method", "GET")
            .output("resp")
            .build()
        .task("check").build()
        .end("end")
        .connect("start", "req")
        .connect("req", "check")
        .connect("check", "end")
        .build();

    let engine = Engine::in_memory();
    engine.register_builtin_handlers();
    engine.deploy(definition).await.expect("Deploy failed");

    let order = engine.start_instance_by_id("http-test", None, Args::new())
        .await
        .expect("Failed to start process");
    let task = engine.active_tasks(order.id).await.unwrap().remove(0);
    engine.execute_task(task.id, "tester", Args::new()).await.unwrap();

    let order = engine.get_order(order.id).await.unwrap();
    assert_eq!(order.state, OrderState::Finished);
}
