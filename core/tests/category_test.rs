use parley_core::{handler, Engine, HandlerError, HandlerTable, MemoryHub, ParleyError};

fn math() -> HandlerTable {
    HandlerTable::new()
        .on(
            "add",
            handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x + y)),
        )
        .on(
            "mul",
            handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x * y)),
        )
}

#[tokio::test]
async fn category_operations_delegate_to_engine() {
    let hub = MemoryHub::new();
    let host = Engine::new(hub.endpoint());
    let worker = Engine::new(hub.endpoint());
    worker.on_messages(math()).unwrap();

    let math = host.category("math", &["mul", "add"]);
    assert_eq!(math.name(), "math");
    assert_eq!(math.operation_names().collect::<Vec<_>>(), ["add", "mul"]);

    let sum: i64 = math.call("add", (2, 3)).await.unwrap();
    assert_eq!(sum, 5);
    let product: i64 = math.operation("mul").unwrap().call((4, 5)).await.unwrap();
    assert_eq!(product, 20);

    // Bound operations behave exactly like direct calls
    let direct: i64 = host.call("add", (2, 3)).await.unwrap();
    assert_eq!(direct, sum);
    assert_eq!(host.stats().requests_sent, 3);
}

#[tokio::test]
async fn unknown_category_operation_is_rejected_locally() {
    let hub = MemoryHub::new();
    let host = Engine::new(hub.endpoint());

    let math = host.category("math", &["add"]);
    assert!(math.operation("sub").is_none());
    let err = math.call::<i64, _>("sub", (1, 1)).await.unwrap_err();
    assert!(matches!(err, ParleyError::UnknownOperation(ref name) if name == "math.sub"));
    assert_eq!(host.stats().requests_sent, 0);
}

#[tokio::test]
async fn send_option_selects_destination() {
    let hub = MemoryHub::new();
    let host = Engine::new(hub.endpoint());
    let w1 = Engine::new(hub.endpoint());
    let w2 = Engine::new(hub.endpoint());

    w1.on_message(
        "whoami",
        handler::from_fn(|(): ()| Ok::<_, HandlerError>("w1")),
    )
    .unwrap();
    w2.on_message(
        "whoami",
        handler::from_fn(|(): ()| Ok::<_, HandlerError>("w2")),
    )
    .unwrap();

    let id1 = w1.transport().id();
    let id2 = w2.transport().id();

    let first: String = host.call_with(id1, "whoami", ()).await.unwrap();
    let second: String = host.call_with(id2, "whoami", ()).await.unwrap();
    assert_eq!(first, "w1");
    assert_eq!(second, "w2");

    let workers = host.category("workers", &["whoami"]);
    let via_w2: String = workers.with_option(id2).call("whoami", ()).await.unwrap();
    assert_eq!(via_w2, "w2");

    assert_eq!(w1.stats().requests_handled, 1);
    assert_eq!(w2.stats().requests_handled, 2);
}
