use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_core::{
    handler, Call, Engine, EngineConfig, Envelope, HandlerError, MemoryHub, Transport,
};
use serde_json::{json, Value};

fn engine_in(namespace: &str, transport: parley_core::MemoryTransport) -> Engine<parley_core::MemoryTransport> {
    Engine::with_config(transport, EngineConfig::new().with_namespace(namespace))
}

#[tokio::test]
async fn shared_transport_routes_by_namespace() {
    let hub = MemoryHub::new();
    let shared = hub.endpoint();
    let x = engine_in("x", shared.clone());
    let y = engine_in("y", shared);

    x.on_message("ping", handler::from_fn(|(): ()| Ok::<_, HandlerError>("X")))
        .unwrap();
    y.on_message("ping", handler::from_fn(|(): ()| Ok::<_, HandlerError>("Y")))
        .unwrap();

    let sender_x = engine_in("x", hub.endpoint());
    let sender_y = engine_in("y", hub.endpoint());

    for _ in 0..10 {
        let from_x: String = sender_x.call("ping", ()).await.unwrap();
        assert_eq!(from_x, "X");
        let from_y: String = sender_y.call("ping", ()).await.unwrap();
        assert_eq!(from_y, "Y");
    }

    assert_eq!(x.stats().requests_handled, 10);
    assert_eq!(y.stats().requests_handled, 10);
}

#[tokio::test]
async fn response_from_other_namespace_does_not_resolve() {
    let hub = MemoryHub::new();
    let caller = engine_in("x", hub.endpoint());
    let peer = hub.endpoint();
    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let s = Arc::clone(&seen);
    let _sub = peer.listen(Arc::new(move |raw: &Value| {
        s.lock().unwrap().push(raw.clone());
    }));

    let mut reply = caller.request(Call::new("op", ()).unwrap()).await.unwrap();
    let request = Envelope::from_value(&seen.lock().unwrap()[0]).unwrap();
    assert_eq!(request.namespace, "x");

    // Same operation and correlation id, different namespace
    let mut foreign = Envelope::response_to(&request, json!("wrong"));
    foreign.namespace = "y".into();
    peer.send(foreign.to_value().unwrap(), None).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(50), &mut reply).await;
    assert!(waited.is_err());

    let genuine = Envelope::response_to(&request, json!("right"));
    peer.send(genuine.to_value().unwrap(), None).await.unwrap();
    assert_eq!(reply.await.unwrap(), json!("right"));
}

#[tokio::test]
async fn handlers_ignore_foreign_requests() {
    let hub = MemoryHub::new();
    let worker = engine_in("x", hub.endpoint());
    let calls = Arc::new(Mutex::new(0usize));
    let c = Arc::clone(&calls);
    worker
        .on_message(
            "ping",
            handler::from_fn(move |(): ()| {
                *c.lock().unwrap() += 1;
                Ok::<_, HandlerError>("pong")
            }),
        )
        .unwrap();

    let stranger = engine_in("z", hub.endpoint());
    let mut reply = stranger.request(Call::new("ping", ()).unwrap()).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(50), &mut reply).await;

    assert!(waited.is_err());
    assert_eq!(*calls.lock().unwrap(), 0);
    assert_eq!(worker.stats().ignored_envelopes, 1);
}
