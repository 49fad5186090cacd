use std::time::Duration;

use parley_core::{
    handler, Engine, EngineConfig, HandlerError, HandlerTable, ParleyError, StreamTransport,
};

fn linked_pair() -> (StreamTransport, StreamTransport) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        StreamTransport::new(left_read, left_write).unwrap(),
        StreamTransport::new(right_read, right_write).unwrap(),
    )
}

#[tokio::test]
async fn engines_talk_over_byte_streams() {
    let (a, b) = linked_pair();
    let host = Engine::new(a);
    let worker = Engine::new(b);

    worker
        .on_messages(
            HandlerTable::new()
                .on(
                    "add",
                    handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x + y)),
                )
                .on(
                    "upper",
                    handler::from_async_fn(|(s,): (String,)| async move {
                        Ok::<_, HandlerError>(s.to_uppercase())
                    }),
                ),
        )
        .unwrap();

    let sum: i64 = host.call("add", (40, 2)).await.unwrap();
    assert_eq!(sum, 42);
    let shout: String = host.call("upper", ("quiet",)).await.unwrap();
    assert_eq!(shout, "QUIET");
}

#[tokio::test]
async fn concurrent_calls_over_one_stream() {
    let (a, b) = linked_pair();
    let host = Engine::new(a);
    let worker = Engine::new(b);

    worker
        .on_message(
            "delayed",
            handler::from_async_fn(|(n,): (u64,)| async move {
                tokio::time::sleep(Duration::from_millis(50 - n * 5)).await;
                Ok::<_, HandlerError>(n * 10)
            }),
        )
        .unwrap();

    let calls = (0..8u64).map(|n| {
        let host = host.clone();
        async move { host.call::<u64, _>("delayed", (n,)).await }
    });
    let results = futures_join_all(calls).await;

    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), n as u64 * 10);
    }
    assert_eq!(host.pending(), 0);
}

#[tokio::test]
async fn closed_peer_leaves_requests_to_time_out() {
    let (a, b) = linked_pair();
    let host = Engine::with_config(
        a,
        EngineConfig::new().with_request_timeout(Duration::from_millis(50)),
    );
    drop(b);

    // The write may still succeed into the buffer; nobody will answer
    match host.call::<i64, _>("add", (1, 2)).await {
        Err(ParleyError::Timeout { .. }) | Err(ParleyError::Transport(_)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(host.pending(), 0);
}

// Spawn each future as a task and collect results in order
async fn futures_join_all<F, T>(futures: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}
