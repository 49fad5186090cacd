use std::time::Duration;

use parley_core::telemetry::init_tracing;
use parley_core::{handler, Engine, EngineConfig, HandlerError, HandlerTable, MemoryTransport};
use tracing::info;

#[tokio::main]
async fn main() -> parley_core::Result<()> {
    init_tracing("info,parley=debug");

    let (host_side, worker_side) = MemoryTransport::pair();
    let config = EngineConfig::from_env().with_request_timeout(Duration::from_secs(2));
    let host = Engine::with_config(host_side, config.clone());
    let worker = Engine::with_config(worker_side, config);

    let _handlers = worker.on_messages(
        HandlerTable::new()
            .on(
                "add",
                handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x + y)),
            )
            .on(
                "greet",
                handler::from_async_fn(|(name,): (String,)| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, HandlerError>(format!("hello, {name}"))
                }),
            ),
    )?;

    let sum: i64 = host.call("add", (2, 3)).await?;
    info!(sum, "add(2, 3)");

    let greetings = host.category("greetings", &["greet"]);
    let greeting: String = greetings.call("greet", ("parley",)).await?;
    info!(%greeting, "greet");

    info!(host = ?host.stats(), worker = ?worker.stats(), "Done");
    Ok(())
}
