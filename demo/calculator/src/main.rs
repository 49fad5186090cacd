mod config;
use config::CalculatorConfig;
use parley_core::telemetry::init_tracing;
use parley_core::{handler, Engine, HandlerError, HandlerTable, ParleyError, StreamTransport};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const WORKER_FLAG: &str = "--worker";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = CalculatorConfig::load();
    if std::env::args().any(|a| a == WORKER_FLAG) {
        init_tracing(&cfg.worker_log_filter);
        run_worker(cfg).await
    } else {
        init_tracing("info,parley=info,calculator=info");
        run_host(cfg).await
    }
}

fn calculator_table(slow_echo_delay: Duration) -> HandlerTable {
    HandlerTable::new()
        .on(
            "add",
            handler::from_fn(|(x, y): (f64, f64)| Ok::<_, HandlerError>(x + y)),
        )
        .on(
            "mul",
            handler::from_fn(|(x, y): (f64, f64)| Ok::<_, HandlerError>(x * y)),
        )
        .on(
            "div",
            handler::from_fn(|(x, y): (f64, f64)| {
                if y == 0.0 {
                    return Err(HandlerError::new("DIV_BY_ZERO", "division by zero"));
                }
                Ok(x / y)
            }),
        )
        .on(
            "slow_echo",
            handler::from_async_fn(move |(text,): (String,)| async move {
                tokio::time::sleep(slow_echo_delay).await;
                Ok::<_, HandlerError>(text)
            }),
        )
}

async fn run_worker(cfg: CalculatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let worker = Engine::with_config(StreamTransport::stdio()?, cfg.engine_config());
    let registration = worker.on_messages(calculator_table(cfg.slow_echo_delay()))?;
    info!(
        target: "calculator",
        namespace = %worker.namespace(),
        operations = ?registration.operations(),
        "Worker ready"
    );

    // Serve until the host closes our stdin
    worker.transport().closed().await;

    info!(target: "calculator", stats = ?worker.stats(), "Worker exiting");
    Ok(())
}

async fn run_host(cfg: CalculatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let exe = std::env::current_exe()?;
    let mut child = Command::new(exe)
        .arg(WORKER_FLAG)
        .envs(cfg.worker_env())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let host = Engine::with_config(StreamTransport::from_child(&mut child)?, cfg.engine_config());
    info!(target: "calculator", namespace = %host.namespace(), "Host started worker");

    let math = host.category("math", &["add", "mul", "div"]);
    let sum: f64 = math.call("add", (2, 3)).await?;
    println!("add(2, 3) = {sum}");
    let product: f64 = math.call("mul", (6, 7)).await?;
    println!("mul(6, 7) = {product}");

    match math.call::<f64, _>("div", (1, 0)).await {
        Ok(v) => println!("div(1, 0) = {v}"),
        Err(ParleyError::Remote { code, message, .. }) => {
            println!("div(1, 0) failed: [{code}] {message}")
        }
        Err(e) => return Err(e.into()),
    }

    // Responses come back in completion order; each caller still gets its own
    let (a, b, c) = tokio::join!(
        host.call::<String, _>("slow_echo", ("first",)),
        host.call::<String, _>("slow_echo", ("second",)),
        host.call::<String, _>("slow_echo", ("third",)),
    );
    println!("slow_echo -> {}, {}, {}", a?, b?, c?);

    info!(target: "calculator", stats = ?host.stats(), "Host done");

    // Closing the transport ends the worker's input
    drop(math);
    drop(host);
    match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
        Ok(status) => {
            let status = status?;
            info!(target: "calculator", %status, "Worker exited");
        }
        Err(_) => {
            warn!(target: "calculator", "Worker did not exit; killing it");
            child.kill().await?;
        }
    }
    Ok(())
}
