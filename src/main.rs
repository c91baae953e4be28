use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use windowsync::command::{Command, parse_command};
use windowsync::config::Config;
use windowsync::engine::Engine;
use windowsync::memory::MemoryBackend;
use windowsync::model::Snapshot;

/// Time allowed for a backend write to reach the engine's channels.
const PROPAGATION_GRACE: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    windowsync::observability::init(config.metrics_port);

    let backend = Arc::new(MemoryBackend::new(config.channel_capacity));
    if let Some(path) = &config.fixture {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        info!("loaded fixture {}", path.display());
        backend.seed(snapshot);
    }

    let engine = Engine::new(backend.clone(), backend.clone(), backend.clone(), &config);
    engine.set_period(config.period.as_deref()).await?;
    let window = engine.window().await;
    info!("windowsync ready");
    info!("  timezone: {}", config.timezone);
    info!("  window: {}..{}", window.start_str, window.end_str);
    info!("  strict_health: {}", config.strict_health);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    print_view(&engine, &mut stdout).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let cmd = match parse_command(&line) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!("{e}");
                        continue;
                    }
                };
                run(&engine, &backend, cmd).await;
                print_view(&engine, &mut stdout).await?;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    engine.shutdown().await;
    info!("windowsync stopped");
    Ok(())
}

async fn run(engine: &Engine, backend: &MemoryBackend, cmd: Command) {
    match cmd {
        Command::Upsert { row } => backend.upsert(row),
        Command::Delete { kind, id } => {
            if !backend.delete(kind, id) {
                warn!("{kind} {id} not found");
            }
        }
        Command::Period { value } => match engine.set_period(value.as_deref()).await {
            Ok(true) => {}
            Ok(false) => info!("window unchanged"),
            Err(e) => warn!("period change failed: {e}"),
        },
        Command::View => return,
    }
    tokio::time::sleep(PROPAGATION_GRACE).await;
    engine.settle().await;
}

async fn print_view(
    engine: &Engine,
    out: &mut tokio::io::Stdout,
) -> Result<(), Box<dyn std::error::Error>> {
    let view = engine.view().await;
    let mut json = serde_json::to_vec(&*view)?;
    json.push(b'\n');
    out.write_all(&json).await?;
    out.flush().await?;
    Ok(())
}
