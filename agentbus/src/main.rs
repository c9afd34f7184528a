use agentbus::config::{self, AgentBusConfig};
use agentbus::AppState;
use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env values before reading config. Search the current directory
    // and ancestors so running from `agentbus/` still picks up the root file.
    config::load_dotenv();
    let config = AgentBusConfig::from_env().context("invalid AGENTBUS_* configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting AgentBus runtime");

    let app = AppState::start(config)
        .await
        .context("failed to start AgentBus runtime")?;

    let mut reports = app.telemetry().subscribe();
    tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => tracing::info!(
                    envelope_id = %report.envelope_id,
                    event_type = %report.event_type,
                    origin = ?report.origin,
                    kind = ?report.kind,
                    eligible = report.eligible,
                    delivered = report.delivered,
                    timeouts = report.timeouts,
                    errors = report.errors,
                    elapsed_ms = report.elapsed_ms,
                    "dispatch"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dispatch report stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");

    match app.stop_all_agents().await {
        Ok(stopped) => tracing::info!(stopped, "Agents stopped"),
        Err(e) => tracing::warn!(error = %e, "Failed to stop agents"),
    }
    app.shutdown().await;

    tracing::info!("AgentBus runtime stopped");
    Ok(())
}
