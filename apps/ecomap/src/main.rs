use anyhow::Result;
use ecomap::config::Config;
use ecomap::controller::{ControllerSettings, MapController};
use ecomap::supabase::SupabaseGateway;
use std::sync::Arc;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ecomap=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let gateway = Arc::new(SupabaseGateway::new(&config)?);
    if let Some((email, password)) = config.credentials() {
        if let Err(err) = gateway.sign_in_with_password(email, password).await {
            tracing::warn!(error = %err, "sign in failed; viewing signed out");
        }
    }

    let mut controller = MapController::new(gateway, ControllerSettings::from_config(&config));
    let snapshot = controller.initialize().await;
    tracing::info!(%snapshot, "map ready");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            inserted = controller.next_live_insert(), if controller.is_live() => {
                let Some(report) = inserted else {
                    continue;
                };
                let report_id = report.id.clone();
                match controller.on_live_insert(report) {
                    Some(snapshot) => tracing::info!(report_id = %report_id, %snapshot, "new report"),
                    None => tracing::debug!(report_id = %report_id, "report already shown"),
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
