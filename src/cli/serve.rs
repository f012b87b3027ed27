//! `polychat serve`

use std::error::Error;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::cli::resolve_proxy_settings;
use crate::core::catalog::ModelCatalog;
use crate::core::config::{ClientSettings, Config};
use crate::proxy::http::{serve, AppState};
use crate::proxy::StreamingProxy;

pub async fn run_serve(config: &Config, listen: Option<String>) -> Result<(), Box<dyn Error>> {
    let settings = resolve_proxy_settings(config)?;
    let catalog = Arc::new(ModelCatalog::builtin()?);
    let listen_addr = listen.unwrap_or_else(|| ClientSettings::from_config(config).listen_addr);

    info!(
        base_url = %settings.base_url,
        timeout_secs = settings.timeout.as_secs(),
        models = catalog.list().len(),
        "starting proxy"
    );

    let state = AppState::new(StreamingProxy::new(Arc::new(settings), catalog));
    let listener = TcpListener::bind(&listen_addr).await?;

    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await?;
    Ok(())
}
