use super::ServeArgs;
use crate::{
    config::ServerSettings,
    error::HandoverError,
    handler::Echo,
    listener::InheritedListeners,
    server::{ServerConfig, listen_and_serve},
    signal::OsSignals,
};
use tracing::{debug, info};

pub async fn serve(args: ServeArgs) -> Result<(), HandoverError> {
    let ServeArgs { server, logger } = args;
    logger.init()?;
    info!(
        "Starting handover v{} `serve` service",
        env!("CARGO_PKG_VERSION")
    );

    let settings: ServerSettings = server.load()?;
    debug!("effective config: {:#?}", settings);

    // Installed before the listener exists so an early signal is not lost.
    let notifier = OsSignals::new().map_err(HandoverError::Signal)?;

    let config = ServerConfig::new(settings.addr, Echo, settings.shutdown_timeout);
    listen_and_serve(config, InheritedListeners::default(), notifier).await?;

    info!("shutdown complete");
    Ok(())
}
