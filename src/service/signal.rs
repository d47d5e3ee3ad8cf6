use tokio::sync::mpsc::UnboundedSender;

use crate::host::HostEvent;

/// Service to catch the interrupt signal and request a clean shutdown.
pub async fn service(events: UnboundedSender<HostEvent>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target: "warhost", "Failed to listen for shutdown signal: {}", err);
        return;
    }
    info!(target: "warhost", "Interrupt received");
    let _ = events.send(HostEvent::Shutdown);
}
