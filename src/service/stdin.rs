use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

use crate::host::HostEvent;

/// Service to feed console lines into the host controller.
pub async fn service(events: UnboundedSender<HostEvent>) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_owned();
                if line.is_empty() {
                    continue;
                }
                if events.send(HostEvent::Console(line)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(target: "warhost", "Console read error: {}", err);
                return;
            }
        }
    }
}
