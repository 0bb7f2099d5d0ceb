//! Notifies the forwarder to reload its configuration after a write.

use tracing::{error, info};

const GRACEFUL_PATH: &str = "/api/config.gracefulReload";
const HARD_PATH: &str = "/api/config.reload";

/// Talks to the forwarder's RPC endpoint. `None` (fake/filesystem datasource)
/// is a silent no-op, mirroring a nil receiver in the original reloader.
pub struct ReloadClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReloadClient {
    pub fn new(port: u16) -> Self {
        ReloadClient {
            client: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }

    async fn get(&self, path: &str) -> Result<(), String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await.map_err(|err| err.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("{} returned {}", url, resp.status()))
        }
    }

    /// Tries a graceful reload first, falls back to a hard reload on failure.
    /// Logs and gives up on a second failure; the next reconcile will retry.
    pub async fn reload(&self) {
        if let Err(graceful_err) = self.get(GRACEFUL_PATH).await {
            info!(error = %graceful_err, "graceful reload failed, falling back to hard reload");
            if let Err(hard_err) = self.get(HARD_PATH).await {
                error!(error = %hard_err, "hard reload also failed, giving up until next reconcile");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_does_not_panic() {
        let client = ReloadClient::new(1);
        client.reload().await;
    }
}
