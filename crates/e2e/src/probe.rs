//! Reachability check for the application under test

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Poll `base_url` until it answers with a success status or `timeout` elapses
pub async fn wait_for_app(base_url: &str, timeout: Duration) -> E2eResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match client.get(base_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("Application is up at {}", base_url);
                return Ok(());
            }
            Ok(resp) => {
                warn!("{} returned {}", base_url, resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} ...", base_url);
                }
                if !e.is_connect() {
                    warn!("Reachability check error: {}", e);
                }
            }
        }

        if start.elapsed() >= timeout {
            break;
        }
        sleep(PROBE_INTERVAL).await;
    }

    Err(E2eError::ServerUnreachable {
        url: base_url.to_string(),
        attempts,
    })
}
