use std::time::Duration;

use tracing::{debug, info, warn};

use chess_core::protocol::{RatingAck, RatingReport};

/// Reports finished matches to the external rating service. One-shot and
/// fire-and-forget: callers dispatch after releasing the game entry, and a
/// failure never reverses the game's terminal state.
#[derive(Clone)]
pub struct RatingNotifier {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl RatingNotifier {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        RatingNotifier { client, base_url }
    }

    /// POST the report to `{base}/rating-update`. Non-2xx counts as failure.
    pub async fn report(&self, report: &RatingReport) -> Result<(), reqwest::Error> {
        let Some(base) = &self.base_url else {
            debug!("rating service not configured, skipping report");
            return Ok(());
        };

        let ack: RatingAck = self
            .client
            .post(format!("{}/rating-update", base))
            .json(report)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!(
            white = %report.white_identity,
            black = %report.black_identity,
            deltas = %ack.rating_deltas,
            "rating update applied"
        );
        Ok(())
    }

    /// Spawn a detached report task. Failures are logged, never retried;
    /// the finished match stays finished either way.
    pub fn dispatch(&self, report: RatingReport) {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.report(&report).await {
                warn!(
                    error = %e,
                    white = %report.white_identity,
                    black = %report.black_identity,
                    "rating update failed"
                );
            }
        });
    }
}
