//! External reputation mirror.
//!
//! Pending feedback is pushed in small batches with a pause between calls so
//! the external ledger is never flooded. Fetches treat the external overall
//! score as authoritative (see [`super::ReputationLedger::merge_external`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExternalScore, Feedback};
use crate::types::AgentId;

/// Remote store for reputation data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReputationMirror: Send + Sync {
    /// Submit one batch of feedback.
    async fn submit_batch(&self, batch: &[Feedback]) -> Result<()>;

    /// Fetch the remote score for an agent, `None` if unknown remotely.
    async fn fetch_score(&self, agent_id: &str) -> Result<Option<ExternalScore>>;
}

/// Flush `pending` in batches of `batch_size`, sleeping `delay` between
/// calls. Returns the feedback that could not be delivered, in order, so the
/// caller can requeue it.
pub async fn flush(
    mirror: &dyn ReputationMirror,
    pending: Vec<Feedback>,
    batch_size: usize,
    delay: Duration,
) -> Vec<Feedback> {
    if pending.is_empty() {
        return pending;
    }
    let batch_size = batch_size.max(1);
    let mut failed = Vec::new();
    let mut delivered = 0usize;

    for (i, batch) in pending.chunks(batch_size).enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match mirror.submit_batch(batch).await {
            Ok(()) => delivered += batch.len(),
            Err(e) => {
                warn!(error = %e, size = batch.len(), "Reputation batch rejected by mirror");
                failed.extend_from_slice(batch);
            }
        }
    }

    info!(delivered, failed = failed.len(), "Reputation flush complete");
    failed
}

/// Fetch remote scores for several agents concurrently. Agents whose fetch
/// fails or who are unknown remotely are skipped.
pub async fn fetch_all(
    mirror: &dyn ReputationMirror,
    agent_ids: &[AgentId],
) -> Vec<(AgentId, ExternalScore)> {
    let fetches = agent_ids.iter().map(|id| async move {
        match mirror.fetch_score(id).await {
            Ok(Some(score)) => Some((id.clone(), score)),
            Ok(None) => None,
            Err(e) => {
                warn!(agent_id = %id, error = %e, "Reputation fetch failed");
                None
            }
        }
    });
    futures::future::join_all(fetches)
        .await
        .into_iter()
        .flatten()
        .collect()
}

// ---------------------------------------------------------------------------
// HTTP mirror
// ---------------------------------------------------------------------------

/// Mirror backed by a JSON HTTP service.
pub struct HttpReputationMirror {
    http: Client,
    endpoint: String,
}

impl HttpReputationMirror {
    pub fn new(endpoint: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("caliguland/0.1.0 (reputation-mirror)")
            .build()
            .context("Failed to build HTTP client for reputation mirror")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReputationMirror for HttpReputationMirror {
    async fn submit_batch(&self, batch: &[Feedback]) -> Result<()> {
        let url = format!("{}/feedback/batch", self.endpoint);
        debug!(url = %url, size = batch.len(), "Submitting reputation batch");

        let resp = self
            .http
            .post(&url)
            .json(&batch)
            .send()
            .await
            .context("Reputation mirror request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reputation mirror error {status}: {body}");
        }
        Ok(())
    }

    async fn fetch_score(&self, agent_id: &str) -> Result<Option<ExternalScore>> {
        let url = format!("{}/reputation/{agent_id}", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Reputation mirror request failed")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Reputation mirror error {status}");
        }

        let score: ExternalScore = resp
            .json()
            .await
            .context("Failed to parse reputation mirror response")?;
        Ok(Some(score))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeedbackCategory;
    use chrono::Utc;

    fn feedback(n: usize) -> Vec<Feedback> {
        (0..n)
            .map(|i| Feedback {
                from: format!("0x{i:02x}"),
                to: "0xff".into(),
                category: FeedbackCategory::Accuracy,
                rating: 4,
                comment: i.to_string(),
                submitted_at: Utc::now(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_flush_splits_into_batches() {
        let mut mirror = MockReputationMirror::new();
        mirror
            .expect_submit_batch()
            .withf(|batch: &[Feedback]| batch.len() <= 2)
            .times(3)
            .returning(|_| Ok(()));

        let failed = flush(&mirror, feedback(5), 2, Duration::ZERO).await;
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn test_flush_returns_failed_batches() {
        let mut mirror = MockReputationMirror::new();
        let mut call = 0;
        mirror.expect_submit_batch().times(2).returning(move |_| {
            call += 1;
            if call == 2 {
                Err(anyhow::anyhow!("ledger offline"))
            } else {
                Ok(())
            }
        });

        let failed = flush(&mirror, feedback(4), 2, Duration::ZERO).await;
        let comments: Vec<_> = failed.iter().map(|f| f.comment.as_str()).collect();
        assert_eq!(comments, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_flush_empty_makes_no_calls() {
        let mirror = MockReputationMirror::new();
        let failed = flush(&mirror, Vec::new(), 2, Duration::ZERO).await;
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failures() {
        let mut mirror = MockReputationMirror::new();
        mirror
            .expect_fetch_score()
            .withf(|id: &str| id == "0xaa")
            .returning(|_| Ok(Some(ExternalScore { overall_score: 70.0, feedback_count: 3 })));
        mirror
            .expect_fetch_score()
            .withf(|id: &str| id == "0xbb")
            .returning(|_| Err(anyhow::anyhow!("timeout")));
        mirror
            .expect_fetch_score()
            .withf(|id: &str| id == "0xcc")
            .returning(|_| Ok(None));

        let ids = vec!["0xaa".to_string(), "0xbb".to_string(), "0xcc".to_string()];
        let scores = fetch_all(&mirror, &ids).await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, "0xaa");
        assert_eq!(scores[0].1.feedback_count, 3);
    }
}
