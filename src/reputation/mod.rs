//! Peer-feedback reputation ledger.
//!
//! Folds 1-5 star ratings into per-category running averages and a weighted
//! overall score bounded to 0-100. Every accepted submission is also queued
//! for the optional external mirror (see [`mirror`]).

pub mod mirror;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::types::{normalize_address, AgentId, FeedbackCategory, Rejection};

/// Score given to agents nobody has rated yet.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Longest comment kept on a feedback record.
const MAX_COMMENT_LEN: usize = 500;

/// Feedback records retained for inspection, newest last.
const MAX_HISTORY: usize = 1_000;

/// Unflushed feedback kept while the mirror is unreachable. Oldest is
/// dropped first.
const MAX_PENDING: usize = 1_000;

/// One submitted rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub from: AgentId,
    pub to: AgentId,
    pub category: FeedbackCategory,
    pub rating: u8,
    pub comment: String,
    pub submitted_at: DateTime<Utc>,
}

/// Running average for a single category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    /// Mean rating on the 1-5 scale.
    pub average: f64,
    pub count: u32,
}

impl CategoryScore {
    fn fold(&mut self, rating: u8) {
        let n = self.count as f64;
        self.average = (self.average * n + rating as f64) / (n + 1.0);
        self.count += 1;
    }

    /// Map the 1-5 mean onto 0-100.
    pub fn normalized(&self) -> f64 {
        ((self.average - 1.0) / 4.0 * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationScore {
    pub agent_id: AgentId,
    pub overall_score: f64,
    pub components: BTreeMap<FeedbackCategory, CategoryScore>,
    pub feedback_received: u32,
    pub last_updated: DateTime<Utc>,
    /// Last score adopted from the external ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<ExternalScore>,
    /// Ratings the baseline does not include yet.
    #[serde(skip)]
    since_baseline: BTreeMap<FeedbackCategory, CategoryScore>,
}

impl ReputationScore {
    /// Unrated score for `agent_id`.
    pub fn neutral(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            overall_score: NEUTRAL_SCORE,
            components: BTreeMap::new(),
            feedback_received: 0,
            last_updated: Utc::now(),
            baseline: None,
            since_baseline: BTreeMap::new(),
        }
    }

    fn fold(&mut self, category: FeedbackCategory, rating: u8) {
        let empty = CategoryScore { average: 0.0, count: 0 };
        self.components.entry(category).or_insert(empty).fold(rating);
        self.since_baseline.entry(category).or_insert(empty).fold(rating);
    }

    /// Without a baseline: the weighted local mean. With one: the baseline
    /// blended with the ratings it has not seen, weighted by count.
    fn recompute(&mut self) {
        let score = match self.baseline {
            None => weighted_mean(&self.components).unwrap_or(NEUTRAL_SCORE),
            Some(base) => {
                let fresh: u32 = self.since_baseline.values().map(|c| c.count).sum();
                match weighted_mean(&self.since_baseline) {
                    Some(local) if fresh > 0 => {
                        let (m, n) = (base.feedback_count as f64, fresh as f64);
                        (base.overall_score * m + local * n) / (m + n)
                    }
                    _ => base.overall_score,
                }
            }
        };
        self.overall_score = ((score * 100.0).round() / 100.0).clamp(0.0, 100.0);
    }
}

/// Weighted mean of the categories that have ratings, renormalised over the
/// weights present.
fn weighted_mean(components: &BTreeMap<FeedbackCategory, CategoryScore>) -> Option<f64> {
    let (weighted, weights) = components
        .iter()
        .fold((0.0, 0.0), |(acc, w), (cat, score)| {
            (acc + cat.weight() * score.normalized(), w + cat.weight())
        });
    (weights > 0.0).then(|| weighted / weights)
}

/// Overall score as reported by the external ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalScore {
    pub overall_score: f64,
    pub feedback_count: u32,
}

#[derive(Debug, Default)]
pub struct ReputationLedger {
    scores: HashMap<AgentId, ReputationScore>,
    history: VecDeque<Feedback>,
    pending: Vec<Feedback>,
}

impl ReputationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rating from `from` about `to`.
    pub fn submit_feedback(
        &mut self,
        from: &str,
        to: &str,
        category: FeedbackCategory,
        rating: u8,
        comment: &str,
    ) -> Result<&ReputationScore, Rejection> {
        let from = normalize_address(from);
        let to = normalize_address(to);
        if from == to {
            return Err(Rejection::SelfTarget);
        }
        if !(1..=5).contains(&rating) {
            return Err(Rejection::InvalidRating(rating));
        }

        let feedback = Feedback {
            from,
            to: to.clone(),
            category,
            rating,
            comment: comment.chars().take(MAX_COMMENT_LEN).collect(),
            submitted_at: Utc::now(),
        };

        let score = self
            .scores
            .entry(to.clone())
            .or_insert_with(|| ReputationScore::neutral(&to));
        score.fold(category, rating);
        score.feedback_received += 1;
        score.last_updated = feedback.submitted_at;
        score.recompute();

        debug!(
            to = %to,
            %category,
            rating,
            overall = score.overall_score,
            "Feedback recorded"
        );

        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(feedback.clone());
        self.pending.push(feedback);
        self.trim_pending();
        Ok(&self.scores[&to])
    }

    pub fn score(&self, agent_id: &str) -> Option<&ReputationScore> {
        self.scores.get(&normalize_address(agent_id))
    }

    /// Overall score, neutral when unrated.
    pub fn overall(&self, agent_id: &str) -> f64 {
        self.score(agent_id)
            .map(|s| s.overall_score)
            .unwrap_or(NEUTRAL_SCORE)
    }

    /// Most recent feedback, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Feedback> {
        self.history.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain everything waiting for the mirror.
    pub fn take_pending(&mut self) -> Vec<Feedback> {
        std::mem::take(&mut self.pending)
    }

    /// Put back feedback the mirror did not accept, ahead of newer entries.
    pub fn requeue(&mut self, mut failed: Vec<Feedback>) {
        if failed.is_empty() {
            return;
        }
        failed.append(&mut self.pending);
        self.pending = failed;
        self.trim_pending();
    }

    fn trim_pending(&mut self) {
        if self.pending.len() > MAX_PENDING {
            let excess = self.pending.len() - MAX_PENDING;
            self.pending.drain(..excess);
            warn!(dropped = excess, "Pending feedback queue full, dropping oldest");
        }
    }

    /// Adopt the external score as the baseline. Local feedback the mirror
    /// has not seen yet is blended on top, and so is anything rated later.
    pub fn merge_external(&mut self, agent_id: &str, external: ExternalScore) -> &ReputationScore {
        let id = normalize_address(agent_id);
        let mut unseen: BTreeMap<FeedbackCategory, CategoryScore> = BTreeMap::new();
        for f in self.pending.iter().filter(|f| f.to == id) {
            unseen
                .entry(f.category)
                .or_insert(CategoryScore { average: 0.0, count: 0 })
                .fold(f.rating);
        }
        let unflushed: u32 = unseen.values().map(|c| c.count).sum();

        let score = self
            .scores
            .entry(id.clone())
            .or_insert_with(|| ReputationScore::neutral(&id));
        score.baseline = Some(ExternalScore {
            overall_score: external.overall_score.clamp(0.0, 100.0),
            feedback_count: external.feedback_count,
        });
        score.since_baseline = unseen;
        score.feedback_received = external.feedback_count + unflushed;
        score.last_updated = Utc::now();
        score.recompute();
        info!(
            agent_id = %id,
            overall = score.overall_score,
            feedback = score.feedback_received,
            "Reputation synced from external ledger"
        );
        &self.scores[&id]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
