// src/batch.rs
//! Batch runner: one decision per input record, output in input order.
//!
//! Records are moderated with at most `concurrency` in flight (`buffered` keeps the
//! original order). Cancellation is checked between records: a cancelled run returns
//! the completed prefix only, never a half-finished decision. No per-record error
//! handling is needed here because `Moderator::moderate` is total.

use crate::analyze::Moderator;
use crate::decision::Reason;
use crate::table::{InputRecord, ModeratedRecord};
use crate::telemetry;
use futures::stream::{self, StreamExt};
use metrics::histogram;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub struct BatchCfg {
    pub concurrency: usize,
    /// Log progress every N records (0 disables).
    pub progress_every: usize,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            concurrency: 1,
            progress_every: 0,
        }
    }
}

/// Aggregate counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub flagged: usize,
    pub by_reason: BTreeMap<Reason, usize>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    pub fn count(&self, reason: Reason) -> usize {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Records that fell back to the failure default.
    pub fn fallbacks(&self) -> usize {
        self.by_reason
            .iter()
            .filter(|(r, _)| r.is_fallback())
            .map(|(_, n)| n)
            .sum()
    }

    fn record(&mut self, row: &ModeratedRecord) {
        self.processed += 1;
        if row.decision.flagged {
            self.flagged += 1;
        }
        *self.by_reason.entry(row.decision.reason).or_default() += 1;
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Same order as the input; shorter than the input only when cancelled.
    pub rows: Vec<ModeratedRecord>,
    pub summary: BatchSummary,
}

pub struct BatchRunner {
    moderator: Moderator,
    cfg: BatchCfg,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(moderator: Moderator, cfg: BatchCfg) -> Self {
        Self {
            moderator,
            cfg: BatchCfg {
                concurrency: cfg.concurrency.max(1),
                ..cfg
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token (e.g. wired to Ctrl-C).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, records: Vec<InputRecord>) -> BatchOutcome {
        let started = Instant::now();
        let total = records.len();
        let mut summary = BatchSummary {
            total,
            ..Default::default()
        };
        let mut rows = Vec::with_capacity(total);

        tracing::info!(
            records = total,
            concurrency = self.cfg.concurrency,
            policy = self.moderator.policy().name(),
            provider = self.moderator.provider_name(),
            "batch started"
        );

        let cancel = &self.cancel;
        let moderator = &self.moderator;
        let mut decided = std::pin::pin!(stream::iter(records)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|record| async move {
                let decision = moderator.moderate(record.text()).await;
                ModeratedRecord { record, decision }
            })
            .buffered(self.cfg.concurrency));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = decided.next() => item,
            };
            let Some(row) = next else { break };

            summary.record(&row);
            tracing::debug!(
                row = rows.len(),
                flagged = row.decision.flagged,
                reason = %row.decision.reason,
                "record moderated"
            );
            rows.push(row);

            if self.cfg.progress_every > 0 && rows.len() % self.cfg.progress_every == 0 {
                tracing::info!(done = rows.len(), total, flagged = summary.flagged, "progress");
            }
        }

        summary.cancelled = rows.len() < total && cancel.is_cancelled();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!(telemetry::BATCH_DURATION_MS).record(summary.elapsed_ms as f64);

        if summary.cancelled {
            tracing::warn!(done = rows.len(), total, "batch cancelled; keeping completed records");
        } else {
            tracing::info!(
                processed = summary.processed,
                flagged = summary.flagged,
                fallbacks = summary.fallbacks(),
                elapsed_ms = summary.elapsed_ms,
                "batch finished"
            );
        }

        BatchOutcome { rows, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::MockClassifier;
    use crate::policy::{Policy, PolicyDocument, Rule};
    use std::sync::Arc;

    fn moderator() -> Moderator {
        let policy = Policy::from_document(PolicyDocument {
            name: "t".into(),
            version: "1".into(),
            description: None,
            llm_prompt: "FLAG or OK".into(),
            rules: vec![Rule::Keyword {
                value: vec!["bad".into()],
            }],
        })
        .unwrap();
        Moderator::new(Arc::new(policy), Arc::new(MockClassifier::new("ok")))
    }

    fn records(texts: &[&str]) -> Vec<InputRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| InputRecord::new(vec![i.to_string(), t.to_string()], 1))
            .collect()
    }

    #[tokio::test]
    async fn summary_counts_reasons() {
        let runner = BatchRunner::new(moderator(), BatchCfg::default());
        let out = runner.run(records(&["bad", "good", "", "BAD too"])).await;
        assert_eq!(out.rows.len(), 4);
        assert_eq!(out.summary.flagged, 2);
        assert_eq!(out.summary.count(Reason::KeywordMatch), 2);
        assert_eq!(out.summary.count(Reason::LlmOk), 1);
        assert_eq!(out.summary.count(Reason::EmptyText), 1);
        assert_eq!(out.summary.fallbacks(), 0);
        assert!(!out.summary.cancelled);
    }

    #[tokio::test]
    async fn pre_cancelled_run_processes_nothing() {
        let runner = BatchRunner::new(moderator(), BatchCfg::default());
        runner.cancellation_token().cancel();
        let out = runner.run(records(&["a", "b"])).await;
        assert!(out.rows.is_empty());
        assert!(out.summary.cancelled);
    }
}
