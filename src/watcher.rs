//! The polling state machine: seed, then fetch → diff → deliver → persist → sleep.
//!
//! One task owns the watcher for its whole life, so the seen set needs no
//! locking. Every failure below this layer is logged and absorbed; only
//! the shutdown signal ends [`Watcher::run`].

use crate::config::{MarkSeenPolicy, WatchConfig};
use crate::feed::{FeedError, FeedSource, Post};
use crate::format::format_post;
use crate::notify::Notifier;
use crate::shutdown::Shutdown;
use crate::store::{SeenSet, SeenStore};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Seeding,
    Running,
    ShuttingDown,
    Stopped,
}

/// Result of one fetch → deliver pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fetch succeeded but every cast was already seen.
    Idle,
    Delivered { new: usize, delivered: usize, failed: usize },
    /// Fetch failed; wait `backoff` before the next cycle.
    FetchFailed { backoff: Duration },
}

/// Counters reported when the watcher stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub cycles: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub fetch_failures: u64,
    pub seen: usize,
}

#[derive(Debug, Clone)]
struct Timings {
    poll_interval: Duration,
    transport_backoff: Duration,
    protocol_backoff: Duration,
    delivery_pause: Duration,
}

pub struct Watcher<F, N> {
    feed: F,
    notifier: N,
    store: SeenStore,
    fid: u64,
    limit: u32,
    policy: MarkSeenPolicy,
    timings: Timings,
    seen: SeenSet,
    shutdown: Shutdown,
    phase: WatchPhase,
    summary: WatchSummary,
}

/// Casts in `posts` not yet in `seen`, in feed order. A hash repeated
/// within the batch is only returned once.
pub fn select_new<'a>(posts: &'a [Post], seen: &SeenSet) -> Vec<&'a Post> {
    let mut batch: HashSet<&str> = HashSet::new();
    posts
        .iter()
        .filter(|p| !seen.contains(&p.id) && batch.insert(p.id.as_str()))
        .collect()
}

impl<F: FeedSource, N: Notifier> Watcher<F, N> {
    /// Build a watcher for `fid`, loading the seen set from `store`.
    pub fn new(
        feed: F,
        notifier: N,
        store: SeenStore,
        fid: u64,
        config: &WatchConfig,
        shutdown: Shutdown,
    ) -> Self {
        let seen = store.load();
        let poll_interval = config.poll_interval();
        Self {
            feed,
            notifier,
            store,
            fid,
            limit: config.last_n,
            policy: config.mark_seen,
            timings: Timings {
                poll_interval,
                transport_backoff: config.transport_backoff().min(poll_interval),
                protocol_backoff: config.protocol_backoff().min(poll_interval),
                delivery_pause: config.delivery_pause(),
            },
            seen,
            shutdown,
            phase: WatchPhase::Seeding,
            summary: WatchSummary::default(),
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn summary(&self) -> &WatchSummary {
        &self.summary
    }

    /// Run until shutdown is requested, then persist and return the counters.
    pub async fn run(&mut self) -> WatchSummary {
        self.phase = WatchPhase::Seeding;
        if self.seen.is_empty() {
            self.seed().await;
        } else {
            tracing::info!(count = self.seen.len(), "loaded seen set, skipping seeding");
        }

        if !self.shutdown.is_requested() {
            self.phase = WatchPhase::Running;
            tracing::info!(fid = self.fid, "started watching");
        }

        while !self.shutdown.is_requested() {
            let pause = match self.run_cycle().await {
                CycleOutcome::FetchFailed { backoff } => backoff,
                _ => self.timings.poll_interval,
            };
            if self.shutdown.sleep(pause).await {
                break;
            }
        }

        self.phase = WatchPhase::ShuttingDown;
        tracing::info!("shutting down gracefully");
        self.persist();
        self.summary.seen = self.seen.len();
        tracing::info!(
            seen = self.summary.seen,
            path = %self.store.path().display(),
            cycles = self.summary.cycles,
            delivered = self.summary.delivered,
            delivery_failures = self.summary.delivery_failures,
            fetch_failures = self.summary.fetch_failures,
            "saved seen set"
        );

        self.phase = WatchPhase::Stopped;
        tracing::info!("watcher stopped");
        self.summary.clone()
    }

    /// Mark the current feed window as seen without notifying, so existing
    /// history is not replayed on first start. Returns the number of casts marked.
    /// On fetch failure the set stays empty.
    pub async fn seed(&mut self) -> usize {
        tracing::info!(fid = self.fid, "initializing seen set with existing casts");
        match self.feed.fetch_latest(self.fid, self.limit).await {
            Ok(posts) => {
                let mut marked = 0;
                for post in posts {
                    if self.seen.insert(post.id) {
                        marked += 1;
                    }
                }
                self.persist();
                tracing::info!(count = marked, "marked existing casts as seen");
                marked
            }
            Err(e) => {
                tracing::warn!(error = %e, "initialization error, starting with empty seen set");
                0
            }
        }
    }

    /// One fetch → diff → deliver → persist pass. Does not sleep after.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.summary.cycles += 1;

        let posts = match self.feed.fetch_latest(self.fid, self.limit).await {
            Ok(posts) => posts,
            Err(e) => {
                self.summary.fetch_failures += 1;
                let backoff = match e {
                    FeedError::Transport(_) => self.timings.transport_backoff,
                    FeedError::Protocol(_) => self.timings.protocol_backoff,
                };
                tracing::warn!(
                    fid = self.fid,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "error fetching casts, backing off"
                );
                return CycleOutcome::FetchFailed { backoff };
            }
        };

        let fresh: Vec<Post> = select_new(&posts, &self.seen).into_iter().cloned().collect();
        if fresh.is_empty() {
            tracing::debug!(fid = self.fid, "no new casts");
            return CycleOutcome::Idle;
        }
        tracing::info!(fid = self.fid, count = fresh.len(), "found new casts");

        if self.policy == MarkSeenPolicy::BeforeDelivery {
            for post in &fresh {
                self.seen.insert(post.id.clone());
            }
        }

        let mut delivered = 0;
        let mut failed = 0;
        // Feed order is newest-first; notify oldest-first
        for (i, post) in fresh.iter().rev().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.timings.delivery_pause).await;
            }
            let text = format_post(post);
            if self.notifier.deliver(&text).await {
                delivered += 1;
                if self.policy == MarkSeenPolicy::AfterDelivery {
                    self.seen.insert(post.id.clone());
                }
                tracing::debug!(id = %post.id, "sent cast");
            } else {
                failed += 1;
                tracing::error!(id = %post.id, policy = ?self.policy, "failed sending cast");
            }
        }

        self.persist();
        self.summary.delivered += delivered as u64;
        self.summary.delivery_failures += failed as u64;

        CycleOutcome::Delivered {
            new: fresh.len(),
            delivered,
            failed,
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.seen) {
            tracing::error!("failed to save seen set: {:#}", e);
        }
    }
}
