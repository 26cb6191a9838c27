use rand::Rng;
use std::time::{Duration, Instant};

use crate::twitter::{Tweet, TweetSource};
use crate::StageResult;

pub mod seen;

pub use seen::SeenSet;

/// Watches the monitored account for new video posts
pub struct TweetMonitor {
    source: Box<dyn TweetSource>,
}

impl TweetMonitor {
    pub fn new(source: Box<dyn TweetSource>) -> Self {
        Self { source }
    }

    /// Unseen video tweets, oldest first
    ///
    /// The `since_id` cursor keeps most already-handled tweets out of the
    /// response; the seen set catches anything the cursor lets through.
    pub async fn poll(&self, seen: &SeenSet) -> StageResult<Vec<Tweet>> {
        let mut tweets = self.source.fetch_recent(seen.last_seen_id()).await?;
        let fetched = tweets.len();

        tweets.retain(|t| t.has_video() && !seen.contains(t.id));
        tweets.sort_by_key(|t| t.id);

        if tweets.is_empty() {
            tracing::debug!("no new video tweets ({fetched} fetched)");
        } else {
            tracing::info!("{} new video tweets (of {fetched} fetched)", tweets.len());
        }

        Ok(tweets)
    }
}

/// Computes randomized pauses between polls
///
/// A jittered cadence keeps the request pattern from looking mechanical.
#[derive(Debug, Clone, Copy)]
pub struct PollScheduler {
    min_delay: Duration,
    max_delay: Duration,
}

impl PollScheduler {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        // Inverted bounds collapse to the smaller value
        let max_delay = max_delay.max(min_delay);
        Self { min_delay, max_delay }
    }

    /// Pick the pause before the next poll
    pub fn jittered_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }

        let millis = rng.gen_range(self.min_delay.as_millis()..=self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// When the next poll should run, measured from `now`
    pub fn next_run<R: Rng + ?Sized>(&self, now: Instant, rng: &mut R) -> Instant {
        now + self.jittered_delay(rng)
    }
}
