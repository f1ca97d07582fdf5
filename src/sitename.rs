//! Unique site name generation
//!
//! Names are the salted hashids encoding of the current wall clock, split into
//! (seconds since launch, sub-second milliseconds). The store arbitrates
//! uniqueness: a name is only handed out once `create_site` accepted it.

use crate::error::SiteError;
use crate::store::{RuleStore, StoreError};
use anyhow::{anyhow, Result};
use chrono::Utc;
use harsh::Harsh;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Seconds offset subtracted from the clock so early names stay short
pub const LAUNCH_EPOCH_SECS: i64 = 1_417_447_141;

pub const MAX_GENERATE_ATTEMPTS: u32 = 5;

/// Lowercase only: names end up as DNS labels
const SITE_NAME_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz1234567890";

const RETRY_JITTER_MS: std::ops::RangeInclusive<u64> = 10..=20;

pub struct SiteNameGenerator {
    harsh: Harsh,
}

impl SiteNameGenerator {
    pub fn new(salt: &str, min_length: usize) -> Result<Self> {
        let harsh = Harsh::builder()
            .salt(salt)
            .length(min_length)
            .alphabet(SITE_NAME_ALPHABET)
            .build()
            .map_err(|e| anyhow!("Invalid site name settings: {}", e))?;

        Ok(Self { harsh })
    }

    /// Encode a seed pair into a site name
    pub fn encode(&self, seed: [u64; 2]) -> String {
        self.harsh.encode(&seed)
    }

    /// Claim a fresh site in `store`.
    ///
    /// Collisions are retried after a short random pause so concurrent callers
    /// spread out over different milliseconds. Any other storage failure aborts
    /// at once.
    pub async fn generate_unique_site_name(
        &self,
        store: &dyn RuleStore,
        max_attempts: u32,
    ) -> Result<String, SiteError> {
        for attempt in 1..=max_attempts {
            let site = self.encode(clock_seed());

            match store.create_site(&site).await {
                Ok(()) => {
                    debug!(site = %site, attempt, "Claimed site name");
                    return Ok(site);
                }
                Err(StoreError::SiteExists(_)) => {
                    debug!(site = %site, attempt, "Site name collision");
                    if attempt < max_attempts {
                        let jitter = rand::thread_rng().gen_range(RETRY_JITTER_MS);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = max_attempts, "Could not generate a unique site name");
        Err(SiteError::CannotCreateSite)
    }
}

fn clock_seed() -> [u64; 2] {
    let now = Utc::now();
    let seconds = u64::try_from(now.timestamp() - LAUNCH_EPOCH_SECS).unwrap_or(0);
    [seconds, u64::from(now.timestamp_subsec_millis())]
}
