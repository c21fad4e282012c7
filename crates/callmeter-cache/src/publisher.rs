//! Redis kill-signal publisher
//!
//! Terminate commands are published as JSON on `kill_switch:{org_id}`. The
//! telephony layer subscribes per organization; nobody listening is not an
//! error.

use crate::{keys, RedisCache};
use async_trait::async_trait;
use callmeter_core::{models::KillSignal, traits::KillSignalSink, AppResult};
use tracing::{info, instrument, warn};

pub struct RedisKillSignalPublisher {
    cache: RedisCache,
}

impl RedisKillSignalPublisher {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl KillSignalSink for RedisKillSignalPublisher {
    #[instrument(skip(self, signal), fields(org_id = %signal.org_id, session_id = %signal.session_id))]
    async fn send(&self, signal: KillSignal) -> AppResult<()> {
        let channel = keys::kill_switch_channel(&signal.org_id);
        let receivers = self.cache.publish_json(&channel, &signal).await?;

        if receivers == 0 {
            warn!(channel = %channel, "Kill signal published with no subscribers");
        } else {
            info!(channel = %channel, receivers, "Kill signal published");
        }
        Ok(())
    }
}
