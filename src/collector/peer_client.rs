//! Connection pool for outbound peer-agent RPCs, keyed by endpoint string.
//!
//! The source opens a fresh connection per request; this pool reuses
//! channels per endpoint and evicts idle ones, per the §9 recommendation.

use crate::core::{Result, TailSampleError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

struct PooledChannel {
    channel: Channel,
    last_used: Instant,
}

/// Caches outbound gRPC channels to peer agent endpoints.
pub struct PeerConnectionPool {
    channels: Mutex<HashMap<String, PooledChannel>>,
    dial_timeout: Duration,
    idle_timeout: Duration,
}

impl PeerConnectionPool {
    /// Creates a new pool. `idle_timeout` bounds how long an unused channel
    /// is kept before the next `get` for a different endpoint evicts it.
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            dial_timeout,
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// Returns a channel to `endpoint`, dialing and caching one if absent.
    pub async fn get(&self, endpoint: &str) -> Result<Channel> {
        let mut channels = self.channels.lock().await;

        self.evict_idle(&mut channels);

        if let Some(pooled) = channels.get_mut(endpoint) {
            pooled.last_used = Instant::now();
            return Ok(pooled.channel.clone());
        }

        let uri = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };

        let endpoint_cfg = Endpoint::from_shared(uri)
            .map_err(|e| TailSampleError::network(format!("invalid peer endpoint {endpoint}: {e}")))?
            .connect_timeout(self.dial_timeout);

        let channel = endpoint_cfg
            .connect()
            .await
            .map_err(|e| TailSampleError::network(format!("dial {endpoint} failed: {e}")))?;

        channels.insert(
            endpoint.to_string(),
            PooledChannel { channel: channel.clone(), last_used: Instant::now() },
        );

        Ok(channel)
    }

    fn evict_idle(&self, channels: &mut HashMap<String, PooledChannel>) {
        let idle_timeout = self.idle_timeout;
        channels.retain(|_, pooled| pooled.last_used.elapsed() < idle_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_endpoint_is_rejected() {
        let pool = PeerConnectionPool::new(Duration::from_millis(50));
        let result = pool.get("not a valid uri \n").await;
        assert!(result.is_err());
    }
}
