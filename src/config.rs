//! Master-side settings.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const ENV_BIND: &str = "GRIDMAP_BIND";
pub const ENV_ADVERTISE: &str = "GRIDMAP_ADVERTISE";
pub const ENV_LISTEN_BACKOFF_MS: &str = "GRIDMAP_LISTEN_BACKOFF_MS";

pub const DEFAULT_BIND: &str = "0.0.0.0:0";
pub const DEFAULT_LISTEN_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Address the coordinator listens on.
    pub bind: String,
    /// Address handed to workers. Defaults to the bound address, with an
    /// unspecified IP replaced by this host's name.
    pub advertise: Option<String>,
    /// Pause between attempts to bind the listening socket.
    #[serde(with = "millis")]
    pub listen_backoff: Duration,
    /// Give up binding after this many attempts. `None` retries forever.
    pub bind_attempts: Option<u32>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            advertise: None,
            listen_backoff: DEFAULT_LISTEN_BACKOFF,
            bind_attempts: None,
        }
    }
}

impl MasterConfig {
    /// Defaults overridden by `GRIDMAP_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = env::var(ENV_BIND) {
            config.bind = bind;
        }
        if let Ok(addr) = env::var(ENV_ADVERTISE) {
            config.advertise = Some(addr);
        }
        if let Some(ms) = env::var(ENV_LISTEN_BACKOFF_MS)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.listen_backoff = Duration::from_millis(ms);
        }
        config
    }

    /// Loopback-only listener on an ephemeral port.
    pub fn local() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
