//! Engine configuration.

/// Tunables for the chain engine.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Upper bound on read-compute-insert attempts when another writer
    /// keeps winning the `(chain_id, sequence)` slot. The first attempt
    /// counts, so `3` means at most two retries.
    pub max_append_retries: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_append_retries: 3,
        }
    }
}

impl ChainConfig {
    /// Default configuration with `TRUSTMEM_APPEND_RETRIES` applied when
    /// set and parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(retries) = std::env::var("TRUSTMEM_APPEND_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_append_retries = retries.max(1);
        }
        config
    }
}
