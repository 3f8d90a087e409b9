//! Configuration for the mining loop.

/// Runtime configuration of the mining loop. Validated once at startup;
/// the loop itself never re-checks ranges.
#[derive(Clone, Debug)]
pub struct MiningConfig {
    /// Maximum gap between blocks, in seconds.
    pub block_interval_secs: u64,
    /// Floor between blocks, in seconds.
    pub min_block_interval_secs: u64,
    /// Admission cap per block.
    pub transactions_per_block: u32,
    /// Size cap per block, in packed bytes.
    pub max_block_size: usize,
    /// When true, rejected transactions are terminalised but not packed
    /// into blocks.
    pub exclude_rejected: bool,
    /// Slack applied to the pacing and emission gates, in milliseconds.
    pub pacing_slack_ms: i64,
    /// Margin before the interval deadline at which admission stops, in
    /// milliseconds.
    pub close_margin_ms: i64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            block_interval_secs: 60,
            min_block_interval_secs: 5,
            transactions_per_block: 500,
            max_block_size: 1_000_000,
            exclude_rejected: false,
            pacing_slack_ms: 500,
            close_margin_ms: 100,
        }
    }
}

impl MiningConfig {
    /// Floor between blocks, in milliseconds.
    pub fn min_interval_ms(&self) -> i64 {
        (self.min_block_interval_secs * 1000) as i64
    }

    /// The full emission interval `(min + block)`, in milliseconds.
    pub fn full_interval_ms(&self) -> i64 {
        ((self.min_block_interval_secs + self.block_interval_secs) * 1000) as i64
    }

    /// Statement timeout applied to the store session, in milliseconds.
    pub fn statement_timeout_ms(&self) -> i64 {
        (self.block_interval_secs * 1000) as i64
    }

    /// Range checks, mirroring the ones the supervisor performs on raw
    /// configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_block_interval_secs < 1 {
            return Err("min block interval must be at least 1 second".into());
        }
        if self.min_block_interval_secs > self.block_interval_secs {
            return Err("min block interval cannot exceed block interval".into());
        }
        if self.transactions_per_block < 1 {
            return Err("transactions per block must be at least 1".into());
        }
        if self.max_block_size < 110_000 {
            return Err("max block size must be at least 110000 bytes".into());
        }
        Ok(())
    }

    /// Payload of the `blocks` notification for a status-only commit.
    pub fn heartbeat_payload(ts: i64, other: usize) -> String {
        serde_json::json!({ "ts": ts, "other": other }).to_string()
    }

    /// Payload of the `blocks` notification for a mined block.
    pub fn block_payload(block_id: i64, ts: i64, txs: u16, other: usize) -> String {
        serde_json::json!({ "block": block_id, "ts": ts, "txs": txs, "other": other }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(payload: &str) -> serde_json::Value {
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let config = MiningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_interval_ms(), 5_000);
        assert_eq!(config.full_interval_ms(), 65_000);
        assert_eq!(config.statement_timeout_ms(), 60_000);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let mut config = MiningConfig::default();
        config.min_block_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = MiningConfig::default();
        config.min_block_interval_secs = 120;
        assert!(config.validate().is_err());

        let mut config = MiningConfig::default();
        config.transactions_per_block = 0;
        assert!(config.validate().is_err());

        let mut config = MiningConfig::default();
        config.max_block_size = 50_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_notification_payloads() {
        let heartbeat = parse(&MiningConfig::heartbeat_payload(1000, 2));
        assert_eq!(heartbeat["ts"], 1000);
        assert_eq!(heartbeat["other"], 2);
        assert!(heartbeat.get("block").is_none());

        let block = parse(&MiningConfig::block_payload(7, 1000, 3, 1));
        assert_eq!(block["block"], 7);
        assert_eq!(block["txs"], 3);
    }
}
