//! Process configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Runtime knobs for the reconciliation core.
///
/// Loaded once at process start and passed down by value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StockflowConfig {
    /// Cadence of the full reconciliation sweep.
    #[serde(with = "secs")]
    pub sweep_interval: Duration,
    /// Run one sweep immediately when the scheduler starts.
    pub sweep_on_start: bool,
    /// Consecutive failed sweep attempts before the scheduler waits for the
    /// next tick.
    pub sweep_max_retries: u32,
    #[serde(with = "millis")]
    pub sweep_base_backoff: Duration,
    /// Bounded re-reads on an optimistic write conflict.
    pub max_write_attempts: u32,
    /// Let purchase-order receipt reconciliation repair snapshots instead of
    /// only reporting them.
    pub repair_purchase_receipts: bool,
    /// Where operational alerts are addressed.
    pub alert_recipient: String,
}

impl Default for StockflowConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            sweep_on_start: true,
            sweep_max_retries: 5,
            sweep_base_backoff: Duration::from_millis(250),
            max_write_attempts: 3,
            repair_purchase_receipts: false,
            alert_recipient: "ops@localhost".to_string(),
        }
    }
}

impl StockflowConfig {
    /// Read `STOCKFLOW_*` variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();

        let sweep_interval = parsed(&lookup, "STOCKFLOW_SWEEP_INTERVAL_SECS", d.sweep_interval.as_secs())
            .max(1);
        let backoff_ms = parsed(
            &lookup,
            "STOCKFLOW_SWEEP_BACKOFF_MS",
            d.sweep_base_backoff.as_millis() as u64,
        );

        Self {
            sweep_interval: Duration::from_secs(sweep_interval),
            sweep_on_start: parsed(&lookup, "STOCKFLOW_SWEEP_ON_START", d.sweep_on_start),
            sweep_max_retries: parsed(&lookup, "STOCKFLOW_SWEEP_MAX_RETRIES", d.sweep_max_retries),
            sweep_base_backoff: Duration::from_millis(backoff_ms),
            max_write_attempts: parsed(&lookup, "STOCKFLOW_MAX_WRITE_ATTEMPTS", d.max_write_attempts)
                .max(1),
            repair_purchase_receipts: parsed(
                &lookup,
                "STOCKFLOW_REPAIR_PURCHASE_RECEIPTS",
                d.repair_purchase_receipts,
            ),
            alert_recipient: lookup("STOCKFLOW_ALERT_RECIPIENT")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(d.alert_recipient),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, fallback = ?default, "unparsable config value; using default");
            default
        }),
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(StockflowConfig::from_lookup(|_| None), StockflowConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = StockflowConfig::from_lookup(lookup(&[
            ("STOCKFLOW_SWEEP_INTERVAL_SECS", "60"),
            ("STOCKFLOW_SWEEP_ON_START", "false"),
            ("STOCKFLOW_MAX_WRITE_ATTEMPTS", "5"),
            ("STOCKFLOW_REPAIR_PURCHASE_RECEIPTS", "true"),
            ("STOCKFLOW_ALERT_RECIPIENT", "inventory@example.com"),
        ]));

        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert!(!cfg.sweep_on_start);
        assert_eq!(cfg.max_write_attempts, 5);
        assert!(cfg.repair_purchase_receipts);
        assert_eq!(cfg.alert_recipient, "inventory@example.com");
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let cfg = StockflowConfig::from_lookup(lookup(&[
            ("STOCKFLOW_SWEEP_MAX_RETRIES", "lots"),
            ("STOCKFLOW_MAX_WRITE_ATTEMPTS", "0"),
        ]));
        assert_eq!(cfg.sweep_max_retries, 5);
        assert_eq!(cfg.max_write_attempts, 1);
    }

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let cfg: StockflowConfig =
            serde_json::from_str(r#"{"sweep_interval": 30, "repair_purchase_receipts": true}"#)
                .unwrap();
        assert_eq!(cfg.sweep_interval, Duration::from_secs(30));
        assert!(cfg.repair_purchase_receipts);
        assert_eq!(cfg.max_write_attempts, 3);
    }
}
