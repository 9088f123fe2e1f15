use serde::Serialize;
use std::collections::BTreeMap;

/// Per-destination counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub leased: usize,
    pub idle: usize,
}

impl RouteStats {
    pub fn total(&self) -> usize {
        self.leased + self.idle
    }
}

/// Statistics about the connection pool
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Connections currently handed out to callers
    pub leased: usize,
    /// Connections parked in the pool waiting for reuse
    pub idle: usize,
    /// Callers blocked waiting for capacity
    pub pending: usize,
    /// Slots that can still be opened before hitting `max_total`
    pub available: usize,
    pub max_total: usize,
    pub max_per_destination: usize,
    pub closed: bool,
    /// Keyed by destination display form
    pub routes: BTreeMap<String, RouteStats>,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.leased + self.idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_serialize_for_diagnostics() {
        let mut stats = PoolStats {
            leased: 1,
            idle: 2,
            available: 197,
            max_total: 200,
            max_per_destination: 20,
            ..Default::default()
        };
        stats
            .routes
            .insert("http://a.example:80".to_string(), RouteStats { leased: 1, idle: 2 });

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["leased"], 1);
        assert_eq!(json["closed"], false);
        assert_eq!(json["routes"]["http://a.example:80"]["idle"], 2);
        assert_eq!(stats.total(), 3);
    }
}
