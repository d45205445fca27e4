//! Residual data sizes across drain passes.

use crate::blob::{DrainData, Token};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-token history of residual item counts, one entry per aggregated pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DrainStatistics {
    /// Number of passes recorded
    pub passes: usize,
    /// Residual sizes per token, in pass order
    #[serde(with = "crate::blob::token::token_map")]
    pub history: BTreeMap<Token, Vec<usize>>,
}

impl DrainStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the sizes of one aggregated snapshot.
    ///
    /// Tokens missing from `data` record a zero so every history stays
    /// aligned with `passes`.
    pub fn record(&mut self, data: &DrainData) {
        let pass = self.passes;
        for (token, items) in data.data() {
            self.history
                .entry(*token)
                .or_insert_with(|| vec![0; pass])
                .push(items.len());
        }
        for sizes in self.history.values_mut() {
            if sizes.len() == pass {
                sizes.push(0);
            }
        }
        self.passes += 1;
    }

    pub fn history(&self, token: Token) -> Option<&[usize]> {
        self.history.get(&token).map(Vec::as_slice)
    }

    /// Tokens that held residual items in the most recent pass.
    pub fn last_nonempty(&self) -> Vec<(Token, usize)> {
        self.history
            .iter()
            .filter_map(|(token, sizes)| match sizes.last() {
                Some(&size) if size > 0 => Some((*token, size)),
                _ => None,
            })
            .collect()
    }

    /// Write the statistics to `<dir>/<app_name>_drain_statistics.json`.
    pub fn dump(&self, dir: &Path, app_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_drain_statistics.json", app_name));
        let dump = StatisticsDump {
            app_name: app_name.to_string(),
            written_at: chrono::Utc::now(),
            statistics: self.clone(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&dump)?)?;
        Ok(path)
    }
}

/// On-disk statistics document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsDump {
    pub app_name: String,
    pub written_at: chrono::DateTime<chrono::Utc>,
    pub statistics: DrainStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Item;

    fn snapshot(entries: &[(Token, usize)]) -> DrainData {
        DrainData::from_data(
            entries
                .iter()
                .map(|(token, n)| (*token, vec![Item::Null; *n]))
                .collect(),
        )
    }

    #[test]
    fn test_histories_stay_aligned() {
        let a = Token::new(0, 1);
        let b = Token::new(1, 2);
        let mut stats = DrainStatistics::new();
        stats.record(&snapshot(&[(a, 3)]));
        stats.record(&snapshot(&[(b, 1)]));
        stats.record(&snapshot(&[(a, 0), (b, 2)]));

        assert_eq!(stats.passes, 3);
        assert_eq!(stats.history(a), Some(&[3, 0, 0][..]));
        assert_eq!(stats.history(b), Some(&[0, 1, 2][..]));
        assert_eq!(stats.last_nonempty(), vec![(b, 2)]);
    }

    #[test]
    fn test_dump_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = DrainStatistics::new();
        stats.record(&snapshot(&[(Token::new(-1, 0), 4)]));

        let path = stats.dump(dir.path(), "fmradio").unwrap();
        assert!(path.ends_with("fmradio_drain_statistics.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        let dump: StatisticsDump = serde_json::from_str(&text).unwrap();
        assert_eq!(dump.app_name, "fmradio");
        assert_eq!(dump.statistics, stats);
    }
}
