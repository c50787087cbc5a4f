//! External JSON configuration, deserialized with `serde`/`serde_json`
//! into the strongly-typed pieces the rest of the crate consumes.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::address::Slice;
use crate::error::{ProxyError, Result};
use crate::pool::PoolConfig;
use crate::registry::{RegistryOptions, Source};

#[derive(Debug, Deserialize, Default)]
struct AutoRefreshPeriod {
    #[serde(default)]
    days: u64,
    #[serde(default)]
    hours: u64,
    #[serde(default)]
    minutes: u64,
}

impl AutoRefreshPeriod {
    fn as_duration(&self) -> Duration {
        Duration::from_secs(self.days * 86_400 + self.hours * 3_600 + self.minutes * 60)
    }
}

/// The raw JSON configuration shape.
#[derive(Debug, Deserialize, Default)]
pub struct RawConfig {
    pub list: Option<Vec<String>>,
    pub url: Option<String>,
    pub file: Option<String>,
    #[serde(rename = "type")]
    pub force_scheme: Option<String>,
    pub slice: Option<[Option<i64>; 2]>,
    #[serde(default)]
    pub shuffle: bool,
    pub auto_refresh_period: Option<AutoRefreshPeriod>,
    pub blacklist: Option<String>,
    pub cooldown: Option<String>,
    pub stats: Option<String>,
    pub smart_holdout_start: Option<f64>,
    pub smart_holdout_min: Option<f64>,
    pub smart_holdout_max: Option<f64>,
    pub default_holdout: Option<f64>,
    pub default_bad_holdout: Option<f64>,
    #[serde(default)]
    pub force_defaults: bool,
}

/// File paths for the three persistent maps, if the config named any;
/// `None` means "use an in-memory map".
#[derive(Debug, Default, Clone)]
pub struct PersistentMapPaths {
    pub blacklist: Option<PathBuf>,
    pub cooldown: Option<PathBuf>,
    pub stats: Option<PathBuf>,
}

pub struct ParsedConfig {
    pub source: Source,
    pub registry_options: RegistryOptions,
    pub pool_config: PoolConfig,
    pub map_paths: PersistentMapPaths,
}

/// Parse a JSON configuration object into the pieces `Registry::new`
/// and `Pool::new` need.
pub fn parse(json: &str) -> Result<ParsedConfig> {
    let raw: RawConfig = serde_json::from_str(json).map_err(|e| ProxyError::Json {
        path: "<config>".to_string(),
        source: e,
    })?;
    build(raw)
}

fn build(raw: RawConfig) -> Result<ParsedConfig> {
    let source = if let Some(list) = raw.list {
        Source::Inline(list)
    } else if let Some(url) = raw.url {
        Source::Url(url)
    } else if let Some(file) = raw.file {
        Source::File(PathBuf::from(file))
    } else {
        return Err(ProxyError::NoSourceConfigured);
    };

    let mut registry_options = RegistryOptions::new();
    registry_options.slice = raw.slice.map(|[start, stop]| Slice { start, stop });
    registry_options.force_scheme = raw.force_scheme;
    registry_options.shuffle = raw.shuffle;
    registry_options.auto_refresh_period = raw.auto_refresh_period.map(|p| p.as_duration());

    let smart_holdout = raw.smart_holdout_start.is_some();
    if smart_holdout && raw.smart_holdout_start.unwrap_or(0.0) <= 0.0 {
        return Err(ProxyError::SmartHoldoutMisconfigured);
    }

    let pool_config = PoolConfig {
        smart_holdout,
        smart_holdout_start: raw.smart_holdout_start,
        smart_holdout_min: raw.smart_holdout_min.unwrap_or(0.0),
        smart_holdout_max: raw.smart_holdout_max.unwrap_or(f64::INFINITY),
        default_holdout: raw.default_holdout,
        default_bad_holdout: raw.default_bad_holdout,
        force_defaults: raw.force_defaults,
    };

    let map_paths = PersistentMapPaths {
        blacklist: raw.blacklist.map(PathBuf::from),
        cooldown: raw.cooldown.map(PathBuf::from),
        stats: raw.stats.map(PathBuf::from),
    };

    Ok(ParsedConfig {
        source,
        registry_options,
        pool_config,
        map_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_list_config() {
        let cfg = parse(r#"{"list": ["a:1", "b:2"], "shuffle": true}"#).unwrap();
        match cfg.source {
            Source::Inline(list) => assert_eq!(list, vec!["a:1", "b:2"]),
            _ => panic!("expected inline source"),
        }
        assert!(cfg.registry_options.shuffle);
    }

    #[test]
    fn parses_smart_holdout_options() {
        let cfg = parse(
            r#"{"url": "http://example.com/proxies.txt", "smart_holdout_start": 10, "smart_holdout_min": 1, "smart_holdout_max": 1000}"#,
        )
        .unwrap();
        assert!(cfg.pool_config.smart_holdout);
        assert_eq!(cfg.pool_config.smart_holdout_min, 1.0);
        assert_eq!(cfg.pool_config.smart_holdout_max, 1000.0);
    }

    #[test]
    fn rejects_smart_holdout_without_positive_start() {
        let err = parse(r#"{"list": ["a"], "smart_holdout_start": 0}"#);
        assert!(matches!(err, Err(ProxyError::SmartHoldoutMisconfigured)));
    }

    #[test]
    fn rejects_missing_source() {
        let err = parse(r#"{"shuffle": true}"#);
        assert!(matches!(err, Err(ProxyError::NoSourceConfigured)));
    }

    #[test]
    fn slice_nulls_mean_open_ended() {
        let cfg = parse(r#"{"list": ["a"], "slice": [2, null]}"#).unwrap();
        let slice = cfg.registry_options.slice.unwrap();
        assert_eq!(slice.start, Some(2));
        assert_eq!(slice.stop, None);
    }
}
