//! Audio manager configuration
//!
//! Configuration lives in a property file of `key = value` lines with `#`
//! comments:
//!
//! ```text
//! device = Software
//! max_sources = 64
//! maintenance_interval_ms = 10
//! class_gain.1 = 0.5   # music
//! log_level = debug
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::logging::LogLevel;

/// Number of sound classes
pub const CLASS_COUNT: usize = 32;

/// Default cadence of the maintenance sweep
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_millis(10);

/// Default frames decoded into each streaming slot
pub const DEFAULT_STREAM_CHUNK_FRAMES: usize = 4096;

/// Settings read by `AudioManager::initialize`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    /// Backend device name; `None` selects the default device
    pub device: Option<String>,
    /// Optional cap below the backend's voice limit
    pub max_sources: Option<usize>,
    /// Cadence of the maintenance sweep
    pub maintenance_interval: Duration,
    /// Spawn the background maintenance thread
    pub maintenance_thread: bool,
    /// Frames decoded per streaming slot
    pub stream_chunk_frames: usize,
    /// Initial per-class gain multipliers
    pub class_gains: [f32; CLASS_COUNT],
    /// Verbosity applied to the `log` facade; `None` leaves it alone
    pub log_level: Option<LogLevel>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            max_sources: None,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            maintenance_thread: true,
            stream_chunk_frames: DEFAULT_STREAM_CHUNK_FRAMES,
            class_gains: [1.0; CLASS_COUNT],
            log_level: None,
        }
    }
}

impl AudioConfig {
    /// Configuration for driving the manager by hand (no background thread)
    pub fn manual() -> Self {
        Self {
            maintenance_thread: false,
            ..Self::default()
        }
    }
}

/// Split property text into `(key, value)` pairs.
///
/// Blank lines and `#` comments are skipped; a line without `=` is
/// reported and skipped.
pub fn parse_properties(data: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for (number, line) in data.lines().enumerate() {
        let line = match line.find('#') {
            Some(hash) => &line[..hash],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once('=') {
            Some((key, value)) => pairs.push((key.trim().to_string(), value.trim().to_string())),
            None => log::warn!("config line {}: key without value", number + 1),
        }
    }

    pairs
}

/// Parse a boolean property value
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => anyhow::bail!("'{}' is not a boolean", s),
    }
}

/// Parse a non-negative gain multiplier
pub fn parse_gain(s: &str) -> Result<f32> {
    let gain: f32 = s.parse().context("Invalid gain value")?;
    if !gain.is_finite() || gain < 0.0 {
        anyhow::bail!("Gain must be a non-negative number");
    }
    Ok(gain)
}

fn apply(config: &mut AudioConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "device" => {
            config.device = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        }
        "max_sources" => {
            let n: usize = value.parse().context("Invalid source count")?;
            if n == 0 {
                anyhow::bail!("max_sources must be positive");
            }
            config.max_sources = Some(n);
        }
        "maintenance_interval_ms" => {
            let ms: u64 = value.parse().context("Invalid interval")?;
            if ms == 0 {
                anyhow::bail!("maintenance interval must be positive");
            }
            config.maintenance_interval = Duration::from_millis(ms);
        }
        "maintenance_thread" => config.maintenance_thread = parse_bool(value)?,
        "stream_chunk_frames" => {
            let frames: usize = value.parse().context("Invalid chunk size")?;
            if frames == 0 {
                anyhow::bail!("stream_chunk_frames must be positive");
            }
            config.stream_chunk_frames = frames;
        }
        "log_level" => {
            config.log_level = Some(value.parse().map_err(anyhow::Error::msg)?);
        }
        _ => match key.strip_prefix("class_gain.") {
            Some(index) => {
                let index: usize = index.parse().context("Invalid class index")?;
                if index >= CLASS_COUNT {
                    anyhow::bail!("class index {} out of range", index);
                }
                config.class_gains[index] = parse_gain(value)?;
            }
            None => log::warn!("ignoring unknown config key '{}'", key),
        },
    }
    Ok(())
}

/// Build a configuration from property text, starting from the defaults
pub fn parse_config(data: &str) -> Result<AudioConfig> {
    let mut config = AudioConfig::default();
    for (key, value) in parse_properties(data) {
        apply(&mut config, &key, &value).with_context(|| format!("config key '{}'", key))?;
    }
    Ok(config)
}

/// Load configuration from a property file
pub fn load_config(path: &Path) -> Result<AudioConfig> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&data).with_context(|| format!("Invalid config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.device, None);
        assert_eq!(config.maintenance_interval, Duration::from_millis(10));
        assert!(config.maintenance_thread);
        assert_eq!(config.stream_chunk_frames, 4096);
        assert!(config.class_gains.iter().all(|&g| g == 1.0));
        assert!(!AudioConfig::manual().maintenance_thread);
    }

    #[test]
    fn test_parse_properties() {
        let pairs = parse_properties("# header\n\n  a = 1 \nb=two # trailing\nbare\nc =\n");
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
                ("c".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_config_all_keys() {
        let config = parse_config(
            "device = Software\n\
             max_sources = 32\n\
             maintenance_interval_ms = 20\n\
             maintenance_thread = no\n\
             stream_chunk_frames = 1024\n\
             class_gain.3 = 0.25\n\
             log_level = debug\n\
             mystery = 1\n",
        )
        .unwrap();

        assert_eq!(config.device.as_deref(), Some("Software"));
        assert_eq!(config.max_sources, Some(32));
        assert_eq!(config.maintenance_interval, Duration::from_millis(20));
        assert!(!config.maintenance_thread);
        assert_eq!(config.stream_chunk_frames, 1024);
        assert_eq!(config.class_gains[3], 0.25);
        assert_eq!(config.class_gains[0], 1.0);
        assert_eq!(config.log_level, Some(LogLevel::Debug));
    }

    #[rstest]
    #[case("max_sources = 0")]
    #[case("max_sources = many")]
    #[case("maintenance_interval_ms = 0")]
    #[case("maintenance_thread = maybe")]
    #[case("stream_chunk_frames = -4")]
    #[case("class_gain.32 = 1.0")]
    #[case("class_gain.x = 1.0")]
    #[case("class_gain.0 = -1")]
    #[case("log_level = shouting")]
    fn test_parse_config_rejects(#[case] text: &str) {
        let err = parse_config(text).unwrap_err();
        let key = text.split('=').next().unwrap().trim();
        assert!(format!("{:#}", err).contains(key));
    }

    #[rstest]
    #[case("true", true)]
    #[case("On", true)]
    #[case("1", true)]
    #[case("no", false)]
    #[case("FALSE", false)]
    fn test_parse_bool(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(parse_bool(text).unwrap(), expected);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_sources = 8").unwrap();
        writeln!(file, "class_gain.31 = 2.0").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.max_sources, Some(8));
        assert_eq!(config.class_gains[31], 2.0);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/audio.cfg")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
