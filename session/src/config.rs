use std::time::Duration;

use serde::Deserialize;

use crate::ticks::{Ticks, TICKS_PER_MILLI};

/// Tunables of a playback session. Durations are written as seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Overlay timeout after a tap or when playback starts.
    #[serde(with = "seconds")]
    pub overlay_short: Duration,
    /// Overlay timeout after pausing.
    #[serde(with = "seconds")]
    pub overlay_long: Duration,
    #[serde(with = "seconds")]
    pub jump_forward: Duration,
    #[serde(with = "seconds")]
    pub jump_backward: Duration,
    #[serde(with = "opt_seconds")]
    pub heartbeat: Option<Duration>,
    pub position_hysteresis: Ticks,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            overlay_short: Duration::from_secs(2),
            overlay_long: Duration::from_secs(5),
            jump_forward: Duration::from_secs(10),
            jump_backward: Duration::from_secs(10),
            heartbeat: None,
            position_hysteresis: Ticks::new(TICKS_PER_MILLI),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(de)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod opt_seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(de)? {
            None => Ok(None),
            Some(secs) if secs <= 0.0 => Err(D::Error::custom("must be positive")),
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let conf: SessionConfig = toml::from_str("").unwrap();
        assert_eq!(SessionConfig::default(), conf);
        assert!(conf.overlay_short < conf.overlay_long);
        assert_eq!(None, conf.heartbeat);
    }

    #[test]
    fn seconds_as_floats() {
        let conf: SessionConfig = toml::from_str(
            r#"
            overlay_short = 1.5
            jump_forward = 30
            heartbeat = 10.0
            "#,
        )
        .unwrap();
        assert_eq!(Duration::from_millis(1500), conf.overlay_short);
        assert_eq!(Duration::from_secs(30), conf.jump_forward);
        assert_eq!(Some(Duration::from_secs(10)), conf.heartbeat);
        assert_eq!(Duration::from_secs(5), conf.overlay_long);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(toml::from_str::<SessionConfig>("heartbeat = 0").is_err());
        assert!(toml::from_str::<SessionConfig>("overlay_long = -1").is_err());
        assert!(toml::from_str::<SessionConfig>("unknown = 1").is_err());
    }
}
