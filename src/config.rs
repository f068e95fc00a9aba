use std::{collections::BTreeMap, fs::read_to_string, path::Path, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::flight_phase::Guard;
use crate::scheduler::DEFAULT_TICK_INTERVAL;
use crate::sim_vehicle::SimConfig;

pub const DEFAULT_OFFBOARD_TIMEOUT_S: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct MissionConfig {
    pub tick_interval_s: f64,
    /// Longest setpoint gap the vehicle tolerates in offboard
    pub offboard_timeout_s: f64,
    /// Guards without an entry wait forever
    pub guard_timeouts_s: BTreeMap<Guard, f64>,
    pub simulator: SimConfig,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: DEFAULT_TICK_INTERVAL.as_secs_f64(),
            offboard_timeout_s: DEFAULT_OFFBOARD_TIMEOUT_S,
            guard_timeouts_s: BTreeMap::new(),
            simulator: SimConfig::default(),
        }
    }
}

impl MissionConfig {
    /// Zero when the configured value is not a valid duration, which the
    /// scheduler refuses.
    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.tick_interval_s).unwrap_or(Duration::ZERO)
    }

    pub fn guard_timeout(&self, guard: Guard) -> Option<Duration> {
        self.guard_timeouts_s
            .get(&guard)
            .and_then(|seconds| Duration::try_from_secs_f64(*seconds).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if !is_positive_duration(self.tick_interval_s) {
            return Err(anyhow!(
                "tick interval must be a positive number of seconds, got {}",
                self.tick_interval_s
            ));
        }
        if !is_positive_duration(self.offboard_timeout_s) {
            return Err(anyhow!(
                "offboard timeout must be a positive number of seconds, got {}",
                self.offboard_timeout_s
            ));
        }
        if self.tick_interval_s >= self.offboard_timeout_s {
            return Err(anyhow!(
                "tick interval {}s must stay below the vehicle offboard timeout {}s",
                self.tick_interval_s,
                self.offboard_timeout_s
            ));
        }
        if self.tick_interval_s > self.offboard_timeout_s / 2.0 {
            warn!(
                "Tick interval {}s leaves little margin before the {}s offboard timeout",
                self.tick_interval_s, self.offboard_timeout_s
            );
        }
        for (guard, seconds) in &self.guard_timeouts_s {
            if !is_positive_duration(*seconds) {
                return Err(anyhow!(
                    "timeout for guard {:?} must be a positive number of seconds, got {}",
                    guard,
                    seconds
                ));
            }
        }
        self.simulator.validate().map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

/// Representable as a [`Duration`] and not rounded down to zero.
fn is_positive_duration(seconds: f64) -> bool {
    Duration::try_from_secs_f64(seconds).is_ok_and(|duration| !duration.is_zero())
}

/// On-disk shape of [`MissionConfig`], every field optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct MissionConfigSerde {
    pub tick_interval_s: Option<f64>,
    pub offboard_timeout_s: Option<f64>,
    #[serde(default)]
    pub guard_timeouts_s: BTreeMap<Guard, f64>,
    pub simulator: Option<SimConfig>,
}

impl From<MissionConfigSerde> for MissionConfig {
    fn from(config: MissionConfigSerde) -> Self {
        let defaults = MissionConfig::default();
        MissionConfig {
            tick_interval_s: config.tick_interval_s.unwrap_or(defaults.tick_interval_s),
            offboard_timeout_s: config
                .offboard_timeout_s
                .unwrap_or(defaults.offboard_timeout_s),
            guard_timeouts_s: config.guard_timeouts_s,
            simulator: config.simulator.unwrap_or(defaults.simulator),
        }
    }
}

pub fn read_mission_config<P: AsRef<Path>>(path: P) -> Result<MissionConfig> {
    let config = read_to_string(path)?;
    let config: MissionConfigSerde = serde_json::from_str(&config)?;
    Ok(config.into())
}

/// `mission.json` in the platform config directory, if one exists.
pub fn default_config_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "offboard-runner")?;
    let path = dirs.config_dir().join("mission.json");
    path.exists().then_some(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_mission_config() {
        let config = read_mission_config("./test-configs/mission.json").unwrap();
        assert_eq!(config.tick_interval_s, 0.05);
        assert_eq!(config.offboard_timeout_s, 0.5);
        assert_eq!(
            config.guard_timeout(Guard::Connected),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.guard_timeout(Guard::OnGround),
            Some(Duration::from_secs(120))
        );
        assert_eq!(config.guard_timeout(Guard::ArmAccepted), None);
        assert_eq!(config.simulator.takeoff_delay_s, 3.0);
        // unspecified simulator fields keep their defaults
        assert_eq!(config.simulator.landing_delay_s, 10.0);
        config.validate().unwrap();
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: MissionConfigSerde = serde_json::from_str("{}").unwrap();
        let config: MissionConfig = config.into();
        assert_eq!(config, MissionConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.guard_timeout(Guard::Connected), None);
    }

    #[test]
    fn unknown_guard_is_rejected() {
        let result =
            serde_json::from_str::<MissionConfigSerde>(r#"{"guard_timeouts_s": {"landed": 5}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn tick_interval_must_stay_below_offboard_timeout() {
        let mut config = MissionConfig::default();
        config.tick_interval_s = 0.5;
        assert!(config.validate().is_err());
        config.tick_interval_s = 0.0;
        assert!(config.validate().is_err());
        config.tick_interval_s = f64::NAN;
        assert!(config.validate().is_err());
        config.tick_interval_s = 0.3;
        config.validate().unwrap();
    }

    #[test]
    fn guard_timeouts_must_be_positive() {
        let mut config = MissionConfig::default();
        config.guard_timeouts_s.insert(Guard::InAir, -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unrepresentable_durations_are_rejected() {
        let mut config = MissionConfig::default();
        config.tick_interval_s = 1e-12;
        assert!(config.validate().is_err());

        let mut config = MissionConfig::default();
        config.guard_timeouts_s.insert(Guard::OnGround, 1e300);
        assert!(config.validate().is_err());

        let mut config = MissionConfig::default();
        config.simulator.landing_delay_s = 1e300;
        assert!(config.validate().is_err());

        let mut config = MissionConfig::default();
        config.simulator.disarm_delay_s = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn trajectory_exhausted_timeout_is_read() {
        let config: MissionConfigSerde =
            serde_json::from_str(r#"{"guard_timeouts_s": {"trajectory_exhausted": 30}}"#).unwrap();
        let config: MissionConfig = config.into();
        config.validate().unwrap();
        assert_eq!(
            config.guard_timeout(Guard::TrajectoryExhausted),
            Some(Duration::from_secs(30))
        );
    }
}
