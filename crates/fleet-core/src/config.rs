//! fleet.toml configuration parser.
//!
//! Every field is optional in the file; missing values fall back to the
//! defaults of the typed configs in [`crate::types`]. [`FleetConfig::validate`]
//! turns the file form into a [`ResolvedConfig`] or a [`ConfigError`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::types::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub regions: Option<Vec<String>>,
    pub scaling: Option<ScalingSection>,
    pub load_balancer: Option<LoadBalancerSection>,
    pub lifecycle: Option<LifecycleSection>,
    pub intervals: Option<IntervalsSection>,
    pub collaborators: Option<CollaboratorsSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingSection {
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
    pub target_cpu: Option<f64>,
    pub target_memory: Option<f64>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub cooldown: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerSection {
    pub algorithm: Option<String>,
    pub health_check_interval: Option<String>,
    pub health_check_timeout: Option<String>,
    pub session_affinity: Option<bool>,
    pub unhealthy_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleSection {
    pub provision_timeout: Option<String>,
    pub drain_timeout: Option<String>,
    pub retention: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntervalsSection {
    pub scaling: Option<String>,
    pub metrics: Option<String>,
    pub cleanup: Option<String>,
}

/// Addresses of the external collaborators used by the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaboratorsSection {
    /// Base URL of the compute provisioner (e.g. "127.0.0.1:9000").
    pub provisioner: Option<String>,
    /// Path probed on each instance address.
    pub health_path: Option<String>,
    /// Path polled on each instance address for telemetry samples.
    pub telemetry_path: Option<String>,
}

/// Fully validated configuration, ready to hand to the control loops.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub regions: Vec<String>,
    pub scaling: ScalingConfig,
    pub load_balancer: LoadBalancerConfig,
    pub lifecycle: LifecycleConfig,
    pub intervals: LoopIntervals,
    pub provisioner: String,
    pub health_path: String,
    pub telemetry_path: String,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply defaults, parse durations and check invariants.
    pub fn validate(&self) -> ConfigResult<ResolvedConfig> {
        let regions = match &self.regions {
            Some(r) if r.is_empty() => return Err(ConfigError::NoRegions),
            Some(r) => r.clone(),
            None => DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
        };

        let s = self.scaling.clone().unwrap_or_default();
        let defaults = ScalingConfig::default();
        let scaling = ScalingConfig {
            min_instances: s.min_instances.unwrap_or(defaults.min_instances),
            max_instances: s.max_instances.unwrap_or(defaults.max_instances),
            target_cpu: s.target_cpu.unwrap_or(defaults.target_cpu),
            target_memory: s.target_memory.unwrap_or(defaults.target_memory),
            scale_up_threshold: s.scale_up_threshold.unwrap_or(defaults.scale_up_threshold),
            scale_down_threshold: s
                .scale_down_threshold
                .unwrap_or(defaults.scale_down_threshold),
            cooldown: duration_or("scaling.cooldown", s.cooldown.as_deref(), defaults.cooldown)?,
        };
        scaling.validate()?;

        let lb = self.load_balancer.clone().unwrap_or_default();
        let defaults = LoadBalancerConfig::default();
        let load_balancer = LoadBalancerConfig {
            algorithm: match lb.algorithm.as_deref() {
                Some(a) => a.parse()?,
                None => defaults.algorithm,
            },
            health_check_interval: nonzero(
                "load_balancer.health_check_interval",
                lb.health_check_interval.as_deref(),
                defaults.health_check_interval,
            )?,
            health_check_timeout: nonzero(
                "load_balancer.health_check_timeout",
                lb.health_check_timeout.as_deref(),
                defaults.health_check_timeout,
            )?,
            session_affinity: lb.session_affinity.unwrap_or(defaults.session_affinity),
            unhealthy_threshold: lb.unhealthy_threshold.unwrap_or(defaults.unhealthy_threshold),
        };
        if load_balancer.unhealthy_threshold == 0 {
            return Err(ConfigError::ZeroUnhealthyThreshold);
        }

        let lc = self.lifecycle.clone().unwrap_or_default();
        let defaults = LifecycleConfig::default();
        let lifecycle = LifecycleConfig {
            provision_timeout: nonzero(
                "lifecycle.provision_timeout",
                lc.provision_timeout.as_deref(),
                defaults.provision_timeout,
            )?,
            drain_timeout: duration_or(
                "lifecycle.drain_timeout",
                lc.drain_timeout.as_deref(),
                defaults.drain_timeout,
            )?,
            retention: duration_or(
                "lifecycle.retention",
                lc.retention.as_deref(),
                defaults.retention,
            )?,
        };

        let iv = self.intervals.clone().unwrap_or_default();
        let defaults = LoopIntervals::default();
        let intervals = LoopIntervals {
            scaling: nonzero("intervals.scaling", iv.scaling.as_deref(), defaults.scaling)?,
            metrics: nonzero("intervals.metrics", iv.metrics.as_deref(), defaults.metrics)?,
            cleanup: nonzero("intervals.cleanup", iv.cleanup.as_deref(), defaults.cleanup)?,
        };

        let collab = self.collaborators.clone().unwrap_or_default();

        Ok(ResolvedConfig {
            regions,
            scaling,
            load_balancer,
            lifecycle,
            intervals,
            provisioner: collab
                .provisioner
                .unwrap_or_else(|| "127.0.0.1:9000".to_string()),
            health_path: collab.health_path.unwrap_or_else(|| "/healthz".to_string()),
            telemetry_path: collab
                .telemetry_path
                .unwrap_or_else(|| "/telemetry".to_string()),
        })
    }
}

fn duration_or(
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> ConfigResult<Duration> {
    match value {
        Some(v) => parse_duration(v).ok_or_else(|| ConfigError::Duration {
            field,
            value: v.to_string(),
        }),
        None => Ok(default),
    }
}

fn nonzero(field: &'static str, value: Option<&str>, default: Duration) -> ConfigResult<Duration> {
    let d = duration_or(field, value, default)?;
    if d.is_zero() {
        return Err(ConfigError::ZeroDuration { field });
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = FleetConfig::from_toml("").unwrap();
        let resolved = config.validate().unwrap();

        assert_eq!(resolved.scaling, ScalingConfig::default());
        assert_eq!(resolved.load_balancer, LoadBalancerConfig::default());
        assert_eq!(resolved.regions.len(), DEFAULT_REGIONS.len());
        assert_eq!(resolved.health_path, "/healthz");
    }

    #[test]
    fn parse_full_file() {
        let toml_str = r#"
regions = ["eu-west-1"]

[scaling]
min_instances = 3
max_instances = 12
scale_up_threshold = 75.0
scale_down_threshold = 20.0
cooldown = "90s"

[load_balancer]
algorithm = "ip-hash"
health_check_interval = "10s"
health_check_timeout = "500ms"
session_affinity = true
unhealthy_threshold = 2

[lifecycle]
drain_timeout = "15s"
retention = "30m"

[collaborators]
provisioner = "10.0.0.5:7000"
"#;
        let resolved = FleetConfig::from_toml(toml_str).unwrap().validate().unwrap();

        assert_eq!(resolved.regions, vec!["eu-west-1"]);
        assert_eq!(resolved.scaling.min_instances, 3);
        assert_eq!(resolved.scaling.max_instances, 12);
        assert_eq!(resolved.scaling.cooldown, Duration::from_secs(90));
        assert_eq!(resolved.load_balancer.algorithm, Algorithm::IpHash);
        assert_eq!(
            resolved.load_balancer.health_check_timeout,
            Duration::from_millis(500)
        );
        assert_eq!(resolved.load_balancer.unhealthy_threshold, 2);
        assert_eq!(resolved.lifecycle.drain_timeout, Duration::from_secs(15));
        assert_eq!(resolved.lifecycle.retention, Duration::from_secs(1800));
        assert_eq!(resolved.provisioner, "10.0.0.5:7000");
    }

    #[test]
    fn shipped_example_matches_defaults() {
        let example = include_str!("../../../fleet.example.toml");
        let resolved = FleetConfig::from_toml(example).unwrap().validate().unwrap();
        let defaults = FleetConfig::default().validate().unwrap();
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn min_greater_than_max_is_configuration_error() {
        let toml_str = r#"
[scaling]
min_instances = 10
max_instances = 4
"#;
        let err = FleetConfig::from_toml(toml_str).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MinExceedsMax { min: 10, max: 4 }));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let toml_str = r#"
[scaling]
cooldown = "forever"
"#;
        let err = FleetConfig::from_toml(toml_str).unwrap().validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Duration {
                field: "scaling.cooldown",
                ..
            }
        ));
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let toml_str = r#"
[load_balancer]
algorithm = "fastest"
"#;
        let err = FleetConfig::from_toml(toml_str).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAlgorithm(a) if a == "fastest"));
    }

    #[test]
    fn empty_region_list_rejected() {
        let err = FleetConfig::from_toml("regions = []")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoRegions));
    }

    #[test]
    fn zero_health_interval_rejected() {
        let toml_str = r#"
[load_balancer]
health_check_interval = "0s"
"#;
        let err = FleetConfig::from_toml(toml_str).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { .. }));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, "[scaling]\nmin_instances = 4\n").unwrap();

        let resolved = FleetConfig::from_file(&path).unwrap().validate().unwrap();
        assert_eq!(resolved.scaling.min_instances, 4);
    }
}
