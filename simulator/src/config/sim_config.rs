use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchedulingError;

/// Scheduling algorithm selector. Only DPDS is implemented; the variant
/// exists so that frontends can reject unknown names with a diagnostic
/// instead of silently falling back.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "dpds")]
    Dpds,
}

impl FromStr for Algorithm {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dpds" => Ok(Algorithm::Dpds),
            _ => Err(SchedulingError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// How workflow priorities are assigned across the ensemble.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityMethod {
    #[default]
    Random,
    Sorted,
}

impl FromStr for PriorityMethod {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(PriorityMethod::Random),
            "sorted" => Ok(PriorityMethod::Sorted),
            _ => Err(SchedulingError::UnknownPriorityMethod(s.to_string())),
        }
    }
}

/// A group of identical VM slots in the platform description.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HostGroupConfig {
    pub name: String,
    /// Compute speed in flops per second.
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub count: Option<u32>,
}

/// Per-slot host description, obtained by expanding the configured groups.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HostConfig {
    pub name: String,
    pub speed: f64,
}

impl HostConfig {
    pub fn from_group_config(group: &HostGroupConfig, idx: Option<u32>) -> Self {
        let name = match idx {
            Some(idx) => format!("{}-{}", group.name, idx),
            None => group.name.clone(),
        };
        HostConfig {
            name,
            speed: group.speed,
        }
    }
}

/// Read-only configuration of a scheduling run. Defaults for the period and
/// the utilization thresholds are the values used by cloudworkflowsim.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SchedulingConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub priority_method: PriorityMethod,
    /// Provisioning period in seconds.
    #[serde(default = "default_period")]
    pub period: f64,
    /// Total budget in currency units. Zero means "unset".
    #[serde(default)]
    pub budget: f64,
    /// Deadline in seconds. Zero means "unset".
    #[serde(default)]
    pub deadline: f64,
    /// VM hourly price.
    #[serde(default = "default_price")]
    pub price: f64,
    /// Upper utilization threshold, in percent.
    #[serde(default = "default_upper_utilization")]
    pub upper_utilization: f64,
    /// Lower utilization threshold, in percent.
    #[serde(default = "default_lower_utilization")]
    pub lower_utilization: f64,
    /// The running VM count may never exceed `vmax` times the initial count.
    #[serde(default = "default_vmax")]
    pub vmax: f64,
    /// Time before a started VM actually becomes available, in seconds.
    #[serde(default)]
    pub boot_delay: f64,
    /// Seed for priority shuffling and random host selection.
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub hosts: Vec<HostGroupConfig>,
}

impl SchedulingConfig {
    pub fn from_file(file_name: &str) -> Self {
        serde_yaml::from_str(
            &std::fs::read_to_string(file_name)
                .unwrap_or_else(|e| panic!("Can't read file {}: {}", file_name, e)),
        )
        .unwrap_or_else(|e| panic!("Can't parse YAML from file {}: {}", file_name, e))
    }

    /// Sanity checks over crucial parameters, performed once before a run.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.budget <= 0. || self.deadline <= 0. {
            return Err(SchedulingError::MissingConstraints);
        }
        Ok(())
    }

    /// Expand host groups into individual slots, sorted by name.
    pub fn host_slots(&self) -> Vec<HostConfig> {
        let mut slots = Vec::new();
        for group in &self.hosts {
            match group.count {
                None | Some(1) => slots.push(HostConfig::from_group_config(group, None)),
                Some(count) => {
                    for i in 0..count {
                        slots.push(HostConfig::from_group_config(group, Some(i)));
                    }
                }
            }
        }
        slots.sort_by(|a, b| a.name.cmp(&b.name));
        slots
    }

    /// Number of VMs activated at startup: enough to spend the whole budget
    /// at the hourly price over the run, but at least one VM-hour worth.
    pub fn initial_vm_count(&self) -> usize {
        (self.budget / (f64::max(1., self.deadline / 3600.) * self.price)).ceil() as usize
    }
}

fn default_period() -> f64 {
    90.
}

fn default_price() -> f64 {
    1.
}

fn default_upper_utilization() -> f64 {
    90.
}

fn default_lower_utilization() -> f64 {
    70.
}

fn default_vmax() -> f64 {
    1.
}

fn default_speed() -> f64 {
    1.
}

fn default_seed() -> u64 {
    123
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_defaults() {
        let config: SchedulingConfig = serde_yaml::from_str(
            r#"
            budget: 100
            deadline: 7200
            hosts:
              - name: vm
                speed: 10
                count: 4
            "#,
        )
        .unwrap();

        assert_eq!(config.algorithm, Algorithm::Dpds);
        assert_eq!(config.priority_method, PriorityMethod::Random);
        assert_eq!(config.period, 90.);
        assert_eq!(config.upper_utilization, 90.);
        assert_eq!(config.lower_utilization, 70.);
        assert!(config.validate().is_ok());

        let slots = config.host_slots();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].name, "vm-0");
        assert_eq!(slots[3].name, "vm-3");
    }

    #[test]
    fn missing_constraints_rejected() {
        let config: SchedulingConfig =
            serde_yaml::from_str("hosts: [{name: vm, speed: 1}]").unwrap();
        assert!(matches!(
            config.validate(),
            Err(SchedulingError::MissingConstraints)
        ));
    }

    #[test]
    fn unknown_algorithm_rejected() {
        assert!(Algorithm::from_str("spss").is_err());
        assert!(Algorithm::from_str("DPDS").is_ok());
        assert!(PriorityMethod::from_str("sorted").is_ok());
        assert!(PriorityMethod::from_str("fifo").is_err());
    }

    #[test]
    fn initial_vm_count_follows_budget() {
        let config: SchedulingConfig = serde_yaml::from_str(
            "{budget: 10, deadline: 7200, price: 1, hosts: [{name: vm, count: 16}]}",
        )
        .unwrap();
        // $10 over 2 hours at $1/hour pays for 5 VMs.
        assert_eq!(config.initial_vm_count(), 5);

        let config: SchedulingConfig = serde_yaml::from_str(
            "{budget: 3, deadline: 1800, price: 1, hosts: [{name: vm, count: 16}]}",
        )
        .unwrap();
        // Sub-hour deadlines are billed as one full hour.
        assert_eq!(config.initial_vm_count(), 3);
    }
}
