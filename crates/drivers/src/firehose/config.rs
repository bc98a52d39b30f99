use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use entropy_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::ChartRef;

pub const BROKERS_ENV: &str = "SOURCE_KAFKA_BROKERS";
pub const CONSUMER_GROUP_ENV: &str = "SOURCE_KAFKA_CONSUMER_GROUP_ID";

/// Module-level configuration of the firehose kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub chart: ChartRef,
    /// Namespace used when a resource does not pick one.
    pub namespace: String,
    /// Image running `kafka-consumer-groups.sh` for offset resets.
    pub kafka_image: String,
    /// Extra labels stamped on every release.
    pub labels: BTreeMap<String, String>,
    /// Lowest-priority layer of every resource's configs.
    pub defaults: Value,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            chart: ChartRef {
                repository: "https://goto.github.io/charts/".to_string(),
                name: "firehose".to_string(),
                version: "0.1.13".to_string(),
            },
            namespace: "firehose".to_string(),
            kafka_image: "bitnami/kafka:2.0.0".to_string(),
            labels: BTreeMap::new(),
            defaults: Value::Null,
        }
    }
}

const fn one() -> u32 {
    1
}

/// A firehose resource's `spec.configs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirehoseConfig {
    /// Release name; system-owned once created.
    #[serde(default)]
    pub deployment_id: String,
    /// System-owned once created.
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "one")]
    pub replicas: u32,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub chart_version: String,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
    /// Raw values merged over the generated chart values.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub chart_values: Value,
}

impl FirehoseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            return Err(Error::invalid("replicas must be at least 1"));
        }
        if self.deployment_id.is_empty() || self.namespace.is_empty() {
            return Err(Error::invalid("deployment_id and namespace must be set"));
        }
        Ok(())
    }

    /// Broker list and consumer group, both needed to reset offsets.
    pub fn kafka_source(&self) -> Result<(&str, &str)> {
        let brokers = self.env_variables.get(BROKERS_ENV);
        let group = self.env_variables.get(CONSUMER_GROUP_ENV);
        match (brokers, group) {
            (Some(brokers), Some(group)) if !brokers.is_empty() && !group.is_empty() => {
                Ok((brokers.as_str(), group.as_str()))
            }
            _ => Err(Error::invalid(format!(
                "{BROKERS_ENV} and {CONSUMER_GROUP_ENV} must be set to reset offsets"
            ))),
        }
    }
}

/// Where a reset moves the consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetTo {
    Earliest,
    Latest,
    Datetime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetParams {
    pub to: ResetTo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
}

impl ResetParams {
    pub fn validate(&self) -> Result<()> {
        match (self.to, self.datetime) {
            (ResetTo::Datetime, None) => Err(Error::invalid("reset to datetime requires 'datetime'")),
            _ => Ok(()),
        }
    }

    /// `kafka-consumer-groups.sh` flags selecting the target offset.
    pub fn offset_args(&self) -> Vec<String> {
        match (self.to, self.datetime) {
            (ResetTo::Earliest, _) => vec!["--to-earliest".to_string()],
            (ResetTo::Datetime, Some(at)) => vec![
                "--to-datetime".to_string(),
                at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            ],
            _ => vec!["--to-latest".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScaleParams {
    pub replicas: u32,
}

/// Progress carried in `state.module_data` between sync passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transient {
    #[serde(default)]
    pub pending_steps: VecDeque<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<ResetParams>,
}

impl Transient {
    pub fn steps(steps: &[&str]) -> Self {
        Self {
            pending_steps: steps.iter().map(ToString::to_string).collect(),
            reset: None,
        }
    }
}
