//! Simulation fixtures.
//!
//! A fixture is a TOML document describing clusters, pending triggers, and
//! how class changes behave, loaded into a [`SimCloud`]:
//!
//! ```toml
//! [settings]
//! instance_name_prefix = "rds-db-multitenant"
//!
//! [[clusters]]
//! id = "rds-cluster-multitenant-1"
//! members = [
//!     { id = "rds-db-multitenant-a", class = "db.r5.large", writer = true },
//!     { id = "rds-db-multitenant-b", class = "db.r5.large" },
//! ]
//!
//! [[triggers]]
//! instance = "rds-db-multitenant-a"
//!
//! [polling]
//! settle_interval = "100ms"
//! ```
//!
//! A `[polling]` table is read with the same rules as `--polling-config`.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use dbscale_core::{AlarmRatios, PollingConfig, ScalerConfig, ScalingEvent};
use dbscale_engine::sim::{ModifyScript, SimCloud};

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub clusters: Vec<ClusterFixture>,
    #[serde(default)]
    pub triggers: Vec<TriggerFixture>,
    #[serde(default)]
    pub script: ScriptFixture,
    #[serde(default)]
    pub faults: Faults,
    /// Seed memory and connections alarms for every member.
    #[serde(default = "default_true")]
    pub seed_alarms: bool,
    #[serde(skip)]
    pub polling: PollingConfig,
}

fn default_true() -> bool {
    true
}

/// Scaler settings used by `simulate` in place of the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub instance_name_prefix: String,
    pub environment: String,
    pub queue_url: String,
    pub ratios: AlarmRatios,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instance_name_prefix: String::new(),
            environment: "simulation".to_string(),
            queue_url: "sim://scaling-queue".to_string(),
            ratios: AlarmRatios {
                cache_proportion: 0.2,
                connections_safety_percentage: 0.8,
                memory_connections_divider: 100.0,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterFixture {
    pub id: String,
    pub members: Vec<MemberFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberFixture {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub writer: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerFixture {
    /// Instance named by the trigger.
    pub instance: Option<String>,
    /// Alarm name; defaults to `<instance>-memory`.
    pub alarm: Option<String>,
    /// Raw message body, used as-is instead of `instance`/`alarm`.
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptFixture {
    pub reads_before_start: Option<u32>,
    pub reads_before_settle: Option<u32>,
    pub never_starts: bool,
    pub never_settles: bool,
}

impl ScriptFixture {
    fn to_script(&self) -> ModifyScript {
        let defaults = ModifyScript::default();
        ModifyScript {
            reads_before_start: self.reads_before_start.unwrap_or(defaults.reads_before_start),
            reads_before_settle: self.reads_before_settle.unwrap_or(defaults.reads_before_settle),
            never_starts: self.never_starts,
            never_settles: self.never_settles,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Faults {
    pub failing_reads: u32,
    pub reject_modify: bool,
    pub reject_failover: bool,
    pub reject_alarm_writes: bool,
}

impl Fixture {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut fixture: Fixture = toml::from_str(content).context("invalid fixture")?;
        fixture.polling =
            PollingConfig::from_toml_str(content).context("invalid [polling] table in fixture")?;
        fixture.validate()?;
        Ok(fixture)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in fixture {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if cluster.members.is_empty() {
                bail!("cluster {} has no members", cluster.id);
            }
            let writers = cluster.members.iter().filter(|m| m.writer).count();
            if writers > 1 {
                bail!("cluster {} has {writers} writers", cluster.id);
            }
            for member in &cluster.members {
                if !seen.insert(member.id.as_str()) {
                    bail!("instance {} is listed more than once", member.id);
                }
            }
        }
        for (i, trigger) in self.triggers.iter().enumerate() {
            if trigger.instance.is_none() && trigger.body.is_none() {
                bail!("trigger {i} needs an instance or a body");
            }
        }
        Ok(())
    }

    /// Scaler configuration for a simulated run.
    pub fn config(&self) -> ScalerConfig {
        ScalerConfig {
            instance_name_prefix: self.settings.instance_name_prefix.clone(),
            environment: self.settings.environment.clone(),
            notifications_hook: "sim://notifications".to_string(),
            alerts_hook: "sim://alerts".to_string(),
            queue_url: self.settings.queue_url.clone(),
            ratios: self.settings.ratios,
            polling: self.polling,
        }
    }

    /// Build the simulated control planes.
    pub fn build(&self) -> SimCloud {
        let cloud = SimCloud::new();
        for cluster in &self.clusters {
            let members: Vec<(&str, &str, bool)> = cluster
                .members
                .iter()
                .map(|m| (m.id.as_str(), m.class.as_str(), m.writer))
                .collect();
            cloud.add_cluster(&cluster.id, &members);
            if self.seed_alarms {
                for member in &cluster.members {
                    cloud.seed_alarms(&member.id);
                }
            }
        }

        for trigger in &self.triggers {
            match (&trigger.body, &trigger.instance) {
                (Some(body), _) => {
                    cloud.push_raw_trigger(body.clone());
                }
                (None, Some(instance)) => {
                    let body = match &trigger.alarm {
                        Some(alarm) => ScalingEvent::encode_body(instance, alarm),
                        None => ScalingEvent::encode_body(instance, &format!("{instance}-memory")),
                    };
                    cloud.push_raw_trigger(body);
                }
                (None, None) => {}
            }
        }

        cloud.set_modify_script(self.script.to_script());
        cloud.fail_next_reads(self.faults.failing_reads);
        cloud.reject_modify(self.faults.reject_modify);
        cloud.reject_failover(self.faults.reject_failover);
        cloud.reject_alarm_writes(self.faults.reject_alarm_writes);
        cloud
    }
}
