// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{Error, MAX_AGENTS};

/// Default number of ticks between a trigger leaving an agent and the
/// controller's answer reaching it.
pub const DEFAULT_LATENCY: usize = 7;

/// Default depth of the per-agent transmit history.
const DEFAULT_HISTORY_DEPTH: usize = 16;

/// Largest accepted jitter half-width.
const MAX_JITTER: i8 = 8;

/// How the minimum spacing between two triggers of the same agent is
/// compared against the ticks elapsed since the last one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum MinIdlePolicy {
    /// `ticks_since_last_trigger > min_idle_ticks`
    Strict,
    /// `ticks_since_last_trigger >= min_idle_ticks`
    Inclusive,
}

impl MinIdlePolicy {
    pub fn allows(self, ticks_since_last_trigger: u32, min_idle_ticks: u32) -> bool {
        match self {
            Self::Strict => ticks_since_last_trigger > min_idle_ticks,
            Self::Inclusive => ticks_since_last_trigger >= min_idle_ticks,
        }
    }
}

impl Default for MinIdlePolicy {
    fn default() -> Self {
        Self::Strict
    }
}

/// Tunables of a single peripheral agent.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfiguration {
    pub name: String,
    /// per-tick probability of an uncorrelated (single) trigger
    pub single_event_probability: f64,
    /// probability that the agent reports an active coincidence
    pub report_probability: f64,
    /// probability that a reported coincidence slips by exactly one tick
    pub delay_probability: f64,
    pub min_idle_ticks: u32,
    pub min_idle_policy: MinIdlePolicy,
    /// half-width of the uniform jitter added to a coincidence offset
    pub jitter: i8,
    /// initial clock counter; random when absent
    pub initial_clock: Option<u16>,
}

impl AgentConfiguration {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            name: "agent".to_owned(),
            single_event_probability: 0.005,
            report_probability: 0.9,
            delay_probability: 0.1,
            min_idle_ticks: 3,
            min_idle_policy: MinIdlePolicy::Strict,
            jitter: 2,
            initial_clock: None,
        }
    }
}

/// Parameters agreed between the controller and the link checkers.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfiguration {
    pub latency: usize,
    pub history_depth: usize,
    /// maximum distance, in fine offset units, between two triggers the
    /// controller reports as a positive coincidence
    pub coincidence_window: u16,
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        Self {
            latency: DEFAULT_LATENCY,
            history_depth: DEFAULT_HISTORY_DEPTH,
            coincidence_window: 20,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoincidenceConfiguration {
    pub probability: f64,
    /// offsets are drawn uniformly from `[-offset_range, offset_range]`
    pub offset_range: i8,
}

impl Default for CoincidenceConfiguration {
    fn default() -> Self {
        Self {
            probability: 0.02,
            offset_range: 8,
        }
    }
}

/// provides the set of parameters for a bench run
///
/// constructed programmatically or read from a config file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchConfiguration {
    pub seed: u64,
    pub link: LinkConfiguration,
    pub coincidence: CoincidenceConfiguration,
    pub agents: Vec<AgentConfiguration>,
}

impl Default for BenchConfiguration {
    fn default() -> Self {
        Self {
            seed: 0x2545F4914F6CDD1Du64,
            link: LinkConfiguration::default(),
            coincidence: CoincidenceConfiguration::default(),
            agents: vec![
                AgentConfiguration::named("A1"),
                AgentConfiguration::named("B1"),
            ],
        }
    }
}

fn check_probability(what: &str, p: f64) -> Result<(), Error> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(Error::InvalidConfiguration(format!(
            "{} must be a probability, got {}",
            what, p
        )))
    }
}

impl BenchConfiguration {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(config: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check everything that would make the run meaningless before the first
    /// tick is spent.
    pub fn validate(&self) -> Result<(), Error> {
        let link = &self.link;
        if link.latency < 2 {
            return Err(Error::InvalidLatency(link.latency));
        }
        if link.history_depth < link.latency + 1 {
            return Err(Error::InvalidHistoryDepth {
                depth: link.history_depth,
                latency: link.latency,
            });
        }
        check_probability("coincidence.probability", self.coincidence.probability)?;
        if self.coincidence.offset_range < 0 {
            return Err(Error::InvalidConfiguration(format!(
                "coincidence.offset_range must not be negative, got {}",
                self.coincidence.offset_range
            )));
        }
        if self.agents.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one agent is required".to_owned(),
            ));
        }
        if self.agents.len() > MAX_AGENTS {
            return Err(Error::InvalidConfiguration(format!(
                "{} agents do not fit the register map (at most {})",
                self.agents.len(),
                MAX_AGENTS
            )));
        }
        for (index, agent) in self.agents.iter().enumerate() {
            if self.agents[..index].iter().any(|a| a.name == agent.name) {
                return Err(Error::InvalidConfiguration(format!(
                    "duplicate agent name {}",
                    agent.name
                )));
            }
            check_probability("single_event_probability", agent.single_event_probability)?;
            check_probability("report_probability", agent.report_probability)?;
            check_probability("delay_probability", agent.delay_probability)?;
            if !(0..=MAX_JITTER).contains(&agent.jitter) {
                return Err(Error::InvalidConfiguration(format!(
                    "agent {} jitter must be within 0..={}, got {}",
                    agent.name, MAX_JITTER, agent.jitter
                )));
            }
        }
        Ok(())
    }
}
