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

//! Latency contract checks.
//!
//! Every agent keeps a checker that, on each ordinary tick, compares what the
//! controller reports on the agent's inbound wire with what the agent itself
//! transmitted exactly `latency` ticks earlier. A coincidence-class report
//! must answer a TRIGGER; anything else must answer a non-trigger.
//!
//! Checks are observational: a failed check is counted, logged and recorded,
//! and the run carries on.

use std::fmt;
use std::ops::AddAssign;

use crate::{AgentSymbol, ControllerSymbol, Tick, WordHistory};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckTally {
    pub passed: u64,
    pub failed: u64,
}

impl CheckTally {
    pub fn total(&self) -> u64 {
        self.passed + self.failed
    }
}

impl AddAssign for CheckTally {
    fn add_assign(&mut self, other: Self) {
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

impl fmt::Display for CheckTally {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "checks: {} ok, {} failed", self.passed, self.failed)
    }
}

/// Everything needed to reproduce a failed check without re-running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckFailure {
    pub tick: Tick,
    pub agent: String,
    pub latency: usize,
    /// what the controller reported this tick
    pub observed: ControllerSymbol,
    /// what the agent transmitted `latency` ticks earlier
    pub sent: AgentSymbol,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CHECKFAIL@{} agent {}: controller reported {}, agent sent {} at tick {}",
            self.tick,
            self.agent,
            self.observed,
            self.sent,
            self.tick.saturating_sub(self.latency as Tick),
        )
    }
}

pub struct LinkChecker {
    agent: String,
    latency: usize,
    tally: CheckTally,
    failures: Vec<CheckFailure>,
}

impl LinkChecker {
    pub fn new(agent: &str, latency: usize) -> Self {
        Self {
            agent: agent.to_owned(),
            latency,
            tally: CheckTally::default(),
            failures: vec![],
        }
    }

    pub fn latency(&self) -> usize {
        self.latency
    }

    pub fn tally(&self) -> CheckTally {
        self.tally
    }

    pub fn failures(&self) -> &[CheckFailure] {
        &self.failures
    }

    /// Check the controller's report for this tick against the agent's own
    /// transmit history (which must not yet contain this tick's symbol).
    ///
    /// Returns `None` while the history is still shorter than the latency,
    /// otherwise whether the check passed.
    pub fn check(
        &mut self,
        tick: Tick,
        observed: ControllerSymbol,
        history: &WordHistory,
    ) -> Option<bool> {
        let sent = history.back(self.latency)?.decode();
        let ok = observed.is_coincidence() == sent.is_trigger();
        if ok {
            self.tally.passed += 1;
            if sent.is_trigger() {
                log::debug!(
                    "tick {}: agent {} trigger {} answered by {}",
                    tick,
                    self.agent,
                    sent,
                    observed
                );
            }
        } else {
            self.tally.failed += 1;
            let failure = CheckFailure {
                tick,
                agent: self.agent.clone(),
                latency: self.latency,
                observed,
                sent,
            };
            log::error!("{}", failure);
            self.failures.push(failure);
        }
        Some(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_idle, encode_trigger};

    fn history_with_trigger_at(len: usize, trigger_at: usize) -> WordHistory {
        let mut history = WordHistory::new(16);
        for i in 0..len {
            if i == trigger_at {
                history.push(encode_trigger(-2));
            } else {
                history.push(encode_idle((i % 4) as u8, 0x1234));
            }
        }
        history
    }

    #[test]
    fn no_check_before_history_covers_latency() {
        let mut checker = LinkChecker::new("A1", 7);
        let history = history_with_trigger_at(6, 99);
        assert_eq!(
            checker.check(6, ControllerSymbol::Idle(0), &history),
            None
        );
        assert_eq!(checker.tally(), CheckTally::default());
    }

    #[test]
    fn coincidence_must_answer_trigger() {
        let mut checker = LinkChecker::new("A1", 7);
        // 10 symbols, trigger at tick 3; back(7) is tick 3
        let history = history_with_trigger_at(10, 3);
        assert_eq!(
            checker.check(10, ControllerSymbol::NegativeCoincidence, &history),
            Some(true)
        );
        assert_eq!(
            checker.check(10, ControllerSymbol::PositiveCoincidence, &history),
            Some(true)
        );
        assert_eq!(
            checker.check(10, ControllerSymbol::Idle(1), &history),
            Some(false)
        );
        assert_eq!(
            checker.tally(),
            CheckTally {
                passed: 2,
                failed: 1
            }
        );
        let failure = &checker.failures()[0];
        assert_eq!(failure.tick, 10);
        assert_eq!(failure.agent, "A1");
        assert_eq!(failure.observed, ControllerSymbol::Idle(1));
        assert_eq!(failure.sent, AgentSymbol::Trigger { offset: -2 });
        assert!(failure.to_string().starts_with("CHECKFAIL@10 agent A1"));
    }

    #[test]
    fn non_coincidence_must_answer_idle() {
        let mut checker = LinkChecker::new("B1", 3);
        let history = history_with_trigger_at(8, 0);
        assert_eq!(
            checker.check(8, ControllerSymbol::Test(5), &history),
            Some(true)
        );
        assert_eq!(
            checker.check(8, ControllerSymbol::Other(0x99), &history),
            Some(true)
        );
        assert_eq!(
            checker.check(8, ControllerSymbol::PositiveCoincidence, &history),
            Some(false)
        );
        assert_eq!(checker.tally().total(), 3);
        assert_eq!(checker.tally().failed, 1);
    }

    #[test]
    fn tallies_add_up() {
        let mut total = CheckTally::default();
        total += CheckTally {
            passed: 3,
            failed: 1,
        };
        total += CheckTally {
            passed: 2,
            failed: 0,
        };
        assert_eq!(total.to_string(), "checks: 5 ok, 1 failed");
    }
}
