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

use rand::Rng;
use rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::{CoincidenceConfiguration, Tick};

/// The shared event signal for one tick. Agents only ever read it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoincidenceState {
    pub active: bool,
    pub time_offset: i8,
}

/// Process-wide source of physically simultaneous events.
pub struct CoincidenceSource {
    probability: f64,
    offset_range: i8,
    rng: Xoshiro256StarStar,
    injected: Option<i8>,
    current: CoincidenceState,
}

impl CoincidenceSource {
    pub fn new(config: &CoincidenceConfiguration, seed: u64) -> Self {
        Self {
            probability: config.probability,
            offset_range: config.offset_range,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            injected: None,
            current: CoincidenceState::default(),
        }
    }

    /// Force a coincidence with `time_offset` on the next step, regardless of
    /// the configured probability.
    pub fn inject(&mut self, time_offset: i8) {
        self.injected = Some(time_offset);
    }

    /// The value published for the most recent tick.
    pub fn current(&self) -> CoincidenceState {
        self.current
    }

    pub fn step(&mut self, tick: Tick) -> CoincidenceState {
        self.current = if let Some(time_offset) = self.injected.take() {
            log::debug!("tick {}: injected coincidence at {:+}", tick, time_offset);
            CoincidenceState {
                active: true,
                time_offset,
            }
        } else if self.probability > 0.0 && self.rng.gen_bool(self.probability) {
            let time_offset = self.rng.gen_range(-self.offset_range..=self.offset_range);
            log::trace!("tick {}: coincidence at {:+}", tick, time_offset);
            CoincidenceState {
                active: true,
                time_offset,
            }
        } else {
            CoincidenceState::default()
        };
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_source_never_fires() {
        let config = CoincidenceConfiguration {
            probability: 0.0,
            ..Default::default()
        };
        let mut source = CoincidenceSource::new(&config, 1);
        assert!((0..1000).all(|tick| !source.step(tick).active));
        assert_eq!(source.current(), CoincidenceState::default());
    }

    #[test]
    fn injection_lasts_one_tick() {
        let config = CoincidenceConfiguration {
            probability: 0.0,
            ..Default::default()
        };
        let mut source = CoincidenceSource::new(&config, 1);
        source.step(0);
        source.inject(-3);
        assert_eq!(
            source.step(1),
            CoincidenceState {
                active: true,
                time_offset: -3
            }
        );
        assert!(!source.step(2).active);
    }

    #[test]
    fn offsets_stay_in_range() {
        let config = CoincidenceConfiguration {
            probability: 0.5,
            offset_range: 4,
        };
        let mut source = CoincidenceSource::new(&config, 0x5eed);
        let mut fired = 0;
        for tick in 0..2000 {
            let state = source.step(tick);
            if state.active {
                fired += 1;
                assert!(state.time_offset.abs() <= 4);
            } else {
                assert_eq!(state.time_offset, 0);
            }
        }
        // loose bounds around the expected 1000
        assert!(fired > 800 && fired < 1200, "fired {}", fired);
    }
}
