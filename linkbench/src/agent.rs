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

//! The rocstar peripheral agent: one emulated board on one end of a link.

use log::{debug, trace, warn};
use rand::Rng;
use rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::symbol::{FINE_UNITS_PER_TICK, IDLE_FRAMES, TRIGGER_OFFSET_MAX, TRIGGER_OFFSET_MIN};
use crate::{
    decode_controller_output, encode_idle, encode_trigger, AgentConfiguration, CoincidenceState,
    ControllerSymbol, Error, LinkChecker, Peripheral, SpecialCommand, Symbol, Tick, WordHistory,
};

/// Link-level state of the agent. `Special1..Special4` capture the nibbles of
/// a special command; there is no terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    IdleLink,
    Special1,
    Special2,
    Special3,
    Special4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedCommand {
    pub tick: Tick,
    pub command: SpecialCommand,
}

/// Private state of one agent; only the agent's own step mutates it.
#[derive(Clone, Debug)]
pub struct AgentState {
    /// free-running clock, zeroed by SYNC
    pub clk_counter: u16,
    /// snapshot taken by SAVE_CLOCK
    pub saved_clk_counter: u16,
    pub trigger_enabled: bool,
    pub idle_frame_index: u8,
    pub ticks_since_last_trigger: u32,
    pub word_history: WordHistory,
    /// shared offset of a coincidence whose report slipped to the next tick
    pub pending_delayed_coincidence: Option<i8>,
    /// clock value serialized by the current run of four IDLE frames
    pub clk_latch: u16,
    pub link_state: LinkState,
    pub command_register: u16,
    /// SYNC takes effect at the next tick boundary
    pub pending_sync: bool,
    pub last_command: Option<AppliedCommand>,
}

impl AgentState {
    pub fn new(initial_clock: u16, history_depth: usize) -> Self {
        Self {
            clk_counter: initial_clock,
            saved_clk_counter: 0,
            trigger_enabled: false,
            idle_frame_index: 0,
            ticks_since_last_trigger: u32::MAX,
            word_history: WordHistory::new(history_depth),
            pending_delayed_coincidence: None,
            clk_latch: initial_clock,
            link_state: LinkState::IdleLink,
            command_register: 0,
            pending_sync: false,
            last_command: None,
        }
    }

    pub fn apply_command(&mut self, tick: Tick, command: SpecialCommand) {
        match command {
            SpecialCommand::Sync => self.pending_sync = true,
            SpecialCommand::Start => self.trigger_enabled = true,
            SpecialCommand::End => {
                self.trigger_enabled = false;
                self.pending_delayed_coincidence = None;
            }
            SpecialCommand::SaveClock => self.saved_clk_counter = self.clk_counter,
        }
        self.last_command = Some(AppliedCommand { tick, command });
    }
}

/// What an agent observes each tick: the controller's symbol on its inbound
/// wire and the shared coincidence signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgentInbound {
    pub symbol: u8,
    pub coincidence: CoincidenceState,
}

pub struct RocstarAgent {
    config: AgentConfiguration,
    state: AgentState,
    checker: LinkChecker,
    rng: Xoshiro256StarStar,
}

impl RocstarAgent {
    /// Fails when the history cannot reach `latency` symbols back.
    pub fn new(
        config: AgentConfiguration,
        latency: usize,
        history_depth: usize,
        seed: u64,
    ) -> Result<Self, Error> {
        if latency == 0 {
            return Err(Error::InvalidLatency(latency));
        }
        if history_depth < latency + 1 {
            return Err(Error::InvalidHistoryDepth {
                depth: history_depth,
                latency,
            });
        }
        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
        let initial_clock = config.initial_clock.unwrap_or_else(|| rng.gen());
        debug!(
            "agent {} starting with clock {:#06x}",
            config.name, initial_clock
        );
        Ok(Self {
            checker: LinkChecker::new(&config.name, latency),
            state: AgentState::new(initial_clock, history_depth),
            config,
            rng,
        })
    }

    pub fn config(&self) -> &AgentConfiguration {
        &self.config
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn checker(&self) -> &LinkChecker {
        &self.checker
    }

    fn capture_nibble(&mut self, tick: Tick, nibble: u8) {
        let state = &mut self.state;
        state.command_register = (state.command_register << 4) | (nibble & 0x0f) as u16;
        state.link_state = match state.link_state {
            LinkState::Special1 => LinkState::Special2,
            LinkState::Special2 => LinkState::Special3,
            LinkState::Special3 => LinkState::Special4,
            LinkState::Special4 => {
                let value = state.command_register;
                match SpecialCommand::from_u16(value) {
                    Some(command) => {
                        debug!("tick {}: agent {} applies {}", tick, self.config.name, command);
                        state.apply_command(tick, command);
                    }
                    None => warn!(
                        "tick {}: agent {} ignores unknown special command {:#06x}",
                        tick, self.config.name, value
                    ),
                }
                LinkState::IdleLink
            }
            LinkState::IdleLink => unreachable!("nibble captured outside a special command"),
        };
    }

    fn sample_jitter(&mut self) -> i32 {
        let jitter = self.config.jitter as i32;
        self.rng.gen_range(-jitter..=jitter)
    }

    /// Decide whether this tick carries a trigger; returns its offset.
    fn decide_trigger(&mut self, tick: Tick, coincidence: CoincidenceState) -> Option<i32> {
        if !self.state.trigger_enabled {
            return None;
        }
        let reported = if let Some(offset) = self.state.pending_delayed_coincidence.take() {
            // one tick late: the event happened a full tick before this one
            Some(offset as i32 + self.sample_jitter() - FINE_UNITS_PER_TICK)
        } else if coincidence.active && self.rng.gen_bool(self.config.report_probability) {
            if self.rng.gen_bool(self.config.delay_probability) {
                trace!(
                    "tick {}: agent {} delays coincidence at {:+}",
                    tick,
                    self.config.name,
                    coincidence.time_offset
                );
                self.state.pending_delayed_coincidence = Some(coincidence.time_offset);
                return None;
            }
            Some(coincidence.time_offset as i32 + self.sample_jitter())
        } else {
            None
        };
        let spacing_elapsed = self
            .config
            .min_idle_policy
            .allows(self.state.ticks_since_last_trigger, self.config.min_idle_ticks);
        if !spacing_elapsed {
            if reported.is_some() {
                trace!(
                    "tick {}: agent {} drops coincidence inside min-idle spacing",
                    tick,
                    self.config.name
                );
            }
            return None;
        }
        if reported.is_some() {
            return reported;
        }
        if self.rng.gen_bool(self.config.single_event_probability) {
            return Some(self.rng.gen_range(TRIGGER_OFFSET_MIN..=TRIGGER_OFFSET_MAX));
        }
        None
    }
}

impl Peripheral for RocstarAgent {
    type Inbound = AgentInbound;
    type Outbound = Symbol;

    fn name(&self) -> &str {
        &self.config.name
    }

    fn step(&mut self, tick: Tick, inbound: AgentInbound) -> Symbol {
        let observed = decode_controller_output(inbound.symbol);
        match self.state.link_state {
            LinkState::IdleLink => {
                if observed == ControllerSymbol::Special {
                    trace!("tick {}: agent {} enters SPECIAL", tick, self.config.name);
                    self.state.link_state = LinkState::Special1;
                    self.state.command_register = 0;
                } else {
                    self.checker.check(tick, observed, &self.state.word_history);
                }
            }
            _ => self.capture_nibble(tick, inbound.symbol & 0x0f),
        }

        let symbol = match self.decide_trigger(tick, inbound.coincidence) {
            Some(offset) => {
                self.state.ticks_since_last_trigger = 0;
                let symbol = encode_trigger(offset);
                debug!("tick {}: agent {} sends {}", tick, self.config.name, symbol);
                symbol
            }
            None => {
                let state = &mut self.state;
                if state.idle_frame_index == 0 {
                    state.clk_latch = state.clk_counter;
                }
                let symbol = encode_idle(state.idle_frame_index, state.clk_latch);
                state.idle_frame_index = (state.idle_frame_index + 1) % IDLE_FRAMES;
                state.ticks_since_last_trigger = state.ticks_since_last_trigger.saturating_add(1);
                symbol
            }
        };

        let state = &mut self.state;
        state.word_history.push(symbol);
        state.clk_counter = if state.pending_sync {
            state.pending_sync = false;
            0
        } else {
            state.clk_counter.wrapping_add(1)
        };
        symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentSymbol, MinIdlePolicy};

    const LATENCY: usize = 7;

    fn quiet_agent(name: &str, initial_clock: u16) -> RocstarAgent {
        let config = AgentConfiguration {
            name: name.to_owned(),
            single_event_probability: 0.0,
            report_probability: 1.0,
            delay_probability: 0.0,
            jitter: 0,
            initial_clock: Some(initial_clock),
            ..Default::default()
        };
        RocstarAgent::new(config, LATENCY, 16, 1).unwrap()
    }

    fn idle(tick: Tick) -> AgentInbound {
        AgentInbound {
            symbol: ControllerSymbol::Idle((tick % 4) as u8).encode(),
            coincidence: CoincidenceState::default(),
        }
    }

    fn command_bytes(command: SpecialCommand) -> Vec<u8> {
        std::iter::once(ControllerSymbol::Special.encode())
            .chain(
                command
                    .nibbles()
                    .iter()
                    .map(|n| ControllerSymbol::Nibble(*n).encode()),
            )
            .collect()
    }

    /// Step `agent` from `tick` through the five ticks of `command`; returns
    /// the tick after the last nibble.
    fn send_command(agent: &mut RocstarAgent, tick: Tick, command: SpecialCommand) -> Tick {
        let mut tick = tick;
        for byte in command_bytes(command) {
            agent.step(
                tick,
                AgentInbound {
                    symbol: byte,
                    ..Default::default()
                },
            );
            tick += 1;
        }
        tick
    }

    #[test]
    fn history_must_cover_latency() {
        let config = AgentConfiguration::named("A1");
        assert!(matches!(
            RocstarAgent::new(config.clone(), LATENCY, LATENCY, 1),
            Err(Error::InvalidHistoryDepth {
                depth: LATENCY,
                latency: LATENCY
            })
        ));
        assert!(matches!(
            RocstarAgent::new(config.clone(), 0, 0, 1),
            Err(Error::InvalidLatency(0))
        ));
        let agent = RocstarAgent::new(config, LATENCY, LATENCY + 1, 1).unwrap();
        assert_eq!(agent.state().word_history.capacity(), LATENCY + 1);
    }

    #[test]
    fn start_and_end_toggle_triggers() {
        let mut agent = quiet_agent("A1", 0);
        let tick = send_command(&mut agent, 0, SpecialCommand::Start);
        assert!(agent.state().trigger_enabled);
        assert_eq!(agent.state().link_state, LinkState::IdleLink);
        assert_eq!(
            agent.state().last_command,
            Some(AppliedCommand {
                tick: 4,
                command: SpecialCommand::Start
            })
        );
        send_command(&mut agent, tick, SpecialCommand::End);
        assert!(!agent.state().trigger_enabled);
    }

    #[test]
    fn special_states_advance_per_nibble() {
        let mut agent = quiet_agent("A1", 0);
        let bytes = command_bytes(SpecialCommand::Start);
        let expected = [
            LinkState::Special1,
            LinkState::Special2,
            LinkState::Special3,
            LinkState::Special4,
            LinkState::IdleLink,
        ];
        for (tick, (byte, state)) in bytes.iter().zip(expected.iter()).enumerate() {
            agent.step(
                tick as Tick,
                AgentInbound {
                    symbol: *byte,
                    ..Default::default()
                },
            );
            assert_eq!(agent.state().link_state, *state);
        }
    }

    #[test]
    fn unknown_command_is_ignored() {
        let mut agent = quiet_agent("A1", 0);
        let mut tick = 0;
        for byte in [ControllerSymbol::Special.encode(), 0x21, 0x22, 0x23, 0x24] {
            agent.step(
                tick,
                AgentInbound {
                    symbol: byte,
                    ..Default::default()
                },
            );
            tick += 1;
        }
        assert_eq!(agent.state().command_register, 0x1234);
        assert_eq!(agent.state().last_command, None);
        assert_eq!(agent.state().link_state, LinkState::IdleLink);
    }

    #[test]
    fn sync_zeroes_clock_at_next_tick() {
        // Two agents with unrelated clocks; the last SYNC nibble lands on
        // tick 50.
        let mut a1 = quiet_agent("A1", 0x1234);
        let mut b1 = quiet_agent("B1", 0xbeef);
        for tick in 0..46 {
            a1.step(tick, idle(tick));
            b1.step(tick, idle(tick));
        }
        let mut tick = 46;
        for byte in command_bytes(SpecialCommand::Sync) {
            let inbound = AgentInbound {
                symbol: byte,
                ..Default::default()
            };
            a1.step(tick, inbound);
            b1.step(tick, inbound);
            tick += 1;
        }
        assert_eq!(tick, 51);
        assert_eq!(a1.state().last_command.unwrap().tick, 50);
        assert_eq!(a1.state().clk_counter, 0);
        assert_eq!(b1.state().clk_counter, 0);
        for expected in 1..100u16 {
            a1.step(tick, idle(tick));
            b1.step(tick, idle(tick));
            tick += 1;
            assert_eq!(a1.state().clk_counter, expected);
            assert_eq!(b1.state().clk_counter, expected);
        }
    }

    #[test]
    fn save_clock_is_idempotent() {
        let mut agent = quiet_agent("A1", 100);
        let mut tick = send_command(&mut agent, 0, SpecialCommand::SaveClock);
        let first = agent.state().last_command.unwrap();
        assert_eq!(first.tick, 4);
        let first_snapshot = agent.state().saved_clk_counter;
        assert_eq!(first_snapshot, 100 + first.tick as u16);

        while tick < 20 {
            agent.step(tick, idle(tick));
            tick += 1;
        }
        assert_eq!(agent.state().saved_clk_counter, first_snapshot);

        send_command(&mut agent, tick, SpecialCommand::SaveClock);
        let second = agent.state().last_command.unwrap();
        assert_eq!(second.tick, 24);
        let second_snapshot = agent.state().saved_clk_counter;
        // no SYNC in between: the snapshot only moves by the elapsed ticks
        assert_eq!(
            second_snapshot.wrapping_sub(first_snapshot),
            (second.tick - first.tick) as u16
        );

        // a repeat within the same tick leaves the snapshot alone
        let mut state = agent.state().clone();
        state.clk_counter = second_snapshot;
        state.apply_command(second.tick, SpecialCommand::SaveClock);
        assert_eq!(state.saved_clk_counter, second_snapshot);
    }

    #[test]
    fn save_clock_snapshots_current_tick() {
        let mut agent = quiet_agent("A1", 100);
        let tick = send_command(&mut agent, 0, SpecialCommand::SaveClock);
        // applied on tick 4, when the clock read 104
        assert_eq!(agent.state().saved_clk_counter, 104);
        for t in tick..tick + 1000 {
            agent.step(t, idle(t));
        }
        assert_eq!(agent.state().saved_clk_counter, 104);
        assert_eq!(agent.state().clk_counter, 1105);
    }

    #[test]
    fn disabled_agent_never_triggers() {
        let config = AgentConfiguration {
            single_event_probability: 1.0,
            report_probability: 1.0,
            ..AgentConfiguration::named("A1")
        };
        let mut agent = RocstarAgent::new(config, LATENCY, 16, 7).unwrap();
        for tick in 0..2000 {
            let symbol = agent.step(
                tick,
                AgentInbound {
                    symbol: ControllerSymbol::Idle(0).encode(),
                    coincidence: CoincidenceState {
                        active: true,
                        time_offset: 3,
                    },
                },
            );
            assert!(!symbol.is_trigger(), "tick {} triggered", tick);
        }
    }

    #[test]
    fn idle_frames_carry_latched_clock() {
        let mut agent = quiet_agent("A1", 0x0ff0);
        let mut value = 0u16;
        for tick in 0..4 {
            match agent.step(tick, idle(tick)).decode() {
                AgentSymbol::Idle { frame, nibble } => {
                    assert_eq!(frame as Tick, tick);
                    value |= (nibble as u16) << (4 * frame);
                }
                other => panic!("unexpected {}", other),
            }
        }
        // the clock at the first of the four frames
        assert_eq!(value, 0x0ff0);
        assert_eq!(agent.state().clk_counter, 0x0ff4);
    }

    #[test]
    fn coincidence_triggers_with_shared_offset() {
        let mut agent = quiet_agent("A1", 0);
        let tick = send_command(&mut agent, 0, SpecialCommand::Start);
        let symbol = agent.step(
            tick,
            AgentInbound {
                symbol: ControllerSymbol::Idle(0).encode(),
                coincidence: CoincidenceState {
                    active: true,
                    time_offset: -5,
                },
            },
        );
        assert_eq!(symbol.decode(), AgentSymbol::Trigger { offset: -5 });
        assert_eq!(agent.state().ticks_since_last_trigger, 0);
        assert_eq!(agent.state().word_history.back(1), Some(symbol));
    }

    #[test]
    fn delayed_coincidence_fires_next_tick() {
        let config = AgentConfiguration {
            single_event_probability: 0.0,
            report_probability: 1.0,
            delay_probability: 1.0,
            jitter: 0,
            ..AgentConfiguration::named("A1")
        };
        let mut agent = RocstarAgent::new(config, LATENCY, 16, 3).unwrap();
        let tick = send_command(&mut agent, 0, SpecialCommand::Start);
        let coincidence = AgentInbound {
            symbol: ControllerSymbol::Idle(0).encode(),
            coincidence: CoincidenceState {
                active: true,
                time_offset: 4,
            },
        };
        let first = agent.step(tick, coincidence);
        assert!(!first.is_trigger());
        assert_eq!(agent.state().pending_delayed_coincidence, Some(4));
        let second = agent.step(tick + 1, idle(tick + 1));
        assert_eq!(
            second.decode(),
            AgentSymbol::Trigger {
                offset: (4 - FINE_UNITS_PER_TICK) as i8
            }
        );
        assert_eq!(agent.state().pending_delayed_coincidence, None);
    }

    fn spacing_between_triggers(policy: MinIdlePolicy) -> Vec<Tick> {
        let config = AgentConfiguration {
            single_event_probability: 1.0,
            min_idle_ticks: 3,
            min_idle_policy: policy,
            ..AgentConfiguration::named("A1")
        };
        let mut agent = RocstarAgent::new(config, LATENCY, 16, 9).unwrap();
        let mut tick = send_command(&mut agent, 0, SpecialCommand::Start);
        let mut triggers = vec![];
        for _ in 0..20 {
            if agent.step(tick, idle(tick)).is_trigger() {
                triggers.push(tick);
            }
            tick += 1;
        }
        triggers.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn min_idle_spacing_policies() {
        // strict: more than 3 idle ticks between triggers
        let gaps = spacing_between_triggers(MinIdlePolicy::Strict);
        assert!(!gaps.is_empty());
        assert!(gaps.iter().all(|gap| *gap == 5), "{:?}", gaps);
        // inclusive: at least 3 idle ticks
        let gaps = spacing_between_triggers(MinIdlePolicy::Inclusive);
        assert!(!gaps.is_empty());
        assert!(gaps.iter().all(|gap| *gap == 4), "{:?}", gaps);
    }
}
