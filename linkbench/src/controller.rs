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

//! Behavioural model of the controller, the design the agents exercise.
//!
//! Every tick the controller drives one byte towards each agent (`emit`) and
//! then receives one symbol from each agent (`ingest`). A symbol ingested at
//! tick `t` is classified once tick `t + 1` has been ingested, so that
//! triggers on neighbouring ticks can be paired, and the answer is driven at
//! tick `t + latency`.

use log::{debug, info, trace};
use std::collections::VecDeque;
use std::convert::TryFrom;

use crate::bus::CONTROLLER_ID;
use crate::history::WrapAroundCounter;
use crate::symbol::{FINE_UNITS_PER_TICK, IDLE_FRAMES};
use crate::{
    AgentSymbol, ControllerSymbol, Error, LinkConfiguration, Register, SpecialCommand, Symbol,
    Tick,
};

const TEST_PATTERN_ENABLE: u16 = 0x0010;
const TEST_PATTERN_MASK: u16 = 0x001f;

/// Ticks kept for partner search: the decided tick and one on either side.
const PAIRING_SPAN: usize = 3;

/// Reassembles the 16-bit clock an agent serializes over four IDLE frames.
#[derive(Clone, Debug, Default)]
struct ClockAssembler {
    partial: u16,
    first_frame_tick: Tick,
    next_frame: Option<u8>,
    /// last complete value and the tick its first frame was received
    latched: Option<(u16, Tick)>,
}

impl ClockAssembler {
    fn push(&mut self, tick: Tick, frame: u8, nibble: u8) {
        if frame == 0 {
            self.partial = nibble as u16;
            self.first_frame_tick = tick;
            self.next_frame = Some(1);
            return;
        }
        if self.next_frame != Some(frame) {
            self.next_frame = None;
            return;
        }
        self.partial |= (nibble as u16) << (4 * frame);
        if frame + 1 == IDLE_FRAMES {
            self.latched = Some((self.partial, self.first_frame_tick));
            self.next_frame = None;
        } else {
            self.next_frame = Some(frame + 1);
        }
    }

    /// The agent's counter as it reads at the start of tick `now`.
    fn estimate(&self, now: Tick) -> Option<u16> {
        self.latched
            .map(|(value, tick)| value.wrapping_add(now.wrapping_sub(tick) as u16))
    }
}

pub struct ControllerModel {
    agent_count: usize,
    latency: usize,
    coincidence_window: u16,
    idle_frame: WrapAroundCounter,
    scratch: u16,
    test_pattern: u16,
    last_command: u16,
    commands: VecDeque<SpecialCommand>,
    broadcast: VecDeque<u8>,
    /// decoded symbols of the last few ticks, oldest first
    recent: VecDeque<(Tick, Vec<AgentSymbol>)>,
    /// per-agent answers and the tick they are due on
    decisions: VecDeque<(Tick, Vec<Option<ControllerSymbol>>)>,
    clocks: Vec<ClockAssembler>,
    /// number of completed ticks
    now: Tick,
    dropped: u64,
}

impl ControllerModel {
    pub fn new(link: &LinkConfiguration, agent_count: usize) -> Self {
        Self {
            agent_count,
            latency: link.latency,
            coincidence_window: link.coincidence_window,
            idle_frame: WrapAroundCounter::new(IDLE_FRAMES as usize),
            scratch: 0,
            test_pattern: 0,
            last_command: 0,
            commands: VecDeque::new(),
            broadcast: VecDeque::new(),
            recent: VecDeque::with_capacity(PAIRING_SPAN),
            decisions: VecDeque::new(),
            clocks: vec![ClockAssembler::default(); agent_count],
            now: 0,
            dropped: 0,
        }
    }

    pub fn latency(&self) -> usize {
        self.latency
    }

    pub fn coincidence_window(&self) -> u16 {
        self.coincidence_window
    }

    /// Whether a special command is being transmitted or waits to be.
    pub fn is_broadcasting(&self) -> bool {
        !self.broadcast.is_empty() || !self.commands.is_empty()
    }

    /// Coincidence answers that fell due during a broadcast and were never
    /// sent.
    pub fn dropped_decisions(&self) -> u64 {
        self.dropped
    }

    /// Queue a special command for the next transmission window.
    pub fn send_command(&mut self, command: SpecialCommand) {
        info!("controller queues {}", command);
        self.last_command = command.value();
        self.commands.push_back(command);
    }

    /// The counter of agent `index` as reconstructed from its IDLE frames,
    /// projected to the current tick.
    pub fn reconstructed_clock(&self, index: usize) -> Option<u16> {
        self.clocks
            .get(index)
            .and_then(|clock| clock.estimate(self.now))
    }

    pub fn write_register(&mut self, register: Register, data: u16) -> Result<(), Error> {
        match register {
            Register::Scratch => self.scratch = data,
            Register::SpecialCommand => self.send_command(SpecialCommand::try_from(data)?),
            Register::TestPattern => self.test_pattern = data & TEST_PATTERN_MASK,
            Register::CoincidenceWindow => self.coincidence_window = data,
            _ => return Err(Error::ReadOnlyRegister(register.address()?)),
        }
        debug!("controller {} <- {:#06x}", register, data);
        Ok(())
    }

    /// Read a controller register. Saved clocks live in the agents and are not
    /// visible here.
    pub fn read_register(&self, register: Register) -> Result<u16, Error> {
        let value = match register {
            Register::Id => CONTROLLER_ID,
            Register::Scratch => self.scratch,
            Register::SpecialCommand => self.last_command,
            Register::TestPattern => self.test_pattern,
            Register::CoincidenceWindow => self.coincidence_window,
            Register::ReconstructedClock(index) => {
                if index >= self.agent_count {
                    return Err(Error::UnknownAgent(index));
                }
                self.reconstructed_clock(index).unwrap_or(0)
            }
            Register::SavedClock(_) => return Err(Error::InvalidAddress(register.address()?)),
        };
        Ok(value)
    }

    fn idle_symbol(&self) -> ControllerSymbol {
        let frame = self.idle_frame.value() as u8;
        if self.test_pattern & TEST_PATTERN_ENABLE != 0 {
            ControllerSymbol::Test((self.test_pattern & 0x0f) as u8)
        } else {
            ControllerSymbol::Idle(frame)
        }
    }

    /// Bytes driven towards each agent during `tick`.
    pub fn emit(&mut self, tick: Tick) -> Vec<u8> {
        let due = if self.decisions.front().map_or(false, |(due, _)| *due <= tick) {
            self.decisions.pop_front().map(|(_, decisions)| decisions)
        } else {
            None
        };

        if self.broadcast.is_empty() && self.idle_frame.test() {
            if let Some(command) = self.commands.pop_front() {
                debug!("tick {}: controller broadcasts {}", tick, command);
                self.broadcast.push_back(ControllerSymbol::Special.encode());
                self.broadcast.extend(
                    command
                        .nibbles()
                        .iter()
                        .map(|nibble| ControllerSymbol::Nibble(*nibble).encode()),
                );
            }
        }
        if let Some(byte) = self.broadcast.pop_front() {
            if let Some(decisions) = due {
                let lost = decisions.iter().filter(|d| d.is_some()).count() as u64;
                if lost > 0 {
                    debug!(
                        "tick {}: {} coincidence answers fall into a broadcast",
                        tick, lost
                    );
                    self.dropped += lost;
                }
            }
            return vec![byte; self.agent_count];
        }

        let idle = self.idle_symbol().encode();
        self.idle_frame.advance();
        match due {
            Some(decisions) => decisions
                .into_iter()
                .map(|decision| decision.map_or(idle, ControllerSymbol::encode))
                .collect(),
            None => vec![idle; self.agent_count],
        }
    }

    /// Symbols received from the agents during `tick`, in agent order.
    pub fn ingest(&mut self, tick: Tick, symbols: &[Symbol]) {
        debug_assert_eq!(symbols.len(), self.agent_count);
        let decoded: Vec<AgentSymbol> = symbols.iter().map(|s| s.decode()).collect();
        for (index, symbol) in decoded.iter().enumerate() {
            match symbol {
                AgentSymbol::Idle { frame, nibble } => self.clocks[index].push(tick, *frame, *nibble),
                AgentSymbol::Trigger { offset } => {
                    trace!("tick {}: controller got trigger {:+} from {}", tick, offset, index)
                }
                AgentSymbol::Invalid(byte) => {
                    debug!(
                        "tick {}: controller got invalid symbol {:#04x} from {}",
                        tick, byte, index
                    )
                }
            }
        }
        if self.recent.len() == PAIRING_SPAN {
            self.recent.pop_front();
        }
        self.recent.push_back((tick, decoded));
        self.now = tick + 1;

        if self.recent.len() >= 2 {
            let decided_tick = self.recent[self.recent.len() - 2].0;
            let decisions = self.decide(self.recent.len() - 2);
            if decisions.iter().any(Option::is_some) {
                self.decisions
                    .push_back((decided_tick + self.latency as Tick, decisions));
            }
        }
    }

    fn fine_time(tick: Tick, offset: i8) -> i64 {
        tick as i64 * FINE_UNITS_PER_TICK as i64 + offset as i64
    }

    /// Classify every trigger of the entry at `position` in `recent`.
    fn decide(&self, position: usize) -> Vec<Option<ControllerSymbol>> {
        let (tick, symbols) = &self.recent[position];
        let window = self.coincidence_window as i64;
        symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| {
                let offset = match symbol {
                    AgentSymbol::Trigger { offset } => *offset,
                    _ => return None,
                };
                let fine = Self::fine_time(*tick, offset);
                let paired = self.recent.iter().any(|(other_tick, others)| {
                    others.iter().enumerate().any(|(other, symbol)| match symbol {
                        AgentSymbol::Trigger { offset } if other != index => {
                            (Self::fine_time(*other_tick, *offset) - fine).abs() <= window
                        }
                        _ => false,
                    })
                });
                Some(if paired {
                    ControllerSymbol::PositiveCoincidence
                } else {
                    ControllerSymbol::NegativeCoincidence
                })
            })
            .collect()
    }
}
