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

//! Host-side register bus of the controller.
//!
//! Both directions use the same fixed handshake: assert address, data and
//! strobe; deassert; settle. Addresses are validated before the first tick of
//! the handshake is spent.

use std::convert::TryFrom;
use std::fmt;

use crate::Error;

/// Ticks consumed by one bus read or write.
pub const BUS_HANDSHAKE_TICKS: u64 = 3;

const ID_ADDRESS: u16 = 0x0000;
const SCRATCH_ADDRESS: u16 = 0x0001;
const SPECIAL_COMMAND_ADDRESS: u16 = 0x0002;
const TEST_PATTERN_ADDRESS: u16 = 0x0003;
const COINCIDENCE_WINDOW_ADDRESS: u16 = 0x0004;
const SAVED_CLOCK_BASE: u16 = 0x0100;
const RECONSTRUCTED_CLOCK_BASE: u16 = 0x0200;
const AGENT_BLOCK_SIZE: u16 = 0x0100;

/// Agents addressable through the per-agent register blocks.
pub const MAX_AGENTS: usize = AGENT_BLOCK_SIZE as usize;

/// Identification word read back from address 0.
pub(crate) const CONTROLLER_ID: u16 = 0x1234;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    Id,
    Scratch,
    /// writing broadcasts a special command; reading returns the last one
    SpecialCommand,
    /// bit 4 enables TESTn on idle ticks, bits 3:0 select n
    TestPattern,
    CoincidenceWindow,
    SavedClock(usize),
    ReconstructedClock(usize),
}

impl Register {
    pub fn from_address(address: u16, agent_count: usize) -> Result<Self, Error> {
        let per_agent = |base: u16| -> Option<usize> {
            if address < base || address >= base + AGENT_BLOCK_SIZE {
                return None;
            }
            let index = (address - base) as usize;
            if index < agent_count {
                Some(index)
            } else {
                None
            }
        };
        let register = match address {
            ID_ADDRESS => Self::Id,
            SCRATCH_ADDRESS => Self::Scratch,
            SPECIAL_COMMAND_ADDRESS => Self::SpecialCommand,
            TEST_PATTERN_ADDRESS => Self::TestPattern,
            COINCIDENCE_WINDOW_ADDRESS => Self::CoincidenceWindow,
            _ => {
                if let Some(index) = per_agent(SAVED_CLOCK_BASE) {
                    Self::SavedClock(index)
                } else if let Some(index) = per_agent(RECONSTRUCTED_CLOCK_BASE) {
                    Self::ReconstructedClock(index)
                } else {
                    return Err(Error::InvalidAddress(address));
                }
            }
        };
        Ok(register)
    }

    /// Bus address of the register; per-agent registers only exist for the
    /// first [`MAX_AGENTS`] agents.
    pub fn address(self) -> Result<u16, Error> {
        let per_agent = |base: u16, index: usize| -> Result<u16, Error> {
            match u16::try_from(index) {
                Ok(offset) if offset < AGENT_BLOCK_SIZE => Ok(base + offset),
                _ => Err(Error::UnknownAgent(index)),
            }
        };
        match self {
            Self::Id => Ok(ID_ADDRESS),
            Self::Scratch => Ok(SCRATCH_ADDRESS),
            Self::SpecialCommand => Ok(SPECIAL_COMMAND_ADDRESS),
            Self::TestPattern => Ok(TEST_PATTERN_ADDRESS),
            Self::CoincidenceWindow => Ok(COINCIDENCE_WINDOW_ADDRESS),
            Self::SavedClock(index) => per_agent(SAVED_CLOCK_BASE, index),
            Self::ReconstructedClock(index) => per_agent(RECONSTRUCTED_CLOCK_BASE, index),
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Scratch | Self::SpecialCommand | Self::TestPattern | Self::CoincidenceWindow
        )
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Id => write!(f, "ID"),
            Self::Scratch => write!(f, "SCRATCH"),
            Self::SpecialCommand => write!(f, "SPECIAL_COMMAND"),
            Self::TestPattern => write!(f, "TEST_PATTERN"),
            Self::CoincidenceWindow => write!(f, "COINCIDENCE_WINDOW"),
            Self::SavedClock(index) => write!(f, "SAVED_CLOCK[{}]", index),
            Self::ReconstructedClock(index) => write!(f, "RECONSTRUCTED_CLOCK[{}]", index),
        }
    }
}

/// The host's view of the controller: 16-bit registers at 16-bit addresses.
/// Each access spends [`BUS_HANDSHAKE_TICKS`] ticks.
pub trait RegisterBus {
    fn write(&mut self, address: u16, data: u16) -> Result<(), Error>;
    fn read(&mut self, address: u16) -> Result<u16, Error>;
}
