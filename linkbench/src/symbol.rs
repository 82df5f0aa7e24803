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

//! Symbols exchanged on a rocstar link, one per tick in each direction.
//!
//! Agent to controller (8 bits):
//!
//! ```text
//!   IDLE     0 f f h h 1 l l   f = frame (0..3), hhll = clock nibble `frame`
//!   TRIGGER  1 0 o o o o o o   o = signed 6-bit time offset
//! ```
//!
//! Controller to agent: a small enumerated set, see [`ControllerSymbol`].

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use crate::Error;

/// Number of fine time-offset units in one tick.
pub const FINE_UNITS_PER_TICK: i32 = 16;

pub const TRIGGER_OFFSET_MIN: i32 = -32;
pub const TRIGGER_OFFSET_MAX: i32 = 31;

/// Number of IDLE frames needed to carry a full 16-bit clock value.
pub const IDLE_FRAMES: u8 = 4;

const IDLE_TEMPLATE: u8 = 0b0000_0100;
const IDLE_MARKER: u8 = 0b0000_0100;
const TRIGGER_TEMPLATE: u8 = 0b1000_0000;
const TRIGGER_KIND_MASK: u8 = 0b1100_0000;
const TRIGGER_OFFSET_MASK: u8 = 0b0011_1111;

/// Raw byte driven by an agent onto its outbound wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Symbol(pub u8);

impl Symbol {
    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn decode(self) -> AgentSymbol {
        let byte = self.0;
        if byte & 0x80 == 0 {
            if byte & IDLE_MARKER == 0 {
                return AgentSymbol::Invalid(byte);
            }
            AgentSymbol::Idle {
                frame: (byte >> 5) & 0b11,
                nibble: ((byte >> 1) & 0b1100) | (byte & 0b11),
            }
        } else if byte & TRIGGER_KIND_MASK == TRIGGER_TEMPLATE {
            // sign-extend the 6-bit field
            let offset = (((byte & TRIGGER_OFFSET_MASK) << 2) as i8) >> 2;
            AgentSymbol::Trigger { offset }
        } else {
            AgentSymbol::Invalid(byte)
        }
    }

    pub fn is_trigger(self) -> bool {
        self.decode().is_trigger()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.decode())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentSymbol {
    Idle { frame: u8, nibble: u8 },
    Trigger { offset: i8 },
    Invalid(u8),
}

impl AgentSymbol {
    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger { .. })
    }
}

impl fmt::Display for AgentSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Idle { frame, nibble } => write!(f, "IDLE{}[{:x}]", frame, nibble),
            Self::Trigger { offset } => write!(f, "TRIGGER[{:+}]", offset),
            Self::Invalid(byte) => write!(f, "INVALID[{:#04x}]", byte),
        }
    }
}

/// Encode IDLE frame `frame` carrying the matching nibble of `clk_counter`.
pub fn encode_idle(frame: u8, clk_counter: u16) -> Symbol {
    debug_assert!(frame < IDLE_FRAMES);
    let frame = frame % IDLE_FRAMES;
    let start = 4 * frame as usize;
    let nibble = clk_counter.view_bits::<Lsb0>()[start..start + 4].load_le::<u8>();
    let high = nibble >> 2;
    let low = nibble & 0b11;
    Symbol(IDLE_TEMPLATE | (frame << 5) | (high << 3) | low)
}

/// Encode a TRIGGER, clamping `offset` to the representable range.
pub fn encode_trigger(offset: i32) -> Symbol {
    let clamped = offset.clamp(TRIGGER_OFFSET_MIN, TRIGGER_OFFSET_MAX) as i8;
    Symbol(TRIGGER_TEMPLATE | (clamped as u8 & TRIGGER_OFFSET_MASK))
}

/// Decode a raw agent byte; anything that is neither IDLE nor TRIGGER is
/// [`AgentSymbol::Invalid`].
pub fn decode_agent_symbol(byte: u8) -> AgentSymbol {
    Symbol(byte).decode()
}

/// Symbols emitted by the controller, one per tick on every agent's inbound
/// wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerSymbol {
    Idle(u8),
    /// The agent's trigger was matched by another agent's trigger.
    PositiveCoincidence,
    /// The agent's trigger was acknowledged without a partner.
    NegativeCoincidence,
    /// Start of a four-nibble special command.
    Special,
    Test(u8),
    /// Nibble carrier used while a special command is broadcast.
    Nibble(u8),
    Other(u8),
}

const CTRL_IDLE_BASE: u8 = 0x00;
const CTRL_PCOIN: u8 = 0x04;
const CTRL_NCOIN: u8 = 0x05;
const CTRL_SPECIAL: u8 = 0x06;
const CTRL_TEST_BASE: u8 = 0x10;
const CTRL_NIBBLE_BASE: u8 = 0x20;

impl ControllerSymbol {
    pub fn encode(self) -> u8 {
        match self {
            Self::Idle(frame) => CTRL_IDLE_BASE | (frame & 0b11),
            Self::PositiveCoincidence => CTRL_PCOIN,
            Self::NegativeCoincidence => CTRL_NCOIN,
            Self::Special => CTRL_SPECIAL,
            Self::Test(n) => CTRL_TEST_BASE | (n & 0x0f),
            Self::Nibble(n) => CTRL_NIBBLE_BASE | (n & 0x0f),
            Self::Other(byte) => byte,
        }
    }

    /// Either of the two coincidence reports.
    pub fn is_coincidence(&self) -> bool {
        matches!(self, Self::PositiveCoincidence | Self::NegativeCoincidence)
    }
}

impl fmt::Display for ControllerSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Idle(frame) => write!(f, "IDLE{}", frame),
            Self::PositiveCoincidence => write!(f, "PCOIN"),
            Self::NegativeCoincidence => write!(f, "NCOIN"),
            Self::Special => write!(f, "SPECIAL"),
            Self::Test(n) => write!(f, "TEST{:X}", n),
            Self::Nibble(n) => write!(f, "NIBBLE[{:x}]", n),
            Self::Other(byte) => write!(f, "OTHER[{:#04x}]", byte),
        }
    }
}

/// Map a raw controller byte onto the enumerated symbol set. Unknown bytes
/// are not an error; they decode to [`ControllerSymbol::Other`].
pub fn decode_controller_output(byte: u8) -> ControllerSymbol {
    match byte {
        0x00..=0x03 => ControllerSymbol::Idle(byte - CTRL_IDLE_BASE),
        CTRL_PCOIN => ControllerSymbol::PositiveCoincidence,
        CTRL_NCOIN => ControllerSymbol::NegativeCoincidence,
        CTRL_SPECIAL => ControllerSymbol::Special,
        0x10..=0x1f => ControllerSymbol::Test(byte & 0x0f),
        0x20..=0x2f => ControllerSymbol::Nibble(byte & 0x0f),
        _ => ControllerSymbol::Other(byte),
    }
}

/// Administrative commands broadcast by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SpecialCommand {
    Sync,
    Start,
    End,
    SaveClock,
}

impl SpecialCommand {
    pub const fn value(self) -> u16 {
        match self {
            Self::Sync => 0x1111,
            Self::Start => 0x2222,
            Self::End => 0x3333,
            Self::SaveClock => 0x4444,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1111 => Some(Self::Sync),
            0x2222 => Some(Self::Start),
            0x3333 => Some(Self::End),
            0x4444 => Some(Self::SaveClock),
            _ => None,
        }
    }

    /// The four nibbles in transmission order (most significant first).
    pub fn nibbles(self) -> [u8; 4] {
        let value = self.value();
        [
            (value >> 12) as u8 & 0x0f,
            (value >> 8) as u8 & 0x0f,
            (value >> 4) as u8 & 0x0f,
            value as u8 & 0x0f,
        ]
    }
}

impl TryFrom<u16> for SpecialCommand {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_u16(value).ok_or(Error::InvalidSpecialCommand(value))
    }
}

impl fmt::Display for SpecialCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Sync => "SYNC",
            Self::Start => "START",
            Self::End => "END",
            Self::SaveClock => "SAVE_CLOCK",
        };
        write!(f, "{}", name)
    }
}
