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

//! DS2411 silicon serial number on a 1-Wire bus, one tick per microsecond.
//!
//! The line is open drain: the slave only ever pulls it low. Its inbound
//! symbol is the level the master drives, its outbound symbol whether it
//! pulls the line low during that tick.

use bitvec::prelude::*;
use log::{debug, trace, warn};
use std::fmt;

use crate::{Peripheral, Tick};

const FAMILY_CODE: u8 = 0x01;
const SERIAL_MASK: u64 = 0xffff_ffff_ffff;
const READ_ROM: u8 = 0x33;
const ROM_BITS: usize = 64;

/// Minimum master low time recognised as a reset pulse.
const RESET_LOW_MIN: u32 = 480;
const PRESENCE_DELAY: u32 = 30;
const PRESENCE_LEN: u32 = 120;
/// Slave samples a write slot this long after its falling edge.
const WRITE_SAMPLE: Tick = 30;
/// Slave holds a zero this long after a read slot's falling edge.
const READ_HOLD: Tick = 30;

const RESET_PULSE: u32 = 500;
const PRESENCE_WINDOW: u32 = 240;
const SLOT_TICKS: u32 = 62;
const WRITE_ONE_LOW: u32 = 6;
const WRITE_ZERO_LOW: u32 = 60;
const READ_LOW: u32 = 2;
const READ_SAMPLE: u32 = 12;

/// Dallas/Maxim CRC-8 (x^8 + x^5 + x^4 + 1), bits processed LSB first.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, byte| {
        byte.view_bits::<Lsb0>().iter().fold(crc, |crc, bit| {
            let mix = (crc & 1 == 1) ^ *bit;
            let crc = crc >> 1;
            if mix {
                crc ^ 0x8c
            } else {
                crc
            }
        })
    })
}

/// 64-bit registration number: family code, 48-bit serial, CRC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RomCode(pub u64);

impl RomCode {
    pub fn new(serial: u64) -> Self {
        let body = FAMILY_CODE as u64 | (serial & SERIAL_MASK) << 8;
        let crc = crc8(&body.to_le_bytes()[..7]);
        Self(body | (crc as u64) << 56)
    }

    pub fn family(self) -> u8 {
        self.0 as u8
    }

    pub fn serial(self) -> u64 {
        (self.0 >> 8) & SERIAL_MASK
    }

    pub fn crc(self) -> u8 {
        (self.0 >> 56) as u8
    }

    pub fn is_valid(self) -> bool {
        crc8(&self.0.to_le_bytes()[..7]) == self.crc()
    }
}

impl fmt::Display for RomCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}-{:012x}-{:02x}",
            self.family(),
            self.serial(),
            self.crc()
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneWireState {
    /// waiting for a reset pulse
    Idle,
    PresenceDelay(u32),
    Presence(u32),
    Command,
    ReadRom,
}

pub struct Ds2411 {
    name: String,
    rom: RomCode,
    state: OneWireState,
    last_level: bool,
    low_ticks: u32,
    slot_start: Option<Tick>,
    command: u8,
    command_bits: u32,
    rom_bit: usize,
}

impl Ds2411 {
    pub fn new(name: &str, serial: u64) -> Self {
        Self {
            name: name.to_owned(),
            rom: RomCode::new(serial),
            state: OneWireState::Idle,
            last_level: true,
            low_ticks: 0,
            slot_start: None,
            command: 0,
            command_bits: 0,
            rom_bit: 0,
        }
    }

    pub fn rom(&self) -> RomCode {
        self.rom
    }

    pub fn state(&self) -> OneWireState {
        self.state
    }

    fn sample_command_bit(&mut self, tick: Tick, level: bool) {
        self.command |= (level as u8) << self.command_bits;
        self.command_bits += 1;
        if self.command_bits < 8 {
            return;
        }
        if self.command == READ_ROM {
            debug!("tick {}: {} sends ROM {}", tick, self.name, self.rom);
            self.rom_bit = 0;
            self.state = OneWireState::ReadRom;
        } else {
            warn!(
                "tick {}: {} ignores command {:#04x}",
                tick, self.name, self.command
            );
            self.state = OneWireState::Idle;
        }
    }
}

impl Peripheral for Ds2411 {
    type Inbound = bool;
    type Outbound = bool;

    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, tick: Tick, master_high: bool) -> bool {
        let falling = self.last_level && !master_high;
        self.last_level = master_high;
        if !master_high {
            self.low_ticks += 1;
        } else {
            let reset = self.low_ticks >= RESET_LOW_MIN;
            self.low_ticks = 0;
            if reset {
                trace!("tick {}: {} reset", tick, self.name);
                self.slot_start = None;
                self.state = OneWireState::PresenceDelay(PRESENCE_DELAY);
                return false;
            }
        }

        match self.state {
            OneWireState::Idle => false,
            OneWireState::PresenceDelay(remaining) => {
                self.state = if remaining <= 1 {
                    OneWireState::Presence(PRESENCE_LEN)
                } else {
                    OneWireState::PresenceDelay(remaining - 1)
                };
                false
            }
            OneWireState::Presence(remaining) => {
                if remaining <= 1 {
                    self.command = 0;
                    self.command_bits = 0;
                    self.state = OneWireState::Command;
                } else {
                    self.state = OneWireState::Presence(remaining - 1);
                }
                true
            }
            OneWireState::Command => {
                if falling {
                    self.slot_start = Some(tick);
                }
                if self.slot_start.map(|start| start + WRITE_SAMPLE) == Some(tick) {
                    self.slot_start = None;
                    self.sample_command_bit(tick, master_high);
                }
                false
            }
            OneWireState::ReadRom => {
                if falling {
                    self.slot_start = Some(tick);
                }
                match self.slot_start {
                    Some(start) if tick < start + READ_HOLD => {
                        !self.rom.0.view_bits::<Lsb0>()[self.rom_bit]
                    }
                    Some(_) => {
                        self.slot_start = None;
                        self.rom_bit += 1;
                        if self.rom_bit == ROM_BITS {
                            self.state = OneWireState::Idle;
                        }
                        false
                    }
                    None => false,
                }
            }
        }
    }
}

/// Bus master performing reset, command and ROM read against one slave.
pub struct OneWireReader<'a, P> {
    slave: &'a mut P,
    tick: Tick,
}

impl<'a, P> OneWireReader<'a, P>
where
    P: Peripheral<Inbound = bool, Outbound = bool>,
{
    pub fn new(slave: &'a mut P, tick: Tick) -> Self {
        Self { slave, tick }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Drive one tick; returns the resulting line level.
    fn drive(&mut self, master_high: bool) -> bool {
        let pulled = self.slave.step(self.tick, master_high);
        self.tick += 1;
        master_high && !pulled
    }

    /// Reset pulse; true when a presence pulse answered it.
    pub fn reset(&mut self) -> bool {
        for _ in 0..RESET_PULSE {
            self.drive(false);
        }
        let mut presence = false;
        for _ in 0..PRESENCE_WINDOW {
            presence |= !self.drive(true);
        }
        presence
    }

    pub fn write_bit(&mut self, bit: bool) {
        let low = if bit { WRITE_ONE_LOW } else { WRITE_ZERO_LOW };
        for i in 0..SLOT_TICKS {
            self.drive(i >= low);
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        for bit in byte.view_bits::<Lsb0>().iter() {
            self.write_bit(*bit);
        }
    }

    pub fn read_bit(&mut self) -> bool {
        let mut value = true;
        for i in 0..SLOT_TICKS {
            let level = self.drive(i >= READ_LOW);
            if i == READ_SAMPLE {
                value = level;
            }
        }
        value
    }

    /// Full READ ROM transaction; `None` when no slave answered the reset.
    pub fn read_rom(&mut self) -> Option<RomCode> {
        if !self.reset() {
            return None;
        }
        self.write_byte(READ_ROM);
        let mut rom = 0u64;
        for bit in 0..ROM_BITS {
            if self.read_bit() {
                rom |= 1 << bit;
            }
        }
        Some(RomCode(rom))
    }
}
