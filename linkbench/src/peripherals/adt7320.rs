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

//! ADT7320 temperature sensor on a 4-wire SPI bus.
//!
//! The chip samples `din` on rising `sclk` and updates `dout` while `sclk` is
//! low. A command byte `0 R a a a 0 0 0` with `R = 1` reads the 16-bit
//! register `aaa`; the response is shifted out most significant bit first.

use log::{debug, trace, warn};

use crate::{Peripheral, Tick};

const STATUS_REGISTER: u16 = 0x8000;
const CONFIG_REGISTER: u16 = 0x0000;
const DEFAULT_TEMPERATURE: u16 = 0x1234;
const ID_REGISTER: u16 = 0xc300;

const COMMAND_BITS: u32 = 8;
const RESPONSE_END: u32 = COMMAND_BITS + 16;
/// The chip ignores the bus until this count is reached after a response.
const QUIET_COUNT: u32 = 100;

const READ_FLAG: u8 = 0x40;

/// Levels the host drives each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpiPins {
    pub cs_n: bool,
    pub sclk: bool,
    pub din: bool,
}

impl Default for SpiPins {
    fn default() -> Self {
        Self {
            cs_n: true,
            sclk: true,
            din: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpiState {
    Idle,
    /// waiting for `sclk` low before the next command bit
    Command,
    /// waiting for `sclk` high to sample the command bit
    CommandShift,
    PreResponse,
    Response,
    ResponseShift,
    PostResponse,
}

pub struct Adt7320 {
    name: String,
    registers: [u16; 4],
    state: SpiState,
    count: u32,
    command: u8,
    response: u16,
    dout: bool,
}

impl Adt7320 {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            registers: [
                STATUS_REGISTER,
                CONFIG_REGISTER,
                DEFAULT_TEMPERATURE,
                ID_REGISTER,
            ],
            state: SpiState::Idle,
            count: 0,
            command: 0,
            response: 0,
            dout: true,
        }
    }

    /// Raw value of the temperature register.
    pub fn set_temperature(&mut self, raw: u16) {
        self.registers[2] = raw;
    }

    pub fn state(&self) -> SpiState {
        self.state
    }

    fn decode_command(&mut self, tick: Tick) -> SpiState {
        let read = (self.command >> 6) & 1 == 1;
        let address = ((self.command >> 3) & 7) as usize;
        match self.registers.get(address) {
            Some(value) if read => {
                debug!(
                    "tick {}: {} read register {} -> {:#06x}",
                    tick, self.name, address, value
                );
                self.response = *value;
                SpiState::Response
            }
            _ => {
                warn!(
                    "tick {}: {} ignores command {:#04x}",
                    tick, self.name, self.command
                );
                SpiState::Idle
            }
        }
    }
}

impl Peripheral for Adt7320 {
    type Inbound = SpiPins;
    type Outbound = bool;

    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, tick: Tick, pins: SpiPins) -> bool {
        let next = match self.state {
            SpiState::Idle => {
                self.dout = true;
                if !pins.cs_n {
                    self.count = 0;
                    self.command = 0;
                    SpiState::Command
                } else {
                    SpiState::Idle
                }
            }
            SpiState::Command => {
                self.dout = false;
                if !pins.sclk {
                    self.count += 1;
                    SpiState::CommandShift
                } else {
                    SpiState::Command
                }
            }
            SpiState::CommandShift => {
                if pins.sclk {
                    self.command = (self.command << 1) | pins.din as u8;
                    if self.count == COMMAND_BITS {
                        SpiState::PreResponse
                    } else {
                        SpiState::Command
                    }
                } else {
                    SpiState::CommandShift
                }
            }
            SpiState::PreResponse => self.decode_command(tick),
            SpiState::Response => {
                if !pins.sclk {
                    self.dout = (self.response >> 15) & 1 == 1;
                    self.count += 1;
                    SpiState::ResponseShift
                } else {
                    SpiState::Response
                }
            }
            SpiState::ResponseShift => {
                if pins.sclk {
                    self.response <<= 1;
                    if self.count == RESPONSE_END {
                        SpiState::PostResponse
                    } else {
                        SpiState::Response
                    }
                } else {
                    SpiState::ResponseShift
                }
            }
            SpiState::PostResponse => {
                self.count += 1;
                if self.count == QUIET_COUNT {
                    SpiState::Idle
                } else {
                    SpiState::PostResponse
                }
            }
        };
        if next != self.state {
            trace!("tick {}: {} {:?} -> {:?}", tick, self.name, self.state, next);
        }
        self.state = next;
        self.dout
    }
}

/// Host side of the bus: bit-bangs a register read.
pub struct SpiReader {
    half_period: u32,
    quiet_ticks: u32,
}

impl Default for SpiReader {
    fn default() -> Self {
        Self {
            half_period: 2,
            quiet_ticks: 80,
        }
    }
}

impl SpiReader {
    /// Read register `address` from `chip`, starting at `tick`; `tick` is
    /// advanced past the transfer and the following quiet period.
    pub fn read_register<P>(&self, chip: &mut P, tick: &mut Tick, address: u8) -> u16
    where
        P: Peripheral<Inbound = SpiPins, Outbound = bool>,
    {
        let mut drive = |pins: SpiPins| {
            let dout = chip.step(*tick, pins);
            *tick += 1;
            dout
        };
        let command = READ_FLAG | ((address & 7) << 3);
        let selected = |sclk: bool, din: bool| SpiPins {
            cs_n: false,
            sclk,
            din,
        };

        drive(selected(true, false));
        for bit in (0..COMMAND_BITS).rev() {
            let din = (command >> bit) & 1 == 1;
            for _ in 0..self.half_period {
                drive(selected(false, din));
            }
            for _ in 0..self.half_period {
                drive(selected(true, din));
            }
        }
        // let the chip decode the command
        drive(selected(true, false));

        let mut value = 0u16;
        for _ in 0..16 {
            for _ in 0..self.half_period {
                drive(selected(false, false));
            }
            let sampled = drive(selected(true, false));
            for _ in 1..self.half_period {
                drive(selected(true, false));
            }
            value = (value << 1) | sampled as u16;
        }
        for _ in 0..self.quiet_ticks {
            drive(SpiPins::default());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_every_register() {
        let mut chip = Adt7320::new("adt7320");
        let reader = SpiReader::default();
        let mut tick = 0;
        assert_eq!(reader.read_register(&mut chip, &mut tick, 0), 0x8000);
        assert_eq!(reader.read_register(&mut chip, &mut tick, 1), 0x0000);
        assert_eq!(reader.read_register(&mut chip, &mut tick, 2), 0x1234);
        assert_eq!(reader.read_register(&mut chip, &mut tick, 3), 0xc300);
        assert_eq!(chip.state(), SpiState::Idle);
    }

    #[test]
    fn temperature_follows_the_sensor() {
        let mut chip = Adt7320::new("adt7320");
        chip.set_temperature(0x0c80);
        let mut tick = 0;
        assert_eq!(
            SpiReader::default().read_register(&mut chip, &mut tick, 2),
            0x0c80
        );
    }

    #[test]
    fn idle_chip_drives_dout_high() {
        let mut chip = Adt7320::new("adt7320");
        assert!((0..10).all(|tick| chip.step(tick, SpiPins::default())));
        let selected = SpiPins {
            cs_n: false,
            ..Default::default()
        };
        chip.step(10, selected);
        assert_eq!(chip.state(), SpiState::Command);
        // dout drops once the command phase is running
        assert!(!chip.step(11, selected));
    }

    #[test]
    fn unknown_register_returns_to_idle() {
        let mut chip = Adt7320::new("adt7320");
        let mut tick = 0;
        let mut drive = |pins: SpiPins| {
            chip.step(tick, pins);
            tick += 1;
        };
        // write command to register 2: R = 0
        let command: u8 = 0x10;
        drive(SpiPins {
            cs_n: false,
            ..Default::default()
        });
        for bit in (0..8).rev() {
            let din = (command >> bit) & 1 == 1;
            drive(SpiPins {
                cs_n: false,
                sclk: false,
                din,
            });
            drive(SpiPins {
                cs_n: false,
                sclk: true,
                din,
            });
        }
        drive(SpiPins::default());
        assert_eq!(chip.state(), SpiState::Idle);
    }
}
