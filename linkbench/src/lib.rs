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

mod agent;
mod bus;
mod checker;
mod coincidence;
mod config;
mod controller;
mod error;
mod history;
mod sim;
pub mod specs;
pub mod symbol;
mod vcd;

// emulators for the single-peer sibling protocols (SPI, 1-Wire)
pub mod peripherals;

// Public types
// type to use for ticks
pub type Tick = u64;

pub use crate::agent::{AgentInbound, AgentState, AppliedCommand, LinkState, RocstarAgent};
pub use crate::bus::{Register, RegisterBus, BUS_HANDSHAKE_TICKS, MAX_AGENTS};
pub use crate::checker::{CheckFailure, CheckTally, LinkChecker};
pub use crate::coincidence::{CoincidenceSource, CoincidenceState};
pub use crate::config::{
    AgentConfiguration, BenchConfiguration, CoincidenceConfiguration, LinkConfiguration,
    MinIdlePolicy,
};
pub use crate::controller::ControllerModel;
pub use crate::error::Error;
pub use crate::history::WordHistory;
pub use crate::sim::{run_session, AgentId, Bench, CancellationToken, Report};
pub use crate::specs::Peripheral;
pub use crate::symbol::{
    decode_agent_symbol, decode_controller_output, encode_idle, encode_trigger, AgentSymbol,
    ControllerSymbol, SpecialCommand, Symbol,
};
pub use crate::vcd::VcdWriter;
