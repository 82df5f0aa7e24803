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

//! interface shared by every emulated peripheral

use crate::Tick;

/// A peripheral is a local state machine advanced exactly once per tick.
///
/// Each step consumes what the peer drives on the inbound wire(s) during
/// that tick and returns what the peripheral drives back. Peripherals never
/// look at wall-clock time and keep all their state private; anything the
/// bench wants to inspect is exposed through accessors on the concrete type.
pub trait Peripheral {
    /// what the peer drives towards the peripheral each tick
    type Inbound;

    /// what the peripheral drives back each tick
    type Outbound;

    /// name used in logs and traces
    fn name(&self) -> &str;

    /// advance the local state machine by one tick
    fn step(&mut self, tick: Tick, inbound: Self::Inbound) -> Self::Outbound;
}
