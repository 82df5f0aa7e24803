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

//! Single-peer chip emulators stepped once per tick, plus the host-side
//! drivers that talk to them.

pub mod adt7320;
pub mod ds2411;

pub use adt7320::{Adt7320, SpiPins, SpiReader, SpiState};
pub use ds2411::{crc8, Ds2411, OneWireReader, OneWireState, RomCode};
