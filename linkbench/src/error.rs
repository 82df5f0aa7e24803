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

use std::fmt;

/// Errors surfaced to the orchestrator.
///
/// Everything here is raised at configuration time (or when a run is
/// cancelled); protocol violations observed while ticking are tallied by the
/// link checkers and only become an error when the final report is turned
/// into a result.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidAddress(u16),
    ReadOnlyRegister(u16),
    InvalidSpecialCommand(u16),
    InvalidLatency(usize),
    InvalidHistoryDepth { depth: usize, latency: usize },
    InvalidConfiguration(String),
    UnknownAgent(usize),
    Io(String),
    ProtocolViolations { passed: u64, failed: u64 },
    /// The run was cancelled through its token. Not a failure: callers are
    /// expected to stop quietly and discard any partial tally.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidAddress(addr) => {
                write!(f, "ERROR: Invalid register address {:#06x}", addr)
            }
            Self::ReadOnlyRegister(addr) => {
                write!(f, "ERROR: Register {:#06x} is read-only", addr)
            }
            Self::InvalidSpecialCommand(value) => {
                write!(f, "ERROR: {:#06x} is not a special command", value)
            }
            Self::InvalidLatency(latency) => {
                write!(f, "ERROR: Invalid link latency {} (must be >= 2)", latency)
            }
            Self::InvalidHistoryDepth { depth, latency } => {
                write!(
                    f,
                    "ERROR: History depth {} cannot cover latency {}",
                    depth, latency
                )
            }
            Self::InvalidConfiguration(reason) => {
                write!(f, "ERROR: Invalid configuration: {}", reason)
            }
            Self::UnknownAgent(index) => write!(f, "ERROR: No agent with index {}", index),
            Self::Io(reason) => write!(f, "ERROR: I/O failure: {}", reason),
            Self::ProtocolViolations { passed, failed } => {
                write!(f, "checks: {} ok, {} failed", passed, failed)
            }
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}
