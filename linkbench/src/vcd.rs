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

use bitvec::prelude::*;
use std::collections::HashMap;
use std::io;
use std::io::Write;

use crate::{LinkState, Symbol, Tick};

pub const DEFAULT_TOP_MODULE: &str = "rocstar";
const DEFAULT_VCD_HEADER: &str = "rocstar link bench VCD";
const SYMBOL_WIDTH: usize = 8;
const TICK_WIDTH: usize = 64;
const LINK_STATE_WIDTH: usize = 3;

fn link_state_code(state: LinkState) -> u64 {
    match state {
        LinkState::IdleLink => 0,
        LinkState::Special1 => 1,
        LinkState::Special2 => 2,
        LinkState::Special3 => 3,
        LinkState::Special4 => 4,
    }
}

struct AgentSignals {
    tx: vcd::IdCode,
    rx: vcd::IdCode,
    link_state: vcd::IdCode,
}

/// Traces the symbols on every link, one VCD timestamp per tick.
///
/// Write errors are logged once and then tracing is switched off; they never
/// disturb the simulation.
pub struct VcdWriter<W: Write> {
    writer: vcd::Writer<W>,
    is_error_state: bool,
    tick_id: Option<vcd::IdCode>,
    agents: Vec<AgentSignals>,
    last_value_map: HashMap<vcd::IdCode, u64>,
}

impl<W: Write> VcdWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: vcd::Writer::new(writer),
            is_error_state: false,
            tick_id: None,
            agents: vec![],
            last_value_map: HashMap::new(),
        }
    }

    pub fn is_error_state(&self) -> bool {
        self.is_error_state
    }

    fn vcd_error_handler(&mut self, err: io::Error) {
        if !self.is_error_state {
            self.is_error_state = true;
            log::error!("VCD writing failed with error {:?}", err)
        }
    }

    /// Declare the tick counter and the per-agent signals.
    pub fn write_header<S: AsRef<str>>(&mut self, agent_names: &[S]) {
        if self.is_error_state {
            return;
        }
        self._write_header(agent_names)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _write_header<S: AsRef<str>>(&mut self, agent_names: &[S]) -> io::Result<()> {
        self.writer.comment(DEFAULT_VCD_HEADER)?;
        self.writer.date(chrono::Utc::now().to_string().as_str())?;
        self.writer.add_module(DEFAULT_TOP_MODULE)?;
        self.tick_id = Some(
            self.writer
                .add_var(vcd::VarType::Integer, TICK_WIDTH as u32, "tick", None)?,
        );
        for name in agent_names {
            self.writer.add_module(name.as_ref())?;
            let tx = self
                .writer
                .add_var(vcd::VarType::Wire, SYMBOL_WIDTH as u32, "tx", None)?;
            let rx = self
                .writer
                .add_var(vcd::VarType::Wire, SYMBOL_WIDTH as u32, "rx", None)?;
            let link_state = self.writer.add_var(
                vcd::VarType::Reg,
                LINK_STATE_WIDTH as u32,
                "link_state",
                None,
            )?;
            self.writer.upscope()?;
            self.agents.push(AgentSignals { tx, rx, link_state });
        }
        self.writer.upscope()?;
        self.writer.enddefinitions()
    }

    /// Record the bytes exchanged on every link during `tick`.
    pub fn record(&mut self, tick: Tick, tx: &[Symbol], rx: &[u8], states: &[LinkState]) {
        if self.is_error_state {
            return;
        }
        self._record(tick, tx, rx, states)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _record(
        &mut self,
        tick: Tick,
        tx: &[Symbol],
        rx: &[u8],
        states: &[LinkState],
    ) -> io::Result<()> {
        self.writer.timestamp(tick)?;
        if let Some(tick_id) = self.tick_id {
            self.record_change(tick_id, TICK_WIDTH, tick)?;
        }
        let changes: Vec<(vcd::IdCode, usize, u64)> = self
            .agents
            .iter()
            .zip(tx.iter().zip(rx.iter().zip(states.iter())))
            .flat_map(|(signals, (tx, (rx, state)))| {
                vec![
                    (signals.tx, SYMBOL_WIDTH, tx.bits() as u64),
                    (signals.rx, SYMBOL_WIDTH, *rx as u64),
                    (signals.link_state, LINK_STATE_WIDTH, link_state_code(*state)),
                ]
            })
            .collect();
        for (id_code, width, value) in changes {
            self.record_change(id_code, width, value)?;
        }
        Ok(())
    }

    fn record_change(&mut self, id_code: vcd::IdCode, width: usize, value: u64) -> io::Result<()> {
        if self.last_value_map.get(&id_code) == Some(&value) {
            return Ok(());
        }
        let bits: Vec<vcd::Value> = value.view_bits::<Lsb0>()[..width]
            .iter()
            .rev()
            .map(|b| (*b).into())
            .collect();
        self.writer.change_vector(id_code, bits.as_slice())?;
        self.last_value_map.insert(id_code, value);
        Ok(())
    }

    /// Close the trace with a final timestamp.
    pub fn finish(&mut self, tick: Tick) {
        if self.is_error_state {
            return;
        }
        self.writer
            .timestamp(tick)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_trigger;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn trace_shape() {
        let buffer = SharedBuffer::default();
        let mut writer = VcdWriter::new(buffer.clone());
        writer.write_header(&["A1", "B1"]);
        writer.record(
            0,
            &[Symbol(0x04), Symbol(0x04)],
            &[0x00, 0x00],
            &[LinkState::IdleLink, LinkState::IdleLink],
        );
        writer.record(
            1,
            &[encode_trigger(1), Symbol(0x04)],
            &[0x06, 0x06],
            &[LinkState::Special1, LinkState::Special1],
        );
        writer.finish(2);
        assert!(!writer.is_error_state());
        let text = String::from_utf8(buffer.0.borrow().clone()).unwrap();
        assert!(text.contains("$scope"));
        assert!(text.contains(DEFAULT_TOP_MODULE));
        assert!(text.contains("A1"));
        assert!(text.contains("B1"));
        assert!(text.contains("$enddefinitions"));
        assert!(text.contains("#0"));
        assert!(text.contains("#1"));
        assert!(text.contains("#2"));
        // trigger with offset 1 on A1's tx
        assert!(text.contains("b10000001"));
        // SPECIAL on rx
        assert!(text.contains("b00000110"));
    }

    #[test]
    fn write_errors_switch_tracing_off() {
        let mut writer = VcdWriter::new(BrokenPipe);
        writer.write_header(&["A1"]);
        assert!(writer.is_error_state());
        // further calls are no-ops
        writer.record(0, &[Symbol(0)], &[0], &[LinkState::IdleLink]);
        writer.finish(1);
        assert!(writer.is_error_state());
    }
}
