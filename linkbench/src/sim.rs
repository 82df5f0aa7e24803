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

//! The bench: one controller, its agents and the coincidence source, stepped
//! in lock-step.
//!
//! Each tick runs, in order: the coincidence source, the controller's
//! transmit side, every agent, the controller's receive side and the trace.
//! Everything an agent reads during tick `k` was produced for tick `k`.

use itertools::Itertools;
use log::{debug, info, trace};
use rand::Rng;
use rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    AgentInbound, BenchConfiguration, CheckFailure, CheckTally, CoincidenceSource,
    ControllerModel, Error, LinkState, Peripheral, Register, RegisterBus, RocstarAgent,
    SpecialCommand, Symbol, Tick, VcdWriter, BUS_HANDSHAKE_TICKS,
};

/// Index of an agent in the bench, in configuration order.
pub type AgentId = usize;

/// Ticks spent before the first command of a session so that every agent
/// has serialized its clock at least once.
const SETTLE_TICKS: Tick = 16;

/// Shared stop flag, observed at every tick boundary. Clones may be moved to
/// other threads.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub ticks: Tick,
    pub tally: CheckTally,
    /// every failed check, ordered by tick
    pub failures: Vec<CheckFailure>,
}

impl Report {
    /// `Ok` with the tally when every check passed.
    pub fn into_result(self) -> Result<CheckTally, Error> {
        if self.tally.failed > 0 {
            Err(Error::ProtocolViolations {
                passed: self.tally.passed,
                failed: self.tally.failed,
            })
        } else {
            Ok(self.tally)
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ticks, {}", self.ticks, self.tally)?;
        if !self.failures.is_empty() {
            write!(f, "\n{}", self.failures.iter().join("\n"))?;
        }
        Ok(())
    }
}

pub struct Bench {
    config: BenchConfiguration,
    tick: Tick,
    agents: Vec<RocstarAgent>,
    controller: ControllerModel,
    coincidence: CoincidenceSource,
    last_rx: Vec<u8>,
    last_tx: Vec<Symbol>,
    cancellation: CancellationToken,
    cancelled: bool,
    vcd: Option<VcdWriter<Box<dyn Write>>>,
}

impl Bench {
    pub fn new(config: BenchConfiguration) -> Result<Self, Error> {
        config.validate()?;
        let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed);
        let coincidence = CoincidenceSource::new(&config.coincidence, rng.gen());
        let agents: Vec<RocstarAgent> = config
            .agents
            .iter()
            .map(|agent| {
                RocstarAgent::new(
                    agent.clone(),
                    config.link.latency,
                    config.link.history_depth,
                    rng.gen(),
                )
            })
            .collect::<Result<_, _>>()?;
        let controller = ControllerModel::new(&config.link, agents.len());
        info!(
            "bench with {} agents [{}], latency {}, seed {:#x}",
            agents.len(),
            agents.iter().map(|a| a.name()).join(", "),
            config.link.latency,
            config.seed
        );
        Ok(Self {
            last_rx: vec![0; agents.len()],
            last_tx: vec![Symbol::default(); agents.len()],
            config,
            tick: 0,
            agents,
            controller,
            coincidence,
            cancellation: CancellationToken::new(),
            cancelled: false,
            vcd: None,
        })
    }

    pub fn config(&self) -> &BenchConfiguration {
        &self.config
    }

    /// Number of completed ticks; also the tick the next `step` runs.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn agents(&self) -> &[RocstarAgent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Result<&RocstarAgent, Error> {
        self.agents.get(id).ok_or(Error::UnknownAgent(id))
    }

    pub fn agent_id(&self, name: &str) -> Option<AgentId> {
        self.agents.iter().position(|agent| agent.name() == name)
    }

    pub fn controller(&self) -> &ControllerModel {
        &self.controller
    }

    pub fn coincidence_mut(&mut self) -> &mut CoincidenceSource {
        &mut self.coincidence
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Bytes the controller drove towards each agent during the last tick.
    pub fn last_rx(&self) -> &[u8] {
        &self.last_rx
    }

    /// Symbols each agent drove during the last tick.
    pub fn last_tx(&self) -> &[Symbol] {
        &self.last_tx
    }

    /// Trace every following tick into `writer` as VCD.
    pub fn attach_vcd<W: Write + 'static>(&mut self, writer: W) {
        let boxed: Box<dyn Write> = Box::new(writer);
        let mut vcd = VcdWriter::new(boxed);
        let names: Vec<&str> = self.agents.iter().map(|agent| agent.name()).collect();
        vcd.write_header(&names);
        self.vcd = Some(vcd);
    }

    /// Tally over every agent's checker so far.
    pub fn tally(&self) -> CheckTally {
        let mut tally = CheckTally::default();
        for agent in &self.agents {
            tally += agent.checker().tally();
        }
        tally
    }

    /// Advance exactly one tick.
    pub fn step(&mut self) {
        let tick = self.tick;
        let coincidence = self.coincidence.step(tick);
        let rx = self.controller.emit(tick);
        let tx: Vec<Symbol> = self
            .agents
            .iter_mut()
            .zip(rx.iter())
            .map(|(agent, symbol)| {
                agent.step(
                    tick,
                    AgentInbound {
                        symbol: *symbol,
                        coincidence,
                    },
                )
            })
            .collect();
        if cfg!(feature = "trace-link-symbols") {
            for ((agent, rx), tx) in self.agents.iter().zip(rx.iter()).zip(tx.iter()) {
                trace!(
                    "tick {}: {} rx {} tx {}",
                    tick,
                    agent.name(),
                    crate::decode_controller_output(*rx),
                    tx
                );
            }
        }
        self.controller.ingest(tick, &tx);
        if let Some(vcd) = self.vcd.as_mut() {
            let states: Vec<LinkState> = self
                .agents
                .iter()
                .map(|agent| agent.state().link_state)
                .collect();
            vcd.record(tick, &tx, &rx, &states);
        }
        self.last_rx = rx;
        self.last_tx = tx;
        self.tick += 1;
    }

    /// Advance `ticks` ticks unless cancelled first; returns the number of
    /// completed ticks.
    pub fn run(&mut self, ticks: Tick) -> Result<Tick, Error> {
        for _ in 0..ticks {
            if self.cancellation.is_cancelled() {
                if !self.cancelled {
                    info!("run cancelled at tick {}", self.tick);
                    self.cancelled = true;
                }
                return Err(Error::Cancelled);
            }
            self.step();
        }
        Ok(self.tick)
    }

    /// Queue a special command through the register bus.
    pub fn issue(&mut self, command: SpecialCommand) -> Result<(), Error> {
        self.write(Register::SpecialCommand.address()?, command.value())
    }

    /// Run until every queued special command has been transmitted.
    pub fn drain_commands(&mut self) -> Result<Tick, Error> {
        while self.controller.is_broadcasting() {
            self.run(1)?;
        }
        Ok(self.tick)
    }

    /// Collect the final report. A cancelled run has none.
    pub fn finish(mut self) -> Result<Report, Error> {
        if self.cancelled || self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(vcd) = self.vcd.as_mut() {
            vcd.finish(self.tick);
        }
        let failures = self
            .agents
            .iter()
            .flat_map(|agent| agent.checker().failures().iter().cloned())
            .sorted_by_key(|failure| failure.tick)
            .collect();
        let report = Report {
            ticks: self.tick,
            tally: self.tally(),
            failures,
        };
        info!("finished after {} ticks, {}", report.ticks, report.tally);
        Ok(report)
    }

    fn register(&self, address: u16) -> Result<Register, Error> {
        Register::from_address(address, self.agents.len())
    }
}

impl RegisterBus for Bench {
    fn write(&mut self, address: u16, data: u16) -> Result<(), Error> {
        let register = self.register(address)?;
        if !register.is_writable() {
            return Err(Error::ReadOnlyRegister(address));
        }
        // strobe on the first tick of the handshake
        self.controller.write_register(register, data)?;
        debug!("tick {}: bus write {} = {:#06x}", self.tick, register, data);
        self.run(BUS_HANDSHAKE_TICKS)?;
        Ok(())
    }

    fn read(&mut self, address: u16) -> Result<u16, Error> {
        let register = self.register(address)?;
        let value = match register {
            Register::SavedClock(id) => self.agent(id)?.state().saved_clk_counter,
            _ => self.controller.read_register(register)?,
        };
        debug!("tick {}: bus read {} = {:#06x}", self.tick, register, value);
        self.run(BUS_HANDSHAKE_TICKS)?;
        Ok(value)
    }
}

/// The standard scripted session: settle, SYNC, START, run `ticks`,
/// SAVE_CLOCK and read every saved clock back, END, drain in-flight answers.
pub fn run_session(
    config: BenchConfiguration,
    ticks: Tick,
    vcd: Option<&Path>,
) -> Result<Report, Error> {
    let mut bench = Bench::new(config)?;
    if let Some(path) = vcd {
        info!("tracing to {}", path.display());
        bench.attach_vcd(fs::File::create(path)?);
    }
    bench.run(SETTLE_TICKS)?;
    bench.issue(SpecialCommand::Sync)?;
    bench.issue(SpecialCommand::Start)?;
    bench.drain_commands()?;
    info!("tick {}: triggers enabled", bench.tick());

    bench.run(ticks)?;

    bench.issue(SpecialCommand::SaveClock)?;
    bench.drain_commands()?;
    for id in 0..bench.agents().len() {
        let saved = bench.read(Register::SavedClock(id).address()?)?;
        let reconstructed = bench.read(Register::ReconstructedClock(id).address()?)?;
        info!(
            "agent {}: saved clock {:#06x}, controller sees {:#06x}",
            bench.agent(id)?.name(),
            saved,
            reconstructed
        );
    }

    bench.issue(SpecialCommand::End)?;
    bench.drain_commands()?;
    let latency = bench.config().link.latency as Tick;
    bench.run(latency + 1)?;
    bench.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentConfiguration, CoincidenceConfiguration};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quiet_config(agents: &[&str]) -> BenchConfiguration {
        BenchConfiguration {
            coincidence: CoincidenceConfiguration {
                probability: 0.0,
                ..Default::default()
            },
            agents: agents
                .iter()
                .map(|name| AgentConfiguration {
                    single_event_probability: 0.0,
                    ..AgentConfiguration::named(name)
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn bench_rejects_invalid_configuration() {
        let mut config = BenchConfiguration::default();
        config.link.latency = 0;
        assert_eq!(Bench::new(config).err(), Some(Error::InvalidLatency(0)));
    }

    #[test]
    fn bus_handshake_takes_three_ticks() {
        init();
        let mut bench = Bench::new(quiet_config(&["A1"])).unwrap();
        assert_eq!(bench.read(0x0000), Ok(0x1234));
        assert_eq!(bench.tick(), BUS_HANDSHAKE_TICKS);
        bench.write(0x0001, 0xbeef).unwrap();
        assert_eq!(bench.tick(), 2 * BUS_HANDSHAKE_TICKS);
        assert_eq!(bench.read(0x0001), Ok(0xbeef));
    }

    #[test]
    fn bus_errors_cost_no_ticks() {
        let mut bench = Bench::new(quiet_config(&["A1", "B1"])).unwrap();
        assert_eq!(bench.write(0x0000, 1), Err(Error::ReadOnlyRegister(0x0000)));
        assert_eq!(bench.write(0x0101, 1), Err(Error::ReadOnlyRegister(0x0101)));
        assert_eq!(bench.read(0x0102), Err(Error::InvalidAddress(0x0102)));
        assert_eq!(bench.write(0x0777, 1), Err(Error::InvalidAddress(0x0777)));
        assert_eq!(
            bench.write(0x0002, 0x2223),
            Err(Error::InvalidSpecialCommand(0x2223))
        );
        assert_eq!(bench.tick(), 0);
        assert!(!bench.controller().is_broadcasting());
        assert_eq!(bench.agent(2).err(), Some(Error::UnknownAgent(2)));
    }

    #[test]
    fn cancelled_run_has_no_report() {
        let mut bench = Bench::new(quiet_config(&["A1"])).unwrap();
        bench.run(10).unwrap();
        let token = bench.cancellation_token();
        std::thread::spawn(move || token.cancel()).join().unwrap();
        assert_eq!(bench.run(10), Err(Error::Cancelled));
        assert_eq!(bench.tick(), 10);
        assert_eq!(bench.finish(), Err(Error::Cancelled));
    }

    #[test]
    fn commands_reach_every_agent() {
        init();
        let mut bench = Bench::new(quiet_config(&["A1", "B1", "C1"])).unwrap();
        bench.issue(SpecialCommand::Start).unwrap();
        bench.drain_commands().unwrap();
        assert!(bench.agents().iter().all(|a| a.state().trigger_enabled));
        assert!(bench
            .agents()
            .iter()
            .all(|a| a.state().link_state == LinkState::IdleLink));
        bench.issue(SpecialCommand::End).unwrap();
        bench.drain_commands().unwrap();
        assert!(bench.agents().iter().all(|a| !a.state().trigger_enabled));
    }

    #[test]
    fn report_lists_failures() {
        let report = Report {
            ticks: 20,
            tally: CheckTally {
                passed: 3,
                failed: 0,
            },
            failures: vec![],
        };
        assert_eq!(report.to_string(), "20 ticks, checks: 3 ok, 0 failed");
        assert_eq!(
            report.into_result(),
            Ok(CheckTally {
                passed: 3,
                failed: 0
            })
        );
        let report = Report {
            ticks: 20,
            tally: CheckTally {
                passed: 3,
                failed: 1,
            },
            failures: vec![],
        };
        assert_eq!(
            report.into_result(),
            Err(Error::ProtocolViolations {
                passed: 3,
                failed: 1
            })
        );
    }
}
