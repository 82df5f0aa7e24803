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

use anyhow::{bail, Context};
use env_logger::Target;
use std::path::PathBuf;
use structopt::StructOpt;

use linkbench::peripherals::{Adt7320, Ds2411, OneWireReader, SpiReader};
use linkbench::{run_session, BenchConfiguration, Error};

#[derive(StructOpt)]
#[structopt(name = "rocstar", about = "Emulated rocstar links and their latency checks")]
enum Arguments {
    /// Run the scripted session: SYNC, START, run, SAVE_CLOCK, END
    Session {
        /// YAML bench configuration; defaults apply when absent
        #[structopt(short, long, parse(from_os_str))]
        config: Option<PathBuf>,
        #[structopt(short, long, default_value = "10000")]
        ticks: u64,
        /// overrides the configured seed
        #[structopt(short, long)]
        seed: Option<u64>,
        /// write a VCD trace of every link
        #[structopt(long, parse(from_os_str))]
        vcd: Option<PathBuf>,
    },
    /// Read one register of an emulated ADT7320 over SPI
    Adt7320 {
        #[structopt(short, long, default_value = "2")]
        address: u8,
        /// raw temperature register value
        #[structopt(short, long)]
        temperature: Option<u16>,
    },
    /// Read the ROM of an emulated DS2411 over 1-Wire
    Ds2411 {
        #[structopt(short, long, default_value = "1")]
        serial: u64,
    },
}

fn session(
    config: Option<PathBuf>,
    ticks: u64,
    seed: Option<u64>,
    vcd: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut bench_config = match &config {
        Some(path) => BenchConfiguration::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BenchConfiguration::default(),
    };
    if let Some(seed) = seed {
        bench_config.seed = seed;
    }
    let report = match run_session(bench_config, ticks, vcd.as_deref()) {
        Ok(report) => report,
        Err(Error::Cancelled) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    println!("{}", report);
    report.into_result()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let _logger = env_logger::builder()
        .filter(Some("linkbench"), log::LevelFilter::Info)
        .parse_default_env()
        .target(Target::Stderr)
        .init();

    match Arguments::from_args() {
        Arguments::Session {
            config,
            ticks,
            seed,
            vcd,
        } => session(config, ticks, seed, vcd),
        Arguments::Adt7320 {
            address,
            temperature,
        } => {
            if address > 3 {
                bail!("ADT7320 has no readable register {}", address);
            }
            let mut chip = Adt7320::new("adt7320");
            if let Some(raw) = temperature {
                chip.set_temperature(raw);
            }
            let mut tick = 0;
            let value = SpiReader::default().read_register(&mut chip, &mut tick, address);
            println!("register {} = {:#06x} ({} ticks)", address, value, tick);
            Ok(())
        }
        Arguments::Ds2411 { serial } => {
            let mut chip = Ds2411::new("ds2411", serial);
            let mut reader = OneWireReader::new(&mut chip, 0);
            match reader.read_rom() {
                Some(rom) if rom.is_valid() => {
                    println!("ROM {} ({} ticks)", rom, reader.tick());
                    Ok(())
                }
                Some(rom) => bail!("ROM {} fails its CRC", rom),
                None => bail!("no presence pulse"),
            }
        }
    }
}
