use dali::bus::event::isr_channel;
use dali::drivers::simulator::bus::SimBus;
use dali::error::DynResult;
use dali::utils::commissioning::CommissionMode;
use dali::utils::parameters::ParameterSelector;
use dali::BusConfig;
use dali_master as dali;
use futures::StreamExt;
use log::{error, info};
use std::path::PathBuf;

extern crate clap;
use clap::{value_parser, Arg, ArgAction, Command};

async fn run(
    config: BusConfig,
    devices: usize,
    seed: u64,
    mode: CommissionMode,
) -> DynResult<()> {
    let sim = SimBus::with_gears(devices, seed);
    if mode == CommissionMode::Unaddressed {
        // Leave the first device with an address
        if let Some(gear) = sim.gears().first_mut() {
            gear.short_address = 0;
        }
    }
    let (isr, events) = isr_channel();
    let bus = dali::spawn(config, sim.codec(isr), sim.line(), events)?;

    let mut run = bus.start_commissioning(mode).await?;
    while let Some(assignment) = run.assignments.next().await {
        println!("{}", assignment);
    }
    let report = run.finish().await?;
    info!(
        "{} assigned in {} rounds, {} failures, {} collisions",
        report.assigned.len(),
        report.rounds,
        report.failures,
        report.collisions
    );

    for assignment in &report.assigned {
        let long_h = bus
            .read_parameter(assignment.short, ParameterSelector::RandomAddressH)
            .await?;
        let device_type = bus
            .read_parameter(assignment.short, ParameterSelector::DeviceType)
            .await?;
        println!(
            "Short {}: random address high byte 0x{:02x}, device type {}",
            assignment.short, long_h, device_type
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let matches = Command::new("commission")
        .about("Assign short addresses to simulated DALI gear")
        .arg(
            Arg::new("DEVICES")
                .short('n')
                .long("devices")
                .default_value("4")
                .value_parser(value_parser!(usize))
                .help("Number of simulated gears"),
        )
        .arg(
            Arg::new("SEED")
                .long("seed")
                .default_value("1")
                .value_parser(value_parser!(u64))
                .help("Seed for the random addresses"),
        )
        .arg(
            Arg::new("CONFIG")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("Bus configuration in JSON"),
        )
        .arg(
            Arg::new("unaddressed")
                .long("unaddressed")
                .action(ArgAction::SetTrue)
                .help("Only commission gears without a short address"),
        )
        .get_matches();

    let devices = *matches.get_one::<usize>("DEVICES").unwrap();
    if devices > 64 {
        error!("At most 64 devices fit on a bus");
        return;
    }
    let seed = *matches.get_one::<u64>("SEED").unwrap();
    let config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => match BusConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                return;
            }
        },
        None => BusConfig::default(),
    };
    let mode = if matches.get_flag("unaddressed") {
        CommissionMode::Unaddressed
    } else {
        CommissionMode::All
    };

    if let Err(e) = run(config, devices, seed, mode).await {
        error!("Commissioning failed: {}", e);
    }
}
