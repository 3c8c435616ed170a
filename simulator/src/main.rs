//! Simulate Reverse Path Forwarding floods over a router topology.

use clap::{value_parser, Arg, Command};
use colored::Colorize;
use rpfsim_flood::{config::Topology, journal::Journal, network::Network, report::Report, ticks};
use rpfsim_runtime::{deterministic, Metrics, Runner};
use std::{path::PathBuf, process::exit, str::FromStr};
use tracing::{info, Level};

/// Command line arguments parsed from user input
struct Arguments {
    topology: Option<PathBuf>,
    seed: u64,
    timeout: Option<u64>,
    packets: Option<u64>,
    mean: Option<f64>,
    journal: bool,
    metrics: bool,
    level: Level,
}

fn main() {
    let args = match parse_arguments() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{}", err.red());
            exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt().with_max_level(args.level).init();

    // Load topology
    let topology = match load_topology(&args) {
        Ok(topology) => topology,
        Err(err) => {
            eprintln!("{}", format!("invalid topology: {}", err).red());
            exit(1);
        }
    };
    let mut network = match Network::new(&topology) {
        Ok(network) => network,
        Err(err) => {
            eprintln!("{}", format!("invalid topology: {}", err).red());
            exit(1);
        }
    };
    if args.journal {
        network = network.with_journal();
    }
    info!(
        routers = topology.routers.len(),
        links = topology.links.len(),
        seed = args.seed,
        "starting simulation"
    );

    // Run until every flood settles (or the time budget is exhausted)
    let cfg = deterministic::Config::new()
        .with_seed(args.seed)
        .with_timeout(args.timeout.map(ticks));
    let executor = deterministic::Runner::new(cfg);
    let (simulation, context) = executor.start(|context| async move {
        let simulation = network.start(context.clone());
        (simulation, context)
    });
    let report = simulation.report();
    info!(delivered = report.delivered(), "simulation complete");

    // Print results
    if let Some(journal) = simulation.journal() {
        print_journal(&journal);
    }
    print_report(&report, &topology);
    if args.metrics {
        println!("\n{}", "metrics:".bold().blue());
        print!("{}", context.encode());
    }
    println!("\n{} {}", "auditor:".bold(), context.auditor().state());
}

/// Parse command line arguments and return structured data
fn parse_arguments() -> Result<Arguments, String> {
    let matches = Command::new("rpfsim")
        .about("Simulate Reverse Path Forwarding floods over a router topology")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("topology")
                .long("topology")
                .required(false)
                .value_parser(value_parser!(PathBuf))
                .help("Path to a JSON topology (defaults to the bundled reference topology)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .required(false)
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Seed for packet arrivals"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .required(false)
                .value_parser(value_parser!(u64))
                .help("Stop after this many ticks of virtual time"),
        )
        .arg(
            Arg::new("packets")
                .long("packets")
                .required(false)
                .value_parser(value_parser!(u64))
                .help("Number of packets every router originates"),
        )
        .arg(
            Arg::new("mean")
                .long("mean")
                .required(false)
                .value_parser(value_parser!(f64))
                .help("Mean ticks between the packets a router originates"),
        )
        .arg(
            Arg::new("journal")
                .long("journal")
                .required(false)
                .num_args(0)
                .help("Print every handling decision and transmission"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .required(false)
                .num_args(0)
                .help("Print the prometheus metrics of the run"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .required(false)
                .default_value("info")
                .value_parser(value_parser!(String))
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(|level| Level::from_str(level))
        .transpose()
        .map_err(|err| format!("invalid log level: {}", err))?
        .unwrap_or(Level::INFO);
    Ok(Arguments {
        topology: matches.get_one::<PathBuf>("topology").cloned(),
        seed: matches.get_one::<u64>("seed").copied().unwrap_or_default(),
        timeout: matches.get_one::<u64>("timeout").copied(),
        packets: matches.get_one::<u64>("packets").copied(),
        mean: matches.get_one::<f64>("mean").copied(),
        journal: matches.get_flag("journal"),
        metrics: matches.get_flag("metrics"),
        level,
    })
}

/// Read the requested topology and apply overrides
fn load_topology(args: &Arguments) -> Result<Topology, rpfsim_flood::Error> {
    let mut topology = match &args.topology {
        Some(path) => Topology::load(path)?,
        None => Topology::reference(),
    };
    if let Some(packets) = args.packets {
        topology = topology.with_packets(packets);
    }
    if let Some(mean) = args.mean {
        topology = topology.with_mean(mean);
    }
    Ok(topology)
}

fn print_journal(journal: &Journal) {
    println!("{}", "decisions:".bold().blue());
    for decision in &journal.decisions {
        println!("{}", decision.to_string().cyan());
    }
    println!("\n{}", "transmissions:".bold().blue());
    for transmission in &journal.transmissions {
        println!("{}", transmission.to_string().cyan());
    }
    println!();
}

fn print_report(report: &Report, topology: &Topology) {
    println!("{}", "results:".bold().blue());
    for delivery in &report.deliveries {
        let expected = topology
            .routers
            .iter()
            .find(|router| router.id == delivery.router)
            .map(|router| router.packets)
            .unwrap_or_default();
        let line = delivery.to_string();
        if delivery.delivered == expected {
            println!("{}", line.green());
        } else {
            println!("{}", line.yellow());
        }
    }
    let overall = report.to_string();
    if let Some(line) = overall.lines().last() {
        println!("{}", line.bold());
    }
}
