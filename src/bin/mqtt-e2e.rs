use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use std::path::Path;

use mqtt_e2e::config::{create_sample_config, early_log_level, load_config, DEFAULT_CONFIG_PATH};
use mqtt_e2e::runner::discover;
use mqtt_e2e::{Harness, EXIT_FAILURE, EXIT_SUCCESS};

fn cli() -> Command {
    Command::new("mqtt-e2e")
        .version("0.1.0")
        .about("Runs the end-to-end test scripts against a live broker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("test-dir")
                .short('d')
                .long("test-dir")
                .value_name("DIR")
                .help("Directory holding the test scripts"),
        )
        .arg(
            Arg::new("pattern")
                .short('p')
                .long("pattern")
                .value_name("GLOB")
                .help("File name pattern selecting test scripts"),
        )
        .arg(
            Arg::new("interpreter")
                .short('i')
                .long("interpreter")
                .value_name("PROGRAM")
                .help("Interpreter used to run each script (empty runs scripts directly)"),
        )
        .arg(
            Arg::new("test-timeout")
                .short('t')
                .long("test-timeout")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("Per-test timeout, 0 disables it"),
        )
        .arg(
            Arg::new("broker")
                .short('b')
                .long("broker")
                .value_name("PROGRAM")
                .help("Broker executable name or path"),
        )
        .arg(
            Arg::new("broker-config")
                .long("broker-config")
                .value_name("FILE")
                .help("Broker configuration file"),
        )
        .arg(
            Arg::new("broker-port")
                .long("broker-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Port probed for broker readiness"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (error, warn, info, debug, trace)"),
        )
        .arg(
            Arg::new("report")
                .short('r')
                .long("report")
                .value_name("FILE")
                .help("Write a JSON run report to this file"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("Print the matching test scripts and exit"),
        )
        .arg(
            Arg::new("init-config")
                .long("init-config")
                .value_name("FILE")
                .help("Write a sample configuration file and exit"),
        )
}

fn init_logging(level: Option<&str>) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", level.unwrap_or("warn"));
    }
    env_logger::init();
}

async fn run(matches: &ArgMatches) -> Result<i32> {
    if let Some(path) = matches.get_one::<String>("init-config") {
        create_sample_config(path)?;
        return Ok(EXIT_SUCCESS);
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    init_logging(early_log_level(config_path, matches).as_deref());
    let config = load_config(config_path, matches)?;

    if matches.get_flag("list") {
        for case in discover(&config.tests.dir, &config.tests.pattern)? {
            println!("{case}");
        }
        return Ok(EXIT_SUCCESS);
    }

    info!(
        "Running {} in {} against broker {}",
        config.tests.pattern,
        config.tests.dir.display(),
        config.broker.executable
    );

    let report = Harness::from_config(config).run().await?;
    report.print_summary();

    if let Some(path) = matches.get_one::<String>("report") {
        if let Err(e) = report.write_json(Path::new(path)) {
            error!("{e:#}");
        }
    }

    Ok(report.exit_code())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let code = match run(&matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FAILURE
        }
    };

    std::process::exit(code);
}
