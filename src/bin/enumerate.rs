use clap::{App, Arg};
use colored::Colorize;
use std::process;

use subsonar::{Config, Enumeration};

fn main() {
    let matches = App::new("subsonar")
        .version("0.1")
        .about("DNS subdomain enumeration engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .required(true)
                .takes_value(true)
                .long_help("Path to the JSON configuration file"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .multiple_occurrences(true)
                .takes_value(true)
                .long_help("Extra subdomain name to seed the enumeration with, may be repeated"),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap();
    let seed_names: Vec<String> = matches.values_of("seed").map(|v| v.map(String::from).collect()).unwrap_or_default();

    let config = match Config::from_file(config_path) {
        Ok(conf) => conf,
        Err(err) => {
            eprintln!("Parsing configuration file: {}", err);
            process::exit(1);
        }
    };

    let domains = config.domains.clone();
    let enumeration = match Enumeration::new(config) {
        Ok(e) => e,
        Err(err) => {
            eprintln!("Starting enumeration: {}", err);
            process::exit(1);
        }
    };
    log::info!("Parsed configuration for domains: {:?}.", domains);

    enumeration.start(seed_names);
    enumeration.run_to_completion(|output| {
        println!("{} [{:?}] {}", output.name.bold(), output.classification, output.source);
    });
}
