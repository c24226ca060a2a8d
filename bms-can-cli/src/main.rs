//! BMS CAN Toolchain CLI
//!
//! Command-line front-end of the bms-can library:
//! - `filter`: keep selected ids of an ASCII CAN trace
//! - `decode`: turn a trace into JSON records, one file per message
//! - `table`: join decoded records into CSV or Parquet tables
//! - `log`: record raw bus traffic into a rolling ASC log
//! - `bms`: interactive request shell

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use bms_can::BmsError;

mod commands;

/// BMS CAN toolchain - capture, filter, decode and query BMS CAN traffic
#[derive(Parser, Debug)]
#[command(name = "bms-can")]
#[command(about = "Capture, filter, decode and query BMS CAN traffic", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Keep the lines of selected ids of an ASCII CAN trace
    Filter {
        /// Filter configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Decode an ASCII CAN trace into JSON records
    Decode {
        /// Decoder configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Output directory (overrides the configuration)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Convert decoded JSON records into tables
    Table {
        /// JSON file or directory of JSON files
        #[arg(value_name = "DATA")]
        data: PathBuf,

        /// Table configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Output file (.csv/.parquet) or directory
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },

    /// Record raw CAN traffic until Ctrl-C
    Log {
        /// Log directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Size of one log file in bytes
        #[arg(short = 's', long, default_value_t = 50_000)]
        max_bytes: u64,

        /// Rotated files to keep (0 keeps all)
        #[arg(long, default_value_t = 0)]
        backups: usize,

        /// CAN interface (pcan, kvaser, virtual)
        #[arg(short, long)]
        interface: String,

        /// CAN channel
        #[arg(short, long)]
        channel: String,

        /// Bit rate in bit/s
        #[arg(short, long, default_value_t = 500_000)]
        bitrate: u32,
    },

    /// Interactive BMS request shell
    Bms {
        /// Shell configuration file
        #[arg(short, long, value_name = "FILE", default_value = "bms.yml")]
        config: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::debug!("BMS CAN CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using bms-can library v{}", bms_can::VERSION);

    if let Err(e) = run(args.command) {
        eprintln!("{:#}", e);
        process::exit(exit_code(&e));
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Filter { config } => commands::filter::run(&config),
        Commands::Decode { config, output } => commands::decode::run(&config, output),
        Commands::Table {
            data,
            config,
            output,
        } => commands::table::run(&data, &config, &output),
        Commands::Log {
            output,
            max_bytes,
            backups,
            interface,
            channel,
            bitrate,
        } => {
            let options = commands::capture::LogOptions {
                directory: output,
                max_bytes,
                backups,
                interface,
                channel,
                bitrate,
            };
            commands::capture::run(&options)
        }
        Commands::Bms { config } => commands::shell::run(&config),
    }
}

/// Exit code of a failed run; library errors choose their own
fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<BmsError>())
        .map(BmsError::exit_code)
        .unwrap_or(1)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_parse_log_command() {
        let args = Args::try_parse_from([
            "bms-can", "log", "-o", "logs", "-s", "1000", "-i", "virtual", "-c", "vcan0", "-b",
            "250000",
        ])
        .unwrap();
        match args.command {
            Commands::Log {
                output,
                max_bytes,
                interface,
                bitrate,
                ..
            } => {
                assert_eq!(output, PathBuf::from("logs"));
                assert_eq!(max_bytes, 1000);
                assert_eq!(interface, "virtual");
                assert_eq!(bitrate, 250_000);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bms_config_default() {
        let args = Args::try_parse_from(["bms-can", "-v", "bms"]).unwrap();
        assert_eq!(args.verbose, 1);
        assert!(matches!(args.command, Commands::Bms { config } if config == PathBuf::from("bms.yml")));
    }

    #[test]
    fn test_exit_codes_follow_library_errors() {
        let timeout: anyhow::Error = BmsError::Timeout("init".to_string()).into();
        assert_eq!(exit_code(&timeout), 2);

        let wrapped = Err::<(), _>(BmsError::UnsupportedInterface("socket".to_string()))
            .context("Opening the bus")
            .unwrap_err();
        assert_eq!(exit_code(&wrapped), 2);

        let config: anyhow::Error = BmsError::ConfigError("bad".to_string()).into();
        assert_eq!(exit_code(&config), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
