use std::{net::IpAddr, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    config::{Config, Delimiter},
    error::Error,
};

/// The command line interface for the serial bridge.
///
/// Bridges are given either as a configuration file,
/// or as `--device`/`--port` pairs: the first device is exposed on the first port, and so on.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file.
    /// Cannot be combined with `--device`/`--port`.
    #[arg(short, long, conflicts_with_all = ["device", "port"])]
    pub config: Option<PathBuf>,

    /// A device to bridge, `path[,key=value,...]`.
    /// For example `/dev/ttyUSB0,baudrate=115200` or `mock:echo`.
    #[arg(short, long)]
    pub device: Vec<String>,

    /// The TCP port for the device given at the same position.
    #[arg(short, long)]
    pub port: Vec<u16>,

    /// How long a device may be quiet before its reply is considered complete, in seconds.
    #[arg(short, long, default_value_t = 1.0)]
    pub timeout: f64,

    /// End replies at this delimiter instead, for example `\r\n`.
    #[arg(long)]
    pub delimiter: Option<String>,

    /// The address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Also log to a daily rolling file in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// The log level for stdout (and the log file).
    /// `RUST_LOG` takes precedence if set.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Debug, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show examples of device strings.
    DeviceString,
}

impl Cli {
    /// Turn the arguments into a configuration.
    pub fn into_config(self) -> Result<Config, Error> {
        if let Some(path) = self.config {
            return Config::new_from_path(path);
        }

        let timeout = Duration::try_from_secs_f64(self.timeout)
            .map_err(|e| Error::bad_config(format!("Bad timeout {}: {e}", self.timeout)))?;

        let delimiter = match &self.delimiter {
            Some(delimiter) => Delimiter::parse_optional(delimiter)?,
            None => None,
        };

        Config::from_pairs(&self.device, &self.port, timeout, delimiter, self.host)
    }
}

/// Handle a subcommand.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => {
                println!("{}", Config::example().serialize_pretty()?);
            }
            Examples::DeviceString => {
                println!("/dev/ttyUSB0");
                println!("/dev/ttyUSB0,baudrate=115200");
                println!("/dev/ttyACM0,baudrate=9600,stopbits=2,parity=E");
                println!("COM3,baudrate=19200,rtscts=1");
                println!("mock:echo");
            }
        },
    }

    Ok(())
}
