use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "poolx")]
#[command(about = "RidePool - ride-pooling lobby matching")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "poolx.yaml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "poolx.yaml")]
        config: PathBuf,
    },

    /// Run a scripted driver/passenger session against in-memory collaborators
    Demo {
        /// Path to the configuration file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Candidate selection seed, overriding `matching.selection_seed`
        #[arg(long, env = "POOLX_SEED")]
        seed: Option<u64>,

        /// Passengers joining the driver's lobby, overriding
        /// `matching.default_max_passengers`
        #[arg(long)]
        passengers: Option<u32>,
    },
}

impl Commands {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commands::Init { .. } => "init",
            Commands::Validate { .. } => "validate",
            Commands::Demo { .. } => "demo",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_demo_defaults() {
        let cli = Cli::try_parse_from(["poolx", "demo"]).unwrap();
        match cli.command {
            Commands::Demo {
                config, passengers, ..
            } => {
                assert!(config.is_none());
                assert_eq!(passengers, None);
            }
            other => panic!("unexpected command: {}", other.as_str()),
        }
    }

    #[test]
    fn test_demo_passenger_override() {
        let cli = Cli::try_parse_from(["poolx", "demo", "--passengers", "3"]).unwrap();
        match cli.command {
            Commands::Demo { passengers, .. } => assert_eq!(passengers, Some(3)),
            other => panic!("unexpected command: {}", other.as_str()),
        }
    }

    #[test]
    fn test_validate_path() {
        let cli = Cli::try_parse_from(["poolx", "validate", "-c", "/etc/poolx.yaml"]).unwrap();
        assert_eq!(cli.command.as_str(), "validate");
        match cli.command {
            Commands::Validate { config } => assert_eq!(config, PathBuf::from("/etc/poolx.yaml")),
            other => panic!("unexpected command: {}", other.as_str()),
        }
    }
}
