use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::DeviceModel;
use crate::stepper::DEFAULT_STEP_BUDGET;

/// Serve an emulated MCU65 microcontroller over a pair of message queues.
#[derive(Debug, Clone, Parser)]
#[command(name = "mcu65-server", version, about)]
pub struct Args {
    /// Firmware image (Intel HEX, or a raw binary placed at the start of flash).
    pub firmware: PathBuf,

    /// Key of the queue commands are read from.
    pub in_key: i32,

    /// Key of the queue responses are written to.
    pub out_key: i32,

    /// Diagnostic log file, appended to.
    pub log_path: PathBuf,

    /// Device model to emulate.
    #[arg(long, value_enum)]
    pub model: Option<DeviceModel>,

    /// Instructions attempted per Step command.
    #[arg(long)]
    pub step_budget: Option<u64>,

    /// Directory holding the flash backing file.
    #[arg(long)]
    pub flash_dir: Option<PathBuf>,

    /// Where the device's serial output goes (file, FIFO or tty). Defaults to stdout.
    #[arg(long)]
    pub console: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// JSON file with defaults for the options above.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Keep answering commands (Init gets InitFailed) when the firmware is missing.
    #[arg(long)]
    pub serve_on_init_failure: bool,

    /// Remove both queues on exit.
    #[arg(long)]
    pub remove_queues: bool,
}

/// Options that may come from the `--config` file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub model: DeviceModel,
    pub step_budget: u64,
    pub flash_dir: PathBuf,
    pub console: Option<PathBuf>,
    pub metrics_addr: Option<SocketAddr>,
    pub serve_on_init_failure: bool,
    pub remove_queues: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model: DeviceModel::default(),
            step_budget: DEFAULT_STEP_BUDGET,
            flash_dir: PathBuf::from("."),
            console: None,
            metrics_addr: None,
            serve_on_init_failure: false,
            remove_queues: false,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Everything the process runs with, fixed at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub firmware: PathBuf,
    pub in_key: i32,
    pub out_key: i32,
    pub log_path: PathBuf,
    pub server: ServerConfig,
}

impl Config {
    /// Layer the command line over the config file (if any) over the defaults.
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let mut server = match &args.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(model) = args.model {
            server.model = model;
        }
        if let Some(budget) = args.step_budget {
            server.step_budget = budget;
        }
        if let Some(dir) = args.flash_dir {
            server.flash_dir = dir;
        }
        if args.console.is_some() {
            server.console = args.console;
        }
        if args.metrics_addr.is_some() {
            server.metrics_addr = args.metrics_addr;
        }
        server.serve_on_init_failure |= args.serve_on_init_failure;
        server.remove_queues |= args.remove_queues;

        if server.step_budget == 0 {
            return Err(ConfigError::ZeroStepBudget);
        }

        Ok(Self {
            firmware: args.firmware,
            in_key: args.in_key,
            out_key: args.out_key,
            log_path: args.log_path,
            server,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["mcu65-server", "fw.hex", "1234", "5678", "server.log"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_positional_arguments() {
        let config = Config::resolve(parse(&[])).unwrap();
        assert_eq!(config.firmware, PathBuf::from("fw.hex"));
        assert_eq!(config.in_key, 1234);
        assert_eq!(config.out_key, 5678);
        assert_eq!(config.log_path, PathBuf::from("server.log"));
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.server.step_budget, 266_666);
    }

    #[test]
    fn test_missing_or_malformed_arguments() {
        assert!(Args::try_parse_from(["mcu65-server", "fw.hex", "1234"]).is_err());
        assert!(Args::try_parse_from(["mcu65-server", "fw.hex", "in", "5678", "log"]).is_err());
        assert!(
            Args::try_parse_from(["mcu65-server", "fw.hex", "1", "2", "log", "--model", "z80"]).is_err()
        );
    }

    #[test]
    fn test_command_line_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(
            &path,
            r#"{ "model": "mcu65x4", "step_budget": 1000, "flash_dir": "/var/lib/mcu65" }"#,
        )
        .unwrap();

        let path_arg = path.to_str().unwrap();
        let config = Config::resolve(parse(&["--config", path_arg, "--step-budget", "50"])).unwrap();
        assert_eq!(config.server.model, DeviceModel::Mcu65x4);
        assert_eq!(config.server.step_budget, 50);
        assert_eq!(config.server.flash_dir, PathBuf::from("/var/lib/mcu65"));
        assert!(!config.server.serve_on_init_failure);
    }

    #[test]
    fn test_bad_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{ "stepbudget": 5 }"#).unwrap();

        let err = Config::resolve(parse(&["--config", path.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let missing = dir.path().join("absent.json");
        let err = Config::resolve(parse(&["--config", missing.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_zero_step_budget_rejected() {
        let err = Config::resolve(parse(&["--step-budget", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroStepBudget));
    }
}
