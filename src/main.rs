use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use mcu65_server::config::{Args, Config};
use mcu65_server::console::ConsoleBridge;
use mcu65_server::device::{Device, DeviceOptions};
use mcu65_server::error::DeviceError;
use mcu65_server::logging;
use mcu65_server::metrics::{init_metrics, spawn_exporter};
use mcu65_server::server::CommandLoop;

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_path);

    let config = match Config::resolve(args) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        firmware = %config.firmware.display(),
        in_key = config.in_key,
        out_key = config.out_key,
        log = %config.log_path.display(),
        model = %config.server.model,
        step_budget = config.server.step_budget,
        "starting mcu65-server"
    );

    serve(config)
}

#[cfg(target_os = "linux")]
fn serve(config: Config) -> ExitCode {
    use mcu65_server::transport::MessageQueue;

    init_metrics();
    if let Some(addr) = config.server.metrics_addr {
        if let Err(err) = spawn_exporter(addr) {
            warn!(error = %err, "metrics exporter not started");
        }
    }

    let data_size = config.server.model.specs().data_size;
    let inbound = MessageQueue::open(config.in_key, data_size);
    let outbound = MessageQueue::open(config.out_key, data_size);
    let (inbound, outbound) = match (inbound, outbound) {
        (Ok(inbound), Ok(outbound)) => (inbound, outbound),
        (inbound, outbound) => {
            for err in [inbound.err(), outbound.err()].into_iter().flatten() {
                error!(error = %err, "cannot open message queue");
            }
            return ExitCode::FAILURE;
        }
    };

    let console = match &config.server.console {
        Some(path) => match ConsoleBridge::open(path) {
            Ok(console) => console,
            Err(err) => {
                error!(path = %path.display(), error = %err, "cannot open console");
                return ExitCode::FAILURE;
            }
        },
        None => ConsoleBridge::stdout(),
    };
    let options = DeviceOptions::new(config.server.model, config.server.flash_dir.clone())
        .with_console(console);

    let server = match Device::create(&config.firmware, options) {
        Ok(device) => CommandLoop::new(device, inbound, outbound),
        Err(err @ DeviceError::FirmwareNotFound(_)) if config.server.serve_on_init_failure => {
            warn!(error = %err, "serving without a device");
            CommandLoop::without_device(inbound, outbound, data_size)
        }
        Err(err) => {
            error!(error = %err, "device creation failed");
            return ExitCode::FAILURE;
        }
    };

    let reason = server.with_step_budget(config.server.step_budget).run();
    info!(reason = ?reason, "shutdown complete");

    if config.server.remove_queues {
        for key in [config.in_key, config.out_key] {
            let removed = MessageQueue::open(key, data_size)
                .map_err(|err| err.to_string())
                .and_then(|queue| queue.remove().map_err(|err| err.to_string()));
            if let Err(err) = removed {
                warn!(key, error = %err, "failed to remove message queue");
            }
        }
    }

    ExitCode::SUCCESS
}

#[cfg(not(target_os = "linux"))]
fn serve(_config: Config) -> ExitCode {
    error!("System V message queues are only supported on Linux");
    ExitCode::FAILURE
}
