use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tns_common::config::{DEFAULT_CONFIG_PATH, SyncPulseConfig};
use tns_daemon::simulated::SimulatedModem;
use tns_daemon::supervisor::{
    LineEvents, RESPAWN_DELAY, Supervisor, SupervisorSettings, wait_for_stop,
};

/// Configures NR5G time-sync pulse generation and reports the modem's indications.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Sync pulse configuration, `key=value` per line
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Prompt for pulse period, start SFN and report period, Enter stops
    #[arg(short, long)]
    interactive: bool,
    /// Start a new session when one ends without a stop request
    #[arg(long)]
    respawn: bool,
    /// Seconds until the simulated modem reports NR5G service
    #[arg(long, default_value_t = 2)]
    service_delay: u64,
    #[arg(long, default_value_t = log::LevelFilter::Info)]
    log_level: log::LevelFilter,
}

async fn load_config(args: &Args) -> Option<SyncPulseConfig> {
    let defaults = SyncPulseConfig::load_defaults();
    if !args.interactive {
        return Some(SyncPulseConfig::load_file_or_defaults(&args.config, defaults));
    }

    let prompted = tokio::task::spawn_blocking(move || {
        let mut input = std::io::stdin().lock();
        SyncPulseConfig::prompt(&mut input, &mut std::io::stdout(), defaults)
    })
    .await;
    match prompted {
        Ok(Ok(config)) => Some(config),
        Ok(Err(err)) => {
            error!("Cannot read the sync pulse configuration: {err}");
            None
        }
        Err(err) => {
            error!("Configuration prompt failed: {err}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::builder()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    info!("Time network synchronization starting");
    let Some(config) = load_config(&args).await else {
        return ExitCode::FAILURE;
    };
    if args.interactive {
        println!("\n(After having set the input, press ENTER to stop)\n");
    }

    let mut enter = args
        .interactive
        .then(|| LineEvents::spawn(std::io::BufReader::new(std::io::stdin())));

    let modem = SimulatedModem::new();
    modem.attach_after(Duration::from_secs(args.service_delay));
    modem.emit_pulse_reports(true);

    loop {
        let supervisor = Supervisor::new(modem.clone(), config, SupervisorSettings::default());
        match supervisor.run(wait_for_stop(enter.as_mut())).await {
            Ok(report) => {
                info!("Session ended: {report:?}");
                if report.stop_requested || !args.respawn {
                    break;
                }
            }
            Err(err) => {
                error!("Session failed: {err}");
                if !args.respawn {
                    return ExitCode::FAILURE;
                }
            }
        }

        warn!("Session ended, restarting in {}s...", RESPAWN_DELAY.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(RESPAWN_DELAY) => {}
            _ = wait_for_stop(enter.as_mut()) => break,
        }
    }

    info!("Time network synchronization terminated");
    ExitCode::SUCCESS
}
