// simulation_main.rs
use crossing_sim::cli::{parse_args, USAGE};
use crossing_sim::monitoring::progress_log::ProgressLog;
use crossing_sim::{SimResult, Simulation, SimulationConfig};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let plan = match parse_args(&args) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(plan.config_path.as_deref(), plan.vehicles).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("simulation failed: {}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config_path: Option<&std::path::Path>,
    vehicles: Vec<crossing_sim::simulation_engine::vehicles::VehicleSpec>,
) -> SimResult<()> {
    let config = match config_path {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    let log = ProgressLog::open(&config.log_path, config.log_column_width, config.console_output)?;
    let simulation = Simulation::new(config, log)?;

    let cancel = simulation.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    let report = simulation.run(vehicles).await?;
    println!(
        "{} vehicles exited{}",
        report.exited,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    println!(
        "arbiter: {} decisions, {} authorized, {} denied",
        report.arbiter.decisions, report.arbiter.authorized, report.arbiter.denied
    );
    for (id, stats) in &report.relays {
        println!(
            "relay {}: {} forwarded, {} applied, {} departures, {} violations",
            id, stats.forwarded, stats.applied, stats.departures, stats.violations
        );
    }
    Ok(())
}
