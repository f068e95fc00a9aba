use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use offboard_runner::{
    abort_channel,
    config::{default_config_path, read_mission_config},
    setpoint_log::SetpointCsvWriter,
    LinkAddress, MissionConfig, PhaseController, SimulatedVehicle, Trajectory,
    TrajectoryScheduler,
};

#[derive(Parser)]
#[command(name = "Offboard Runner")]
#[command(bin_name = "offboard-runner")]
#[command(about = "Fly a recorded trajectory in offboard mode, then return to launch")]
struct Cli {
    #[arg(short, long, help = "Vehicle link address, e.g. sim://")]
    addr: Option<String>,

    #[arg(short, long, help = "Trajectory CSV")]
    traj: PathBuf,

    #[arg(short, long, help = "Seconds between setpoints [default: 0.1]")]
    itvl: Option<f64>,

    #[arg(short, long, help = "Mission config JSON")]
    config: Option<PathBuf>,

    #[arg(long, help = "Write every emitted setpoint to this CSV")]
    record: Option<PathBuf>,

    #[arg(long, help = "Print the playback plan without connecting")]
    dry_run: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Cli) -> Result<MissionConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = match path {
        Some(path) => read_mission_config(&path)
            .with_context(|| format!("reading mission config {}", path.display()))?,
        None => MissionConfig::default(),
    };
    if let Some(itvl) = args.itvl {
        config.tick_interval_s = itvl;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let _ = env_logger::builder()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .try_init();

    // validated before anything talks to the vehicle
    let trajectory = Trajectory::load(&args.traj)
        .with_context(|| format!("loading trajectory {}", args.traj.display()))?;
    let config = load_config(&args)?;

    if args.dry_run {
        let plan = TrajectoryScheduler::new(config.tick_interval()).plan(&trajectory)?;
        for tick in &plan {
            println!("{:>6} {:>9.3}s waypoint {}", tick.tick, tick.elapsed, tick.index);
        }
        println!(
            "{} waypoints, {} setpoints over {:.2}s",
            trajectory.len(),
            plan.len(),
            plan.len() as f64 * config.tick_interval_s
        );
        return Ok(());
    }

    let address = args
        .addr
        .clone()
        .ok_or_else(|| anyhow!("--addr is required unless --dry-run is given"))?;
    let link = match LinkAddress::parse(&address)? {
        LinkAddress::Simulated => SimulatedVehicle::new(config.simulator.clone()),
    };

    let (abort_handle, abort_signal) = abort_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Operator abort requested, Ctrl-C again exits without waiting for the vehicle");
            abort_handle.abort();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Exiting with the abort sequence unfinished");
            std::process::exit(130);
        }
    });

    let mut controller = PhaseController::new(link, config, abort_signal);
    if let Some(path) = &args.record {
        let recorder = SetpointCsvWriter::create(path)
            .with_context(|| format!("creating setpoint log {}", path.display()))?;
        controller = controller.with_recorder(recorder);
    }

    let report = controller.run(&address, &trajectory).await?;
    info!(
        "-- Mission complete: {} setpoints over {:.2}s, phases {:?}",
        report.playback.ticks, report.playback.elapsed, report.phases
    );
    Ok(())
}
