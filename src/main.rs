use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use daq_controller::adc::AdcSensors;
use daq_controller::config::Config;
use daq_controller::controller::Controller;
use daq_controller::display::LogDisplay;
use daq_controller::gpio::{self, SYSFS_GPIO_ROOT};
use daq_controller::inputs::{InputMonitor, Line};
use daq_controller::shutdown::{shutdown_callback, ExecShutdown, RunFlags};
use daq_controller::sim::{SimAccel, SimAdc, SimIr};
use daq_controller::watchdog::ShutdownWatchdog;

#[derive(Parser, Debug)]
#[command(name = "daq_controller")]
#[command(about = "Off-road car data acquisition controller", long_about = None)]
struct Args {
    /// JSON configuration file (defaults are used for missing fields)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Session log directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Loop period in milliseconds (0 = as fast as the sensors allow)
    #[arg(long)]
    period_ms: Option<u64>,

    /// No GPIO hardware: input lines stay inactive unless --bench drives them
    #[arg(long)]
    simulate: bool,

    /// Drive the input lines from stdin (`logging on`, `shutdown press`, ...)
    #[arg(long)]
    bench: bool,

    /// Simulated devices report the testing harness as fitted
    #[arg(long)]
    extended: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }
    if let Some(period) = args.period_ms {
        config.loop_period_ms = period;
    }
    config.validate()?;

    log::info!("DAQ controller starting");
    log::info!("  Log dir: {}", config.log_dir.display());
    log::info!("  Loop period: {:?} (0 = free-running)", config.loop_period());
    log::info!("  Shutdown hold: {:?}", config.shutdown_hold());
    log::info!(
        "  Inputs: {}",
        if args.bench {
            "bench (stdin)"
        } else if args.simulate {
            "none"
        } else {
            "sysfs GPIO"
        }
    );

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating {}", config.log_dir.display()))?;

    let flags = Arc::new(RunFlags::new());

    let monitor = Arc::new(InputMonitor::new());
    for line in Line::ALL {
        monitor.configure(line, gpio::active_level(line), config.debounce());
    }

    let watchdog = ShutdownWatchdog::new(config.shutdown_hold());
    let system = Arc::new(ExecShutdown::new(&config.shutdown_command)?);
    watchdog.on_shutdown(shutdown_callback(Arc::clone(&flags), system));
    monitor.subscribe(Line::Shutdown, watchdog.listener());

    // Edge delivery runs until every edge source is gone
    let (edge_tx, edge_rx) = mpsc::channel(64);
    let _monitor_handle = tokio::spawn(Arc::clone(&monitor).run(edge_rx));

    let _edge_handle = if args.bench {
        Some(tokio::spawn(async move {
            if let Err(e) = gpio::bench_loop(edge_tx).await {
                log::error!("[GPIO] bench input failed: {}", e);
            }
        }))
    } else if args.simulate {
        drop(edge_tx);
        None
    } else {
        let root = PathBuf::from(SYSFS_GPIO_ROOT);
        let pins = config.pins;
        let stop = Arc::clone(&flags);
        Some(tokio::spawn(async move {
            if let Err(e) = gpio::sysfs_loop(edge_tx, root, pins).await {
                log::error!("[GPIO] {}; stopping", e);
                stop.request_stop();
            }
        }))
    };

    let interrupt = Arc::clone(&flags);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping");
            interrupt.request_stop();
        }
    });

    // Bus drivers are supplied per board; this binary runs the simulated devices
    let sensors = AdcSensors::new(
        SimAdc::new(args.extended),
        SimIr::new(args.extended),
        SimAccel::new(),
    );
    let mut controller = Controller::new(
        &config,
        sensors,
        LogDisplay::new(),
        Arc::clone(&monitor),
        Arc::clone(&flags),
    );
    controller.start().context("starting sensors and display")?;
    controller.run().await?;

    log::info!("DAQ controller stopped");
    Ok(())
}
