use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use ledvibe::artnet::{self, DmxPublisher};
use ledvibe::config::{Document, RenderMode};
use ledvibe::mapping::PixelMapper;
use ledvibe::render::{EngineCommand, RenderLoop};
use ledvibe::sink::{LocalDriver, SerialSink, Sink, SinkHandle, UdpSink, PixelOrder};
use ledvibe::stats::Stats;
use ledvibe::sync::{self, SyncMode, TimeBase};
use ledvibe::EngineError;

#[derive(Parser, Debug)]
#[command(name = "ledvibe")]
#[command(author, version, about = "LED strip animation engine with ArtNet/sACN and time sync")]
struct Args {
    /// Number of LEDs on the strip
    #[arg(long, default_value_t = 0)]
    led_count: usize,

    /// LED color channel order: any permutation of RGB, optional trailing W
    #[arg(long, default_value = "GRB")]
    led_pixel_order: String,

    /// Target refresh rate in frames per second
    #[arg(long, default_value_t = 60.0)]
    target_fps: f64,

    /// Configuration document path
    #[arg(long, default_value = "/etc/ledvibe.json")]
    config: PathBuf,

    /// JSON pixel mapping file; its length overrides --led_count
    #[arg(long)]
    pixel_mapping: Option<PathBuf>,

    /// Device the local sink writes pixel bytes to
    #[arg(long, default_value = "/dev/spidev0.0")]
    device: PathBuf,

    /// Baud rate for serial sinks
    #[arg(long, default_value_t = 115_200)]
    serial_baud: u32,

    /// Upper limit on the configured global brightness, 0.0-1.0
    #[arg(long, default_value_t = 1.0)]
    brightness_limit: f32,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ledvibe=info".parse().expect("static directive")),
        )
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<EngineError>()
                .map(EngineError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let order: PixelOrder = args
        .led_pixel_order
        .parse()
        .map_err(EngineError::Config)
        .context("parsing --led_pixel_order")?;

    let mapper = match &args.pixel_mapping {
        Some(path) => {
            let mapper = PixelMapper::from_file(path)?;
            info!(
                leds = mapper.len(),
                "using pixel mapping from {}",
                path.display()
            );
            mapper
        }
        None => PixelMapper::line(args.led_count),
    };
    if mapper.is_empty() {
        return Err(EngineError::config("--led_count must be set (or --pixel_mapping given)").into());
    }
    let mapper = Arc::new(mapper);
    let led_count = mapper.len();

    let document = Document::load(&args.config)?;
    let snapshot = Arc::new(document.build_render_config(
        Arc::clone(&mapper),
        order,
        args.target_fps,
        args.brightness_limit,
    )?);
    info!(
        leds = led_count,
        fps = args.target_fps,
        groups = snapshot.groups.len(),
        "configuration loaded from {}",
        args.config.display()
    );

    let stats = Arc::new(Stats::default());

    // Sink workers, one per binding referenced by the groups.
    let mut sinks = HashMap::new();
    for (mode, target) in document.sink_bindings(led_count) {
        let mut sink: Box<dyn Sink> = match mode {
            RenderMode::Local => Box::new(LocalDriver::open(args.device.clone())?),
            RenderMode::Serial => Box::new(SerialSink::new(target.as_str(), args.serial_baud)),
            RenderMode::Udp => Box::new(UdpSink::new(target.as_str(), ledvibe::sink::DEFAULT_MTU)),
        };
        sink.configure(order, led_count)
            .map_err(|e| EngineError::Hardware(e.to_string()))?;
        let name = match mode {
            RenderMode::Local => "local".to_string(),
            RenderMode::Serial => format!("serial:{target}"),
            RenderMode::Udp => format!("udp:{target}"),
        };
        sinks.insert(name.clone(), SinkHandle::spawn(name, sink, Arc::clone(&stats)));
    }
    let sink_names: Vec<String> = sinks.keys().cloned().collect();

    // Shared animation clock.
    let (sync_tx, time) = TimeBase::new();
    let mut tasks = Vec::new();
    match document.sync_mode() {
        SyncMode::Off => {}
        SyncMode::Master => {
            let interval = document.sync_interval;
            let time = time.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = sync::run_master(interval, time).await {
                    warn!("time sync master stopped: {e:#}");
                }
            }));
        }
        SyncMode::Slave => {
            let stats = Arc::clone(&stats);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = sync::run_slave(sync_tx, stats).await {
                    warn!("time sync slave stopped: {e:#}");
                }
            }));
        }
    }

    // DMX ingestion (ArtNet unicast/broadcast + sACN multicast).
    let dmx_rx = if document.enable_artnet {
        let (publisher, rx) = DmxPublisher::channel();
        let settings = document.artnet_settings(led_count);
        {
            let publisher = Arc::clone(&publisher);
            let stats = Arc::clone(&stats);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = artnet::run_artnet(settings, publisher, stats).await {
                    warn!("ArtNet receiver stopped: {e:#}");
                }
            }));
        }
        {
            let stats = Arc::clone(&stats);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = artnet::run_sacn(settings, publisher, stats).await {
                    warn!("sACN receiver stopped: {e:#}");
                }
            }));
        }
        Some(rx)
    } else {
        None
    };

    // The render thread owns the frame buffers and the tick.
    let (command_tx, command_rx) = mpsc::channel(16);
    let render = RenderLoop::new(
        snapshot,
        command_rx,
        time,
        dmx_rx,
        sinks,
        Arc::clone(&stats),
    )
    .spawn();

    // Configuration applier: SIGHUP reloads the document, validates it
    // and hands the render loop a fresh snapshot at a tick boundary. A
    // bad document leaves the active one in place.
    let applier = {
        let command_tx = command_tx.clone();
        let mapper = Arc::clone(&mapper);
        let config_path = args.config.clone();
        let brightness_limit = args.brightness_limit;
        let target_fps = args.target_fps;
        let known_bindings: std::collections::BTreeSet<String> =
            sink_names.iter().cloned().collect();
        tokio::spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!("SIGHUP handler unavailable: {e}");
                        return;
                    }
                };
            while hangup.recv().await.is_some() {
                info!("SIGHUP: reloading {}", config_path.display());
                let result = Document::load(&config_path)
                    .and_then(|doc| {
                        doc.build_render_config(
                            Arc::clone(&mapper),
                            order,
                            target_fps,
                            brightness_limit,
                        )
                    })
                    .and_then(|snapshot| {
                        // Sinks are opened at startup; a reload may only
                        // rebind groups among the existing ones.
                        for group in &snapshot.groups {
                            if !known_bindings.contains(&group.sink) {
                                return Err(EngineError::config(format!(
                                    "group '{}' binds unknown sink '{}'",
                                    group.name, group.sink
                                )));
                            }
                        }
                        Ok(snapshot)
                    });
                match result {
                    Ok(snapshot) => {
                        let _ = command_tx.send(EngineCommand::Apply(Arc::new(snapshot))).await;
                    }
                    Err(e) => warn!("reload rejected, keeping active configuration: {e}"),
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    // Reverse dependency order: stop taking config changes, stop the
    // render loop (its sink workers flush on the way out), then close
    // the receiver sockets.
    applier.abort();
    let _ = command_tx.send(EngineCommand::Shutdown).await;
    tokio::task::spawn_blocking(move || {
        let _ = render.join();
    })
    .await
    .context("joining render thread")?;
    for task in tasks {
        task.abort();
    }

    info!("shutdown complete");
    Ok(())
}
