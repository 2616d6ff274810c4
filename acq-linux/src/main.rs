// acq-linux: discover and toggle controllers, emulate one, or run an acquisition session.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use acq_core::{DeviceRecord, DeviceRegistry, SerialNumber};
use acq_linux::config::{self, Config};
use acq_linux::netif::resolve_identity;
use acq_linux::sink::NotificationSender;
use acq_linux::{
    notification_channel, spawn_persistence_worker, spawn_visualization_worker,
    AcquisitionCoordinator, ControlClient, DeviceEmulator, LogSink, SyntheticSource, TextFileSink,
};
use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str =
    "usage: acq-linux [--version] <discover | connect <ip> | disconnect <ip> | emulate [serial-hex] | run [seconds]>";

/// Per-channel rate of the synthetic source.
const SYNTHETIC_RATE: f64 = 50_000.0;
const SYNTHETIC_MAX_FRAGMENT: usize = 1024;

enum Command {
    Discover,
    Connect(Ipv4Addr),
    Disconnect(Ipv4Addr),
    Emulate(Option<SerialNumber>),
    Run(Option<u64>),
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().map(String::as_str);
    let cmd = match it.next() {
        Some("discover") => Command::Discover,
        Some("connect") => Command::Connect(parse_ip(it.next())?),
        Some("disconnect") => Command::Disconnect(parse_ip(it.next())?),
        Some("emulate") => Command::Emulate(it.next().map(parse_serial).transpose()?),
        Some("run") => Command::Run(
            it.next()
                .map(|s| s.parse().context("seconds must be a whole number"))
                .transpose()?,
        ),
        Some(other) => bail!("unknown command {other:?}\n{USAGE}"),
        None => bail!(USAGE),
    };
    if let Some(extra) = it.next() {
        bail!("unexpected argument {extra:?}\n{USAGE}");
    }
    Ok(cmd)
}

fn parse_ip(arg: Option<&str>) -> anyhow::Result<Ipv4Addr> {
    let s = arg.context("missing controller IPv4 address")?;
    s.parse().with_context(|| format!("invalid IPv4 address {s:?}"))
}

/// 32 hex digits, optionally separated by `:`.
fn parse_serial(s: &str) -> anyhow::Result<SerialNumber> {
    let hex: String = s.chars().filter(|c| *c != ':').collect();
    if hex.len() != 32 {
        bail!("serial must be 16 bytes of hex, got {s:?}");
    }
    let mut bytes = [0u8; 16];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .with_context(|| format!("invalid hex in serial {s:?}"))?;
    }
    Ok(SerialNumber(bytes))
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("acq-linux {}", VERSION);
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("acq_linux=info,acq_core=info")),
        )
        .init();

    let cmd = parse_args(&args)?;
    let cfg = config::load();
    acq_core::config::validate(&cfg.protocol, &cfg.acquisition).context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cmd {
            Command::Emulate(serial) => emulate(&cfg, serial).await,
            Command::Discover => {
                let (tx, _rx) = notification_channel();
                let client = control_client(&cfg, tx).await?;
                client.discover().await.context("no controller answered")?;
                print_devices(&client.registry().snapshot());
                Ok(())
            }
            Command::Connect(ip) => toggle(&cfg, ip, true).await,
            Command::Disconnect(ip) => toggle(&cfg, ip, false).await,
            Command::Run(seconds) => run(cfg, seconds).await,
        }
    })
}

async fn control_client(
    cfg: &Config,
    events: NotificationSender,
) -> anyhow::Result<Arc<ControlClient>> {
    let identity = resolve_identity(
        cfg.interface.as_deref(),
        cfg.local_ip,
        cfg.protocol.broadcast_addr,
        cfg.protocol.device_port,
    )
    .context("resolving local identity")?;
    let client = ControlClient::bind(
        cfg.protocol.clone(),
        identity,
        Arc::new(DeviceRegistry::new()),
        events,
    )
    .await
    .with_context(|| format!("binding UDP port {}", cfg.protocol.local_port))?;
    Ok(Arc::new(client))
}

fn print_devices(devices: &[DeviceRecord]) {
    for d in devices {
        println!("{}\t{}\t{}\t{}", d.ip, d.link_ip, d.serial, d.status);
    }
}

/// Probe first so the toggle reply has a record to apply to.
async fn toggle(cfg: &Config, ip: Ipv4Addr, connect: bool) -> anyhow::Result<()> {
    let (tx, _rx) = notification_channel();
    let client = control_client(cfg, tx).await?;
    if let Err(e) = client.discover().await {
        tracing::warn!(error = %e, "discovery failed, sending anyway");
    }
    client
        .set_connection(ip, connect)
        .await
        .with_context(|| format!("{} {ip}", if connect { "connect" } else { "disconnect" }))?;
    print_devices(&client.registry().snapshot());
    Ok(())
}

async fn emulate(cfg: &Config, serial: Option<SerialNumber>) -> anyhow::Result<()> {
    let serial = serial.unwrap_or_else(|| SerialNumber(rand::random()));
    let emu = DeviceEmulator::bind((Ipv4Addr::UNSPECIFIED, cfg.protocol.device_port).into(), serial)
        .await
        .with_context(|| format!("binding UDP port {}", cfg.protocol.device_port))?;
    tokio::select! {
        r = emu.run() => r.context("emulator stopped")?,
        r = shutdown_signal() => r?,
    }
    Ok(())
}

async fn run(cfg: Config, seconds: Option<u64>) -> anyhow::Result<()> {
    let (events_tx, events_rx) = notification_channel();
    let client = control_client(&cfg, events_tx.clone()).await?;
    let depth = cfg.acquisition.queue_depth;
    let (vis_tx, vis_rx) = mpsc::channel(depth);
    let (file_tx, file_rx) = mpsc::channel(depth);
    let files = TextFileSink::new(&cfg.output_dir)
        .with_context(|| format!("creating {}", cfg.output_dir.display()))?;
    let vis = spawn_visualization_worker(LogSink::default(), events_rx, vis_rx);
    let persist = spawn_persistence_worker(files, file_rx);

    let source = SyntheticSource::new(
        cfg.acquisition.channel_count,
        SYNTHETIC_RATE,
        SYNTHETIC_MAX_FRAGMENT,
    );
    let mut coordinator = AcquisitionCoordinator::new(
        cfg.acquisition.clone(),
        client,
        source,
        vec![vis_tx, file_tx],
        events_tx,
    );
    let session = coordinator.start().await?;
    info!(%session, output = %cfg.output_dir.display(), "running, ctrl-c to stop");

    match seconds {
        Some(s) => tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(s)) => {}
            r = shutdown_signal() => r?,
        },
        None => shutdown_signal().await?,
    }

    let result = coordinator.stop().await;
    // Closes the window queues; the persistence worker finishes what is queued.
    drop(coordinator);
    let files = persist.await?.context("persistence worker")?;
    vis.abort();
    let stats = result?;
    info!(
        windows = stats.windows,
        samples = stats.samples,
        dir = %files.dir().display(),
        "done"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
