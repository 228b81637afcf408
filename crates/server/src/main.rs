mod config;
mod events;
mod server;

use anyhow::{Context, Result, bail};
use clap::Parser;

use skein::zone::{InProcessFabric, NeighborZone, ZoneRect};

use config::ZoneConfig;
use server::ZoneServer;

#[derive(Parser)]
#[command(name = "skein-server")]
#[command(about = "Authoritative zone server for a seamless-world fleet")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 27015)]
    port: u16,

    #[arg(short, long, default_value_t = 1)]
    zone_id: u32,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    /// Core region as min_x,min_z,max_x,max_z.
    #[arg(long, default_value = "-1024,-1024,1024,1024")]
    core: String,

    /// Adjacent zone, repeatable: zone_id:host:port:min_x,min_z,max_x,max_z
    #[arg(long = "neighbor")]
    neighbors: Vec<String>,

    /// Shared fleet secret for handoff tokens (hex).
    #[arg(long, default_value = "5ea15ea15ea15ea1")]
    handoff_secret: String,
}

fn parse_rect(spec: &str) -> Result<ZoneRect> {
    let parts: Vec<f32> = spec
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("bad rect '{spec}'"))?;
    if parts.len() != 4 {
        bail!("rect '{spec}' needs min_x,min_z,max_x,max_z");
    }
    Ok(ZoneRect::new(parts[0], parts[1], parts[2], parts[3]))
}

fn parse_neighbor(spec: &str) -> Result<NeighborZone> {
    let mut parts = spec.splitn(4, ':');
    let zone_id = parts
        .next()
        .context("missing zone id")?
        .parse::<u32>()
        .with_context(|| format!("bad neighbor '{spec}'"))?;
    let host_str = parts.next().context("missing host")?;
    let port = parts
        .next()
        .context("missing port")?
        .parse::<u16>()
        .with_context(|| format!("bad neighbor '{spec}'"))?;
    let core = parse_rect(parts.next().context("missing rect")?)?;

    let octets: Vec<u8> = host_str
        .split('.')
        .map(|o| o.parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("bad host '{host_str}'"))?;
    if octets.len() != 4 {
        bail!("host '{host_str}' must be dotted quad");
    }

    Ok(NeighborZone {
        zone_id,
        core,
        host: [octets[0], octets[1], octets[2], octets[3]],
        port,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let neighbors = args
        .neighbors
        .iter()
        .map(|spec| parse_neighbor(spec))
        .collect::<Result<Vec<_>>>()?;

    let config = ZoneConfig {
        zone_id: args.zone_id,
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        core: parse_rect(&args.core)?,
        neighbors,
        handoff_secret: u64::from_str_radix(&args.handoff_secret, 16)
            .context("handoff secret must be hex")?,
        ..Default::default()
    };

    // Single-process fabric; a shared-cache-backed bus plugs in here for
    // multi-host fleets.
    let fabric = InProcessFabric::new();
    let bus = fabric.attach(config.zone_id);

    let mut server = ZoneServer::new(&bind_addr, config, bus)
        .with_context(|| format!("binding {bind_addr}"))?;

    log::info!(
        "zone {} listening on {}",
        server.zone_id(),
        server.local_addr()
    );
    server.run();
    log::info!("zone {} shut down", server.zone_id());

    Ok(())
}
