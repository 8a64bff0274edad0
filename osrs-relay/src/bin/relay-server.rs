// Relay server: accepts every client and bounces player state between them.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use osrs_relay::{config, relay, Relay, RelayServer};
use tokio_util::sync::CancellationToken;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the pump checks for shutdown while idle.
const POLL: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("relay-server {}", VERSION);
            return Ok(());
        }
    }

    osrs_relay::init_logging();
    let cfg = config::load();

    let mut server = RelayServer::new(cfg.server_config(), Relay::new());
    server.start().context("starting relay")?;

    let stop = CancellationToken::new();
    let pump = {
        let stop = stop.clone();
        thread::Builder::new()
            .name("relay-pump".into())
            .spawn(move || {
                relay::serve(&mut server, &stop, POLL);
                server.stop();
            })?
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(osrs_relay::shutdown_signal())?;
    info!("shutting down");
    stop.cancel();
    pump.join()
        .map_err(|_| anyhow::anyhow!("relay pump panicked"))?;
    Ok(())
}
