// Headless bot: joins a relay and wanders until interrupted.

use osrs_relay::{bot, config};
use tokio_util::sync::CancellationToken;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("relay-bot {}", VERSION);
            return Ok(());
        }
    }

    osrs_relay::init_logging();
    let cfg = config::load();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let stop = CancellationToken::new();
    rt.block_on(async {
        let mut worker = {
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || bot::run(&cfg, &stop))
        };
        tokio::select! {
            r = osrs_relay::shutdown_signal() => r?,
            r = &mut worker => return r?,
        }
        stop.cancel();
        worker.await?
    })
}
