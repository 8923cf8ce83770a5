use std::{path::PathBuf, time::Duration};

use clap::Parser;
use miniquery_core::{QueryClient, QueryStatus};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod devices;
mod view;

use devices::{media_devices_query, Devices};
use view::DeviceView;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory whose entries are reported as media devices
    #[arg(short, long, value_name = "DIR", env = "MINIQUERY_DIR", default_value = "/dev/snd")]
    dir: PathBuf,

    /// Artificial delay before enumerating, to show the loading state
    #[arg(long, value_name = "MS", env = "MINIQUERY_DELAY_MS", default_value_t = 500)]
    delay_ms: u64,

    /// Number of views watching the same query
    #[arg(short = 'n', long, default_value_t = 1)]
    observers: usize,

    /// Print the device list as JSON once loaded
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let delay = Duration::from_millis(args.delay_ms);

    let client = QueryClient::<Devices>::new();
    let views: Vec<_> = (0..args.observers.max(1))
        .map(|i| {
            let label = (args.observers > 1).then(|| i.to_string());
            DeviceView::new(label, client.observer(media_devices_query(args.dir.clone(), delay)))
        })
        .collect();

    let subscriptions: Vec<_> = views.iter().map(DeviceView::mount).collect();
    info!(views = views.len(), dir = %args.dir.display(), "Mounted views");

    let state = client
        .observer(media_devices_query(args.dir.clone(), delay))
        .settled()
        .await;
    drop(subscriptions);

    if let (QueryStatus::Success, Some(devices)) = (state.status(), state.data()) {
        debug!(?devices, "Loaded media devices");
        if args.json {
            println!("{}", serde_json::to_string_pretty(&**devices)?);
        }
    }

    Ok(())
}
