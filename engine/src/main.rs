use std::path::PathBuf;

use clap::Parser;
use engine::{MetaInfo, Torrent, TorrentConfig};
use rand::Rng;

#[derive(Parser, Debug)]
#[command(about = "Download a single torrent over BitTorrent")]
struct Cli {
    /// Path to the .torrent metainfo file.
    torrent: PathBuf,

    /// Directory to download into; defaults to "./downloads".
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Port reported to trackers in announce requests.
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn peer_id() -> [u8; 20] {
    let mut id = *b"-RS0001-000000000000";
    rand::thread_rng().fill(&mut id[8..]);
    id
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let metainfo = match MetaInfo::new(&args.torrent) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to read torrent file");
            std::process::exit(1);
        }
    };

    let output_dir = args.output_dir.unwrap_or_else(|| PathBuf::from("./downloads"));
    let mut config = TorrentConfig::new(peer_id(), output_dir);
    config.port = args.port;

    let torrent = match Torrent::new(&metainfo, config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise torrent");
            std::process::exit(1);
        }
    };

    if let Err(e) = torrent.run().await {
        tracing::error!(error = %e, "torrent download failed");
        std::process::exit(1);
    }
}
