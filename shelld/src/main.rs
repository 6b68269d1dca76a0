use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use daemon_common::{LogLevel, init_tracing, maybe_daemonize};
use shelld::{AssetManifest, CACHE_GENERATION, ShellConfig};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shelld", about = "Offline caching proxy for the ARGUS Glass shell")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,

    /// Origin of the app server
    #[arg(long, env = "SHELLD_UPSTREAM", default_value = "http://127.0.0.1:3000")]
    upstream: Url,

    /// Directory for the persistent cache; memory only when omitted
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Cache generation tag
    #[arg(long, default_value = CACHE_GENERATION)]
    generation: String,

    /// Asset paths to pre-cache (repeatable); defaults to the built-in manifest
    #[arg(long = "precache", value_name = "PATH")]
    precache: Vec<String>,

    /// Logging verbosity level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Run as a background daemon
    #[arg(short = 'd', long)]
    daemon: bool,
}

impl Cli {
    fn into_config(self) -> ShellConfig {
        let manifest = if self.precache.is_empty() {
            AssetManifest::default()
        } else {
            AssetManifest::new(self.precache)
        };
        ShellConfig {
            listen: self.listen,
            upstream: self.upstream,
            cache_dir: self.cache_dir,
            generation: self.generation,
            manifest,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);
    maybe_daemonize(cli.daemon)?;
    tokio::runtime::Runtime::new()?.block_on(shelld::run(cli.into_config()))
}
