use clap::Parser;
use kvlog::config::{DEFAULT_AOF_PATH, DEFAULT_PORT};
use kvlog::{server, Config, Error};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The port to listen on
    #[arg(short, long, env = "KVLOG_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// The address to bind to
    #[arg(short, long, env = "KVLOG_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Path of the append-only file
    #[arg(long, env = "KVLOG_AOF", default_value = DEFAULT_AOF_PATH)]
    aof: PathBuf,

    /// How often the append-only file is synced to disk, in milliseconds
    #[arg(long, env = "KVLOG_SYNC_INTERVAL_MS", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(1..))]
    sync_interval_ms: u64,

    /// Largest accepted request, in bytes
    #[arg(long, env = "KVLOG_MAX_FRAME_SIZE", default_value_t = kvlog::codec::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let config = Config::builder()
        .port(args.port)
        .bind_addr(args.bind)
        .aof_path(args.aof)
        .sync_interval(Duration::from_millis(args.sync_interval_ms))
        .max_frame_size(args.max_frame_size)
        .build();

    server::run(config).await
}
