//! PeerDrop Relay Server
//!
//! 独立运行的中继服务器，供 `peerdrop send` / `peerdrop receive` 连接。

use anyhow::Result;
use clap::Parser;
use peerdrop_relay::{DEFAULT_LISTEN_ADDR, DEFAULT_MAX_MESSAGE_SIZE, RelayConfig, RelayServer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peerdrop-relay")]
#[command(about = "PeerDrop 中继服务器", long_about = None)]
#[command(version)]
struct Cli {
    /// 监听地址
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// 单条消息最大字节数
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 桥接 log crate（peerdrop-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if cli.verbose {
        "debug"
    } else {
        "info,peerdrop_core=debug,peerdrop_relay=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();

    tracing::info!("PeerDrop relay starting...");

    let server = RelayServer::bind(RelayConfig {
        listen_addr: cli.listen,
        max_message_size: cli.max_message_size,
    })
    .await?;

    tokio::select! {
        res = server.run() => {
            tracing::error!("Relay exited: {:?}", res);
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
