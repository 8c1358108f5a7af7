//! PeerDrop CLI
//!
//! 命令行客户端：经由中继服务器发送或接收单个文件

mod output;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use output::ConsoleProgress;
use peerdrop_core::{AppSettings, ReceiveSession, RoomId, SendSession, format_size};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peerdrop", version, about = "PeerDrop - 经由中继的点对点文件传输")]
struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 发送文件
    Send {
        /// 要发送的文件路径
        file: PathBuf,
        /// 中继服务器地址
        #[arg(short, long)]
        relay: Option<String>,
        /// 块大小 (字节)
        #[arg(short, long)]
        chunk_size: Option<usize>,
    },
    /// 接收文件
    Receive {
        /// 发送方给出的 6 位房间号
        room_id: String,
        /// 中继服务器地址
        #[arg(short, long)]
        relay: Option<String>,
        /// 保存目录 (默认: 设置中的下载目录)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 查看当前设置
    Config {
        /// 把当前生效的设置写入配置文件
        #[arg(long)]
        save: bool,
    },
}

fn init_logging(verbose: bool) {
    // 桥接 log crate（peerdrop-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = AppSettings::load();
    init_logging(cli.verbose || settings.verbose);

    match cli.command {
        Commands::Send {
            file,
            relay,
            chunk_size,
        } => {
            if let Some(url) = relay {
                settings.apply_relay_override(&url);
            }
            if let Some(size) = chunk_size {
                settings.chunk_size = size;
            }
            send(&settings, file).await?;
        }
        Commands::Receive {
            room_id,
            relay,
            output,
        } => {
            if let Some(url) = relay {
                settings.apply_relay_override(&url);
            }
            let dir = output.unwrap_or_else(|| settings.download_dir.clone());
            receive(&settings, &room_id, dir).await?;
        }
        Commands::Config { save } => {
            println!("配置文件: {}", AppSettings::config_path().display());
            println!("   中继地址: {}", settings.relay_url);
            println!("   块大小:   {}", format_size(settings.chunk_size as u64));
            println!("   下载目录: {}", settings.download_dir.display());
            println!("   详细日志: {}", settings.verbose);
            if save {
                settings.save().context("failed to save settings")?;
                println!("💾 已保存");
            }
        }
    }

    Ok(())
}

async fn send(settings: &AppSettings, file: PathBuf) -> Result<()> {
    if !file.is_file() {
        bail!("not a file: {}", file.display());
    }

    println!("📤 发送文件: {}", file.display());
    let progress = ConsoleProgress;
    let mut session = SendSession::open(&settings.transfer_config(), &progress).await?;

    println!();
    println!("🔑 房间号: {}", session.room_id());
    println!("   在接收端运行: peerdrop receive {}", session.room_id());
    println!();

    let result = async {
        session.wait_for_guest(&progress).await?;
        session.send_file(&file, &progress).await
    }
    .await;
    session.close().await;

    let summary = result?;
    println!(
        "   共 {} 块, {}",
        summary.chunks,
        format_size(summary.bytes)
    );
    Ok(())
}

async fn receive(settings: &AppSettings, room_id: &str, dir: PathBuf) -> Result<()> {
    let room_id = RoomId::parse(room_id)?;

    println!("📥 加入房间 {} (保存到: {})", room_id, dir.display());
    let progress = ConsoleProgress;
    let mut session = ReceiveSession::join(&settings.transfer_config(), room_id, &progress).await?;

    let result = session.next_file(&progress).await;
    session.close().await;

    let file = result?;
    let path = file
        .save_to(&dir)
        .await
        .with_context(|| format!("failed to save into {}", dir.display()))?;
    println!("💾 已保存到: {}", path.display());
    Ok(())
}
