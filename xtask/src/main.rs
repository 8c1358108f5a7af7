use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{Shell, cmd};

/// 工作区内可单独测试的包
const PACKAGES: [&str; 3] = ["peerdrop-core", "peerdrop-relay", "peerdrop-cli"];

#[derive(Parser)]
#[command(name = "xtask", about = "PeerDrop 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建中继与命令行客户端 (release)
    Build,
    /// 在本机启动中继服务器
    Relay {
        /// 监听地址
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: String,
        /// peerdrop 各 crate 的日志级别
        #[arg(long, default_value = "debug")]
        log_level: String,
    },
    /// 查询运行中中继的 /health
    Health {
        /// 中继地址
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// 运行测试，可只测一个包
    Test {
        #[arg(short, long, value_parser = clap::builder::PossibleValuesParser::new(PACKAGES))]
        package: Option<String>,
    },
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(project_root()?);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Relay { listen, log_level } => relay(&sh, &listen, &log_level)?,
        Commands::Health { addr } => health(&sh, &addr)?,
        Commands::Test { package } => test(&sh, package.as_deref())?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

/// xtask 位于工作区根目录下一层
fn project_root() -> Result<PathBuf> {
    let root = std::env::var("CARGO_MANIFEST_DIR")
        .ok()
        .map(PathBuf::from)
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));
    match root {
        Some(root) => Ok(root),
        None => Ok(std::env::current_dir()?),
    }
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建 peerdrop-relay 与 peerdrop...");
    cmd!(sh, "cargo build --release -p peerdrop-relay -p peerdrop-cli").run()?;
    println!("✅ 构建完成: target/release/peerdrop-relay, target/release/peerdrop");
    Ok(())
}

fn relay(sh: &Shell, listen: &str, log_level: &str) -> Result<()> {
    println!("🚀 中继服务器: ws://{}/ws", listen);
    println!("   健康检查: http://{}/health", listen);
    println!("   客户端:   PEERDROP_RELAY_URL=ws://{}/ws peerdrop send <FILE>", listen);

    let rust_log = format!(
        "info,peerdrop_core={level},peerdrop_relay={level}",
        level = log_level
    );
    let _env = sh.push_env("RUST_LOG", rust_log);
    cmd!(sh, "cargo run -p peerdrop-relay -- --listen {listen}").run()?;
    Ok(())
}

fn health(sh: &Shell, addr: &str) -> Result<()> {
    let url = format!("http://{}/health", addr);
    let body = cmd!(sh, "curl -fsS {url}").read()?;
    println!("🩺 {}", body);
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>) -> Result<()> {
    match package {
        Some(package) => {
            println!("🧪 测试 {}...", package);
            cmd!(sh, "cargo test -p {package}").run()?;
        }
        None => {
            println!("🧪 测试整个工作区...");
            cmd!(sh, "cargo test --workspace").run()?;
        }
    }
    println!("✅ 测试完成");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ 清理完成");
    Ok(())
}
