//! 终端输出

use peerdrop_core::{
    FileMetadata, ReceiveProgressCallback, ReceiveStatus, ReceivedFile, SendProgressCallback,
    TransferProgress, format_size,
};
use std::io::Write;
use uuid::Uuid;

/// 把进度打印到标准输出
#[derive(Default)]
pub struct ConsoleProgress;

impl ConsoleProgress {
    fn print_progress(progress: &TransferProgress) {
        print!(
            "\r   进度: {:5.1}% ({} / {}, 块 {}/{})",
            progress.percent(),
            format_size(progress.bytes_done),
            format_size(progress.total_bytes),
            progress.chunks_done,
            progress.total_chunks
        );
        let _ = std::io::stdout().flush();
        if progress.is_complete() {
            println!();
        }
    }
}

impl SendProgressCallback for ConsoleProgress {
    fn on_status(&self, status: &str) {
        println!("   {}", status);
    }

    fn on_participants(&self, count: u32) {
        println!("👥 房间内接收方: {}", count);
    }

    fn on_progress(&self, progress: &TransferProgress) {
        Self::print_progress(progress);
    }

    fn on_complete(&self) {
        println!("✅ 发送完成");
    }

    fn on_error(&self, error: &str) {
        eprintln!("\n❌ {}", error);
    }
}

impl ReceiveProgressCallback for ConsoleProgress {
    fn on_status(&self, status: ReceiveStatus) {
        match status {
            ReceiveStatus::Waiting => println!("⏳ 等待发送方..."),
            ReceiveStatus::Receiving => println!("📥 正在接收"),
            ReceiveStatus::Completed | ReceiveStatus::Error => {}
        }
    }

    fn on_file_info(&self, transfer_id: Uuid, metadata: &FileMetadata, total_chunks: u32) {
        println!(
            "📄 {} ({}, {}, {} 块)",
            metadata.name,
            metadata.mime_type,
            format_size(metadata.size),
            total_chunks
        );
        println!("   传输 ID: {}", transfer_id);
    }

    fn on_progress(&self, progress: &TransferProgress) {
        Self::print_progress(progress);
    }

    fn on_complete(&self, file: &ReceivedFile) {
        println!("✅ 接收完成: {} ({})", file.name, format_size(file.len() as u64));
    }

    fn on_error(&self, error: &str) {
        eprintln!("\n❌ {}", error);
    }
}
