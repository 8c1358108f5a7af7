//! 二进制 ↔ 文本编解码
//!
//! 块数据以 base64 文本放进 JSON 字符串。编码使用 URL 安全字母表且不带填充
//! (与中继服务器转发时的格式一致)；解码同时接受标准字母表和 URL 安全字母表，
//! 有无填充均可。

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

use crate::error::DecodeError;

/// 编码一个块
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 解码一个块
///
/// 先把 URL 安全字符换回标准字母表，再补齐 `=` 填充，最后按标准 base64 解码。
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    let mut normalized: String = text
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    match normalized.len() % 4 {
        0 => {}
        1 => return Err(DecodeError::InvalidLength(normalized.len())),
        rem => normalized.extend(std::iter::repeat_n('=', 4 - rem)),
    }

    STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}
