// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应模块
//!
//! [`Response`] 是分发周期内可变的响应载体：状态码、有序标头、响应体，
//! 以及 `halted` / `passed` / `has_content` 三个控制标志。
//! 响应体可以是已物化的字节，也可以是在标头写出之后才执行的延迟生产者。

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use bytes::Bytes;
use chrono::prelude::*;

use crate::param::{reason_phrase, CRLF, SERVER_NAME};

/// 延迟响应体的生产者：在状态码与标头写出之后被调用一次
pub type Producer = Arc<dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream { length: u64, producer: Producer },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::Stream { length, .. } => f.debug_struct("Stream").field("length", length).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Body,
    /// 内容已由路由或钩子确定，路由返回值不再覆盖它
    has_content: bool,
    halted: bool,
    passed: bool,
    date: DateTime<Utc>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Body::Empty,
            has_content: false,
            halted: false,
            passed: false,
            date: Utc::now(),
        }
    }

    /// 纯文本响应，用于分发核心之外的兜底错误（405、最外层 500）
    pub fn plain(status: u16, text: &str) -> Self {
        let mut response = Self::new();
        response.status = status;
        response.set_content_type("text/plain");
        response.set_content(Bytes::copy_from_slice(text.as_bytes()));
        response
    }
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn information(&self) -> &'static str {
        reason_phrase(self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 标头名大小写不敏感，返回第一个匹配值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 所有同名标头的值（如多个 `Set-Cookie`）
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// 替换同名标头
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// 追加标头，保留已有的同名标头
    pub fn push_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// 已物化的响应体；流式响应体返回 `None`
    pub fn content(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// 以 UTF-8 文本读取已物化的响应体
    pub fn text(&self) -> String {
        match &self.body {
            Body::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            _ => String::new(),
        }
    }

    /// 设置内容并标记为已确定
    pub fn set_content(&mut self, content: Bytes) {
        self.body = Body::Bytes(content);
        self.has_content = true;
    }

    /// 设置延迟响应体
    pub fn set_stream(&mut self, length: u64, producer: Producer) {
        self.body = Body::Stream { length, producer };
        self.has_content = true;
    }

    /// 丢弃已缓冲的内容（`pass` 之后）
    pub fn clear_content(&mut self) {
        self.body = Body::Empty;
        self.has_content = false;
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream { .. })
    }

    pub fn content_length(&self) -> u64 {
        match &self.body {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::Stream { length, .. } => *length,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_passed(&self) -> bool {
        self.passed
    }

    pub fn set_passed(&mut self, passed: bool) {
        self.passed = passed;
    }

    /// 设置重定向；内容被标记为已确定（空）
    pub fn redirect(&mut self, location: &str, status: u16) {
        self.status = status;
        self.set_header("Location", location);
        self.set_content(Bytes::new());
    }
}

impl Response {
    /// 状态行与标头部分
    fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}{}",
            self.status,
            self.information(),
            CRLF
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str(CRLF);
        }
        head.push_str(&format!("Content-Length: {}{}", self.content_length(), CRLF));
        head.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        head.push_str(&format!("Server: {}{}", SERVER_NAME, CRLF));
        head.push_str(CRLF);
        head.into_bytes()
    }

    /// 完整的报文字节；流式响应体只包含状态行与标头
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = self.head_bytes();
        if let Body::Bytes(b) = &self.body {
            bytes.extend_from_slice(b);
        }
        bytes
    }

    /// 写出整个响应。`head_only` 为真时（HEAD 请求）只写状态行与标头
    pub fn write_to(&self, writer: &mut dyn Write, head_only: bool) -> io::Result<()> {
        writer.write_all(&self.head_bytes())?;
        if !head_only {
            match &self.body {
                Body::Empty => {}
                Body::Bytes(b) => writer.write_all(b)?,
                Body::Stream { producer, .. } => producer(&mut *writer)?,
            }
        }
        writer.flush()
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
