// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了分发核心遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 路由表可注册的 HTTP 方法（固定枚举集合）。
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 静态文件处理器使用的 MIME 类型映射表。

use std::{collections::HashMap, fmt, str::FromStr};

use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "webapp";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        // 2xx
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");
        map.insert(206, "Partial Content");

        // 3xx
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(413, "Content Too Large");
        map.insert(415, "Unsupported Media Type");
        map.insert(418, "I'm a teapot");
        map.insert(422, "Unprocessable Content");
        map.insert(429, "Too Many Requests");

        // 5xx
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表，供静态文件处理器设置 `Content-Type`。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("css", "text/css;charset=utf-8");
        map.insert("csv", "text/csv");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html;charset=utf-8");
        map.insert("html", "text/html;charset=utf-8");
        map.insert("ico", "image/x-icon");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("js", "text/javascript;charset=utf-8");
        map.insert("json", "application/json");
        map.insert("mjs", "text/javascript");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("tar", "application/x-tar");
        map.insert("txt", "text/plain");
        map.insert("wasm", "application/wasm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map
    };
}

/// 路由表支持的 HTTP 请求方法。
///
/// 集合是封闭的：不在其中的方法在分发入口直接得到 405。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl HttpMethod {
    /// 全部受支持的方法，顺序即 `Allow` 头的输出顺序
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Head,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// 该方法的请求是否可能携带需要解析的请求体
    pub fn has_body(&self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    /// 方法名大小写不敏感，`"get"` 与 `"GET"` 等价
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            "PATCH" => Ok(HttpMethod::Patch),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for HttpMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 查询状态码的原因短语，未登记的状态码返回 `"Unknown"`
pub fn reason_phrase(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>(), Ok(HttpMethod::Get));
        assert_eq!("Patch".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
        assert_eq!("DELETE".parse::<HttpMethod>(), Ok(HttpMethod::Delete));
    }

    #[test]
    fn test_method_parse_unknown() {
        assert_eq!("BREW".parse::<HttpMethod>(), Err("BREW".to_string()));
        assert!("".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_method_display_roundtrip_all() {
        for method in HttpMethod::ALL {
            assert_eq!(method.to_string().parse::<HttpMethod>(), Ok(method));
        }
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(405), "Method Not Allowed");
        assert_eq!(reason_phrase(799), "Unknown");
    }

    #[test]
    fn test_has_body() {
        assert!(HttpMethod::Post.has_body());
        assert!(!HttpMethod::Get.has_body());
        assert!(!HttpMethod::Head.has_body());
    }
}
