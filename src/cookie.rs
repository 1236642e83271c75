// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Cookie 模块
//!
//! 负责 `Cookie` 请求头的解析，以及 `Set-Cookie` 响应头的生成。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// `Set-Cookie` 的日期格式（RFC 1123，固定为 GMT）
const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// 一个将要写回客户端的 Cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    expires: Option<DateTime<Utc>>,
    secure: bool,
    http_only: bool,
    same_site: Option<String>,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            path: None,
            domain: None,
            expires: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn with_domain(mut self, domain: Option<&str>) -> Self {
        self.domain = domain.map(str::to_string);
        self
    }

    pub fn with_expires(mut self, expires: Option<DateTime<Utc>>) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_same_site(mut self, same_site: Option<&str>) -> Self {
        self.same_site = same_site.map(str::to_string);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    /// 生成 `Set-Cookie` 头的值
    pub fn to_header(&self) -> String {
        let mut header = format!(
            "{}={}",
            self.name,
            urlencoding::encode(&self.value)
        );
        if let Some(path) = &self.path {
            header.push_str("; Path=");
            header.push_str(path);
        }
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if let Some(expires) = &self.expires {
            header.push_str("; Expires=");
            header.push_str(&expires.format(COOKIE_DATE_FORMAT).to_string());
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(same_site) = &self.same_site {
            header.push_str("; SameSite=");
            header.push_str(same_site);
        }
        header
    }
}

/// 解析 `Cookie` 请求头，形如 `a=1; b=2`。同名 Cookie 以第一次出现的为准
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        let value = match urlencoding::decode(value) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => value.to_string(),
        };
        cookies.entry(name.to_string()).or_insert(value);
    }
    cookies
}
