// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求模块
//!
//! 该模块定义了请求在分发核心中的两种形态：
//! 1. [`Envelope`]：传输层交给分发核心的原始信封（方法、路径、查询串、标头、只读一次的请求体）。
//!    演示服务器通过 [`Envelope::parse`] 从 TCP 读取的字节中构建它。
//! 2. [`Request`]：一次分发周期内的请求对象，携带解码后的路径、各类参数、Cookie 与 `vars` 暂存区。
//!    `forward` 时会基于旧请求构造一个全新的 `Request`。

use std::{
    collections::HashMap,
    fmt,
    io::{self, Cursor, Read},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use log::error;
use serde_json::Value;

use crate::{
    cookie::parse_cookie_header,
    exception::WireError,
    param::{HttpMethod, CRLF},
    route::Splat,
};

/// 全局请求 ID，用于在多线程环境下追踪日志
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// 传输层交给分发核心的请求信封。
///
/// 方法以原始文本保存：不受支持的方法要到分发入口才被拒绝。
pub struct Envelope {
    method: String,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Box<dyn Read + Send>,
    streaming: bool,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl Envelope {
    /// `path` 可以带查询串，`?` 之后的部分会被拆分到 `query`
    pub fn new(method: &str, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (path.to_string(), String::new()),
        };
        Self {
            method: method.to_string(),
            path,
            query,
            headers: Vec::new(),
            body: Box::new(io::empty()),
            streaming: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Box::new(Cursor::new(body.into()));
        self
    }

    pub fn with_reader(mut self, reader: Box<dyn Read + Send>) -> Self {
        self.body = reader;
        self
    }

    /// 传输层是否支持延迟产生的响应体
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    /// 请求头中声明的请求体长度
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse().ok())
    }

    /// 从原始字节缓冲区构建信封。
    ///
    /// # 逻辑步骤
    /// 1. 在缓冲区中定位头部结束标记 `\r\n\r\n`，其后的字节作为请求体。
    /// 2. 验证编码：确保头部是合法的 UTF-8 字符串。
    /// 3. 解析请求行：提取方法、路径和协议版本。
    /// 4. 逐行解析标头，保留原始顺序。
    ///
    /// 方法名在这里不做校验。
    pub fn parse(buffer: &[u8], id: u64) -> Result<Self, WireError> {
        // 1. 拆分头部与请求体
        let header_end = match find_subsequence(buffer, b"\r\n\r\n") {
            Some(pos) => pos,
            None => {
                error!("[ID{}]HTTP请求头不完整", id);
                return Err(WireError::Incomplete);
            }
        };
        let body = buffer[header_end + 4..].to_vec();

        // 2. 将字节流转换为字符串，失败则判定为非法的 HTTP 请求
        let head = match std::str::from_utf8(&buffer[..header_end]) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(WireError::NotUtf8);
            }
        };
        let mut request_lines = head.split(CRLF);

        // 3. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let request_line = request_lines.next().unwrap_or_default();
        let first_line_parts: Vec<&str> = request_line.split(' ').collect();
        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(WireError::MalformedRequestLine(request_line.to_string()));
        }

        let version = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        if version != "HTTP/1.1" && version != "HTTP/1.0" {
            error!("[ID{}]不支持的HTTP协议版本：{}", id, &version);
            return Err(WireError::UnsupportedVersion(version));
        }

        // 考虑到路径中可能包含空格的情况，虽然不规范但通过 join 尝试恢复
        let target = first_line_parts[1..first_line_parts.len() - 1].join(" ");
        let mut envelope = Envelope::new(first_line_parts[0], &target).with_body(body);

        // 4. 迭代各行解析 Headers
        for line in request_lines {
            if let Some((name, value)) = line.split_once(':') {
                envelope
                    .headers
                    .push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Ok(envelope)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// 一次分发周期内的请求
#[derive(Debug, Clone)]
pub struct Request {
    id: u64,
    method: HttpMethod,
    /// 解码后的请求路径（不含查询串）
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    streaming: bool,
    query_params: HashMap<String, String>,
    body_params: HashMap<String, String>,
    /// 由序列化引擎反序列化出的请求体
    data: Option<Value>,
    route_params: HashMap<String, String>,
    splat: Vec<Splat>,
    cookies: HashMap<String, String>,
    vars: HashMap<String, Value>,
}

impl Request {
    /// 消费信封构建请求。请求体在这里被完整读取，且只读取一次
    pub fn new(method: HttpMethod, envelope: Envelope) -> io::Result<Self> {
        let Envelope {
            path,
            query,
            headers,
            mut body,
            streaming,
            ..
        } = envelope;

        let mut raw_body = Vec::new();
        body.read_to_end(&mut raw_body)?;

        let path = match urlencoding::decode(&path) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => path,
        };
        let query_params = parse_form(query.as_bytes());
        let cookies = headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .fold(HashMap::new(), |mut acc, (_, v)| {
                for (name, value) in parse_cookie_header(v) {
                    acc.entry(name).or_insert(value);
                }
                acc
            });

        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            method,
            path,
            query,
            headers,
            body: Bytes::from(raw_body),
            streaming,
            query_params,
            body_params: HashMap::new(),
            data: None,
            route_params: HashMap::new(),
            splat: Vec::new(),
            cookies,
            vars: HashMap::new(),
        })
    }

    /// 为 `forward` 构造新请求。
    ///
    /// 标头、请求体、请求体参数、`vars` 与 Cookie 原样保留；路径替换为 `path`；
    /// `params` 合并进查询参数；路由参数与 splat 清空。
    pub fn forwarded(
        &self,
        path: &str,
        params: Option<HashMap<String, String>>,
        method: Option<HttpMethod>,
    ) -> Self {
        let mut request = self.clone();
        request.path = path.to_string();
        if let Some(method) = method {
            request.method = method;
        }
        if let Some(params) = params {
            request.query_params.extend(params);
        }
        request.route_params.clear();
        request.splat.clear();
        request
    }
}

/// 解析 `application/x-www-form-urlencoded` 数据，同名参数以第一次出现的为准
pub fn parse_form(input: &[u8]) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(input) {
        params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    params
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        &self.query
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

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 传输层是否支持流式响应
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn body_params(&self) -> &HashMap<String, String> {
        &self.body_params
    }

    pub fn set_body_params(&mut self, params: HashMap<String, String>) {
        self.body_params = params;
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// 设置反序列化后的请求体；顶层对象的标量字段同时成为请求体参数，
    /// 嵌套的对象与数组只能经 [`Request::data`] 访问
    pub fn set_data(&mut self, data: Value) {
        if let Value::Object(map) = &data {
            for (k, v) in map {
                let value = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(_) | Value::Bool(_) => v.to_string(),
                    _ => continue,
                };
                self.body_params.insert(k.clone(), value);
            }
        }
        self.data = Some(data);
    }

    pub fn route_params(&self) -> &HashMap<String, String> {
        &self.route_params
    }

    pub fn route_param(&self, name: &str) -> Option<&str> {
        self.route_params.get(name).map(String::as_str)
    }

    pub fn set_route_params(&mut self, params: HashMap<String, String>) {
        self.route_params = params;
    }

    pub fn splat(&self) -> &[Splat] {
        &self.splat
    }

    pub fn set_splat(&mut self, splat: Vec<Splat>) {
        self.splat = splat;
    }

    /// 放弃上一条路由的捕获结果（`pass` 之后）
    pub fn clear_captures(&mut self) {
        self.route_params.clear();
        self.splat.clear();
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    pub fn vars(&self) -> &HashMap<String, Value> {
        &self.vars
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// 统一参数视图：路由参数 > 请求体参数 > 查询参数
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route_params
            .get(name)
            .or_else(|| self.body_params.get(name))
            .or_else(|| self.query_params.get(name))
            .map(String::as_str)
    }

    /// 合并后的全部参数，优先级同 [`Request::param`]
    pub fn params(&self) -> HashMap<String, String> {
        let mut params = self.query_params.clone();
        params.extend(self.body_params.clone());
        params.extend(self.route_params.clone());
        params
    }
}
