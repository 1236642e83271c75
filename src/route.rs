// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模块
//!
//! 路由是不可变的匹配器：方法 + 路径模式 + 处理函数 + 前缀 + 条件。
//!
//! ## 字符串模式语法
//! - `:name`：命名参数，匹配一个路径段；后跟 `?` 表示可选。
//! - `*`：splat，匹配一个路径段，追加到位置参数列表。
//! - `**`：megasplat，匹配路径剩余部分，按 `/` 拆分为一个列表项。
//! - `.` 按字面匹配，其余字符原样进入正则，整体锚定为 `^...$`。
//!
//! 正则模式原样使用（同样锚定）：有命名分组时作为命名参数，否则每个分组都是一个 splat 值。

use std::{collections::HashMap, fmt, sync::Arc};

use regex::Regex;

use crate::{
    context::{Context, Flow},
    exception::{AppError, BoxError},
    param::HttpMethod,
    request::Request,
};

/// 路由处理函数
pub type HandlerFn = Arc<dyn Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync>;

/// 路由位置参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Splat {
    /// `*` 或正则分组捕获的单个值
    One(String),
    /// `**` 捕获并按 `/` 拆分后的列表
    Many(Vec<String>),
}

/// 注册路由时给出的路径模式
#[derive(Debug, Clone)]
pub enum RoutePattern {
    Str(String),
    Regex(Regex),
}

impl From<&str> for RoutePattern {
    fn from(s: &str) -> Self {
        RoutePattern::Str(s.to_string())
    }
}

impl From<String> for RoutePattern {
    fn from(s: String) -> Self {
        RoutePattern::Str(s)
    }
}

impl From<Regex> for RoutePattern {
    fn from(r: Regex) -> Self {
        RoutePattern::Regex(r)
    }
}

/// 捕获分组在模式中的角色
#[derive(Debug, Clone, PartialEq, Eq)]
enum Capture {
    Token(String),
    Splat,
    Megasplat,
}

/// 路由条件：对某个请求头做正则匹配
#[derive(Debug, Clone)]
struct Condition {
    header: &'static str,
    regex: Regex,
}

/// 一次成功匹配的捕获结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    pub params: HashMap<String, String>,
    pub splat: Vec<Splat>,
}

pub struct Route {
    method: HttpMethod,
    /// 加上前缀之后的模式原文，用于判重
    spec: String,
    prefix: Option<String>,
    regex: Regex,
    captures: Vec<Capture>,
    /// 正则模式且包含命名分组
    named_groups: bool,
    conditions: Vec<Condition>,
    handler: HandlerFn,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("spec", &self.spec)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

impl Route {
    pub fn new(
        method: HttpMethod,
        pattern: RoutePattern,
        prefix: Option<&str>,
        conditions: &[(&str, &str)],
        handler: HandlerFn,
    ) -> Result<Self, AppError> {
        let conditions = conditions
            .iter()
            .map(|(key, value)| build_condition(key, value))
            .collect::<Result<Vec<_>, _>>()?;

        let prefix = prefix.filter(|p| !p.is_empty() && *p != "/");
        let (spec, regex, captures, named_groups) = match pattern {
            RoutePattern::Str(s) => {
                let spec = format!("{}{}", prefix.unwrap_or(""), s);
                let (source, captures) = compile_string_pattern(&spec)?;
                let regex = Regex::new(&source).map_err(|e| AppError::InvalidRoute {
                    pattern: spec.clone(),
                    message: e.to_string(),
                })?;
                (spec, regex, captures, false)
            }
            RoutePattern::Regex(r) => {
                let inner = r.as_str().trim_start_matches('^').trim_end_matches('$');
                let source = format!("^{}(?:{})$", regex::escape(prefix.unwrap_or("")), inner);
                let regex = Regex::new(&source).map_err(|e| AppError::InvalidRoute {
                    pattern: r.as_str().to_string(),
                    message: e.to_string(),
                })?;
                let named = regex.capture_names().flatten().next().is_some();
                (source.clone(), regex, Vec::new(), named)
            }
        };

        Ok(Self {
            method,
            spec,
            prefix: prefix.map(str::to_string),
            regex,
            captures,
            named_groups,
            conditions,
            handler,
        })
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// 编译后的正则原文
    pub fn regexp(&self) -> &str {
        self.regex.as_str()
    }

    pub fn handler(&self) -> &HandlerFn {
        &self.handler
    }

    /// 用请求的路径与标头尝试匹配
    pub fn matches(&self, request: &Request) -> Option<RouteMatch> {
        for condition in &self.conditions {
            let value = request.header(condition.header)?;
            if !condition.regex.is_match(value) {
                return None;
            }
        }
        self.match_path(request.path())
    }

    /// 只匹配路径，不检查条件
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        let caps = self.regex.captures(path)?;
        let mut result = RouteMatch::default();

        if self.named_groups {
            for name in self.regex.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    result.params.insert(name.to_string(), m.as_str().to_string());
                }
            }
            return Some(result);
        }

        if self.captures.is_empty() {
            // 正则模式的匿名分组全部作为 splat
            for m in caps.iter().skip(1).flatten() {
                result.splat.push(Splat::One(m.as_str().to_string()));
            }
            return Some(result);
        }

        for (capture, value) in self.captures.iter().zip(caps.iter().skip(1)) {
            let Some(value) = value else {
                continue;
            };
            let value = value.as_str().to_string();
            match capture {
                Capture::Token(name) => {
                    result.params.insert(name.clone(), value);
                }
                Capture::Splat => result.splat.push(Splat::One(value)),
                Capture::Megasplat => result
                    .splat
                    .push(Splat::Many(value.split('/').map(str::to_string).collect())),
            }
        }
        Some(result)
    }

    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<Flow, BoxError> {
        (self.handler)(ctx)
    }
}

fn build_condition(key: &str, value: &str) -> Result<Condition, AppError> {
    let header = match key {
        "user_agent" | "agent" => "user-agent",
        "host" => "host",
        "content_type" => "content-type",
        _ => return Err(AppError::InvalidCondition(key.to_string())),
    };
    let regex = Regex::new(value).map_err(|e| AppError::InvalidRoute {
        pattern: value.to_string(),
        message: e.to_string(),
    })?;
    Ok(Condition { header, regex })
}

/// 把字符串模式编译为正则原文，并记录每个捕获分组的角色
fn compile_string_pattern(pattern: &str) -> Result<(String, Vec<Capture>), AppError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut source = String::from("^");
    let mut captures = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ':' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && !matches!(chars[end], '/' | '.' | '?') {
                    end += 1;
                }
                if end == start {
                    source.push(':');
                    i += 1;
                    continue;
                }
                let name: String = chars[start..end].iter().collect();
                if name == "splat" {
                    return Err(AppError::InvalidRoute {
                        pattern: pattern.to_string(),
                        message: "named placeholder 'splat' is reserved".to_string(),
                    });
                }
                source.push_str("([^/]+)");
                captures.push(Capture::Token(name));
                i = end;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                source.push_str("([^\\n]+)");
                captures.push(Capture::Megasplat);
                i += 2;
            }
            '*' => {
                source.push_str("([^/]+)");
                captures.push(Capture::Splat);
                i += 1;
            }
            '.' => {
                source.push_str("\\.");
                i += 1;
            }
            c => {
                source.push(c);
                i += 1;
            }
        }
    }
    source.push('$');
    Ok((source, captures))
}
