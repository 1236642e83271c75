// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了应用在构建期与请求分发期可能出现的各类异常。
//!
//! ## 分类
//! - [`AppError`]：配置类错误（非法钩子名、不支持的方法、非法引擎名……），在构建/注册期
//!   立即暴露给运维人员，永不恢复。
//! - [`SessionError`]：会话后端错误。`NotFound`/`Expired` 视同“会话不存在”被透明恢复，
//!   其余错误在请求内是致命的。
//! - [`DispatchError`]：分发期的致命错误，最终一定在分发边界被转换为 500 响应。

use std::io;

use thiserror::Error;

use crate::engine::EngineKind;

/// 路由处理函数与钩子返回的动态错误类型。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 构建期（配置、注册）错误。
#[derive(Debug, Error)]
pub enum AppError {
    /// 钩子名不符合 `type.owner.event` 形式
    #[error("Invalid hook name `{0}'")]
    InvalidHookName(String),
    /// 钩子类型不是 core/engine/handler/plugin 之一
    #[error("Unknown hook type `{0}'")]
    UnknownHookType(String),
    /// 路由方法不在受支持的集合中
    #[error("Unsupported HTTP method `{0}'")]
    UnsupportedMethod(String),
    #[error("Cannot load {kind} engine '{name}': illegal engine name")]
    IllegalEngineName { kind: EngineKind, name: String },
    #[error("Cannot load {kind} engine '{name}': no such engine")]
    UnknownEngine { kind: EngineKind, name: String },
    #[error("Failed to set up {kind} engine '{name}': {message}")]
    EngineSetup {
        kind: EngineKind,
        name: String,
        message: String,
    },
    #[error("Invalid route pattern '{pattern}': {message}")]
    InvalidRoute { pattern: String, message: String },
    #[error("Invalid route condition '{0}'")]
    InvalidCondition(String),
    #[error("Unable to read configuration file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Unable to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Unable to run the callback for prefix '{prefix}': {source}")]
    Prefix {
        prefix: String,
        #[source]
        source: Box<AppError>,
    },
}

/// 会话后端错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Unable to retrieve session with id '{0}'")]
    NotFound(String),
    #[error("Session '{0}' has expired")]
    Expired(String),
    #[error("Session backend failure: {0}")]
    Backend(String),
}

impl SessionError {
    /// 是否属于“会话不存在”一类，可以被透明地当作无会话处理
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound(_) | SessionError::Expired(_))
    }
}

/// 分发期致命错误，不会逃出 `dispatch`。
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 钩子体失败：同一位置剩余的钩子不再执行
    #[error("Exception caught in '{name}' filter: {message}")]
    Hook { name: String, message: String },
    #[error("Hook '{0}' does not exist")]
    UnknownHook(String),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    /// 引擎在请求期间被惰性构建时失败
    #[error(transparent)]
    Engine(#[from] AppError),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Serializer error: {0}")]
    Serializer(String),
    #[error("Bad request body: {0}")]
    BadRequest(String),
}

/// 原始 HTTP 报文解析错误，只出现在传输层适配器中。
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Request header is not valid UTF-8")]
    NotUtf8,
    #[error("Malformed request line `{0}'")]
    MalformedRequestLine(String),
    #[error("Unsupported HTTP version `{0}'")]
    UnsupportedVersion(String),
    #[error("Incomplete request header")]
    Incomplete,
}
