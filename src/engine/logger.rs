// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 日志引擎：按阈值过滤后交给后端。`console` 后端转发到 `log` 门面，
//! 由二进制程序初始化的 log4rs 负责最终输出。

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use log::{debug, error, info, trace, warn};

use crate::{
    hook::{HookStore, Hookable, HookableKind},
    util,
};

/// 日志级别，`Core` 最低，用于分发核心自身的跟踪信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Core,
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Core => "core",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Ok(LogLevel::Core),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level `{}'", s)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait LogBackend: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// 转发到 `log` 门面
pub struct ConsoleLog;

impl LogBackend for ConsoleLog {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Core => trace!("{}", message),
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
    }
}

/// 把日志记录在内存里，便于检查
#[derive(Clone, Default)]
pub struct CaptureLog {
    entries: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目前为止记录下的全部日志
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        util::lock(&self.entries).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        util::lock(&self.entries)
            .iter()
            .any(|(_, message)| message.contains(needle))
    }
}

impl LogBackend for CaptureLog {
    fn log(&self, level: LogLevel, message: &str) {
        util::lock(&self.entries).push((level, message.to_string()));
    }
}

pub struct NullLog;

impl LogBackend for NullLog {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

pub struct LoggerEngine {
    name: String,
    backend: Box<dyn LogBackend>,
    threshold: LogLevel,
    hooks: HookStore,
}

impl fmt::Debug for LoggerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerEngine")
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl LoggerEngine {
    pub fn new(name: &str, backend: Box<dyn LogBackend>, threshold: LogLevel) -> Self {
        Self {
            name: name.to_string(),
            backend,
            threshold,
            hooks: HookStore::empty(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if level >= self.threshold {
            self.backend.log(level, message);
        }
    }

    pub fn core(&self, message: &str) {
        self.log(LogLevel::Core, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl Hookable for LoggerEngine {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Engine
    }

    fn hookable_name(&self) -> &str {
        "logger"
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_order() {
        assert!(LogLevel::Core < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("CORE".parse::<LogLevel>(), Ok(LogLevel::Core));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_threshold_filters() {
        let capture = CaptureLog::new();
        let engine = LoggerEngine::new("capture", Box::new(capture.clone()), LogLevel::Info);
        engine.core("hidden core");
        engine.debug("hidden debug");
        engine.info("shown info");
        engine.error("shown error");
        assert_eq!(
            capture.entries(),
            vec![
                (LogLevel::Info, "shown info".to_string()),
                (LogLevel::Error, "shown error".to_string()),
            ]
        );
        assert!(capture.contains("shown"));
        assert!(!capture.contains("hidden"));
    }

    #[test]
    fn test_logger_owns_no_hooks() {
        let engine = LoggerEngine::new("null", Box::new(NullLog), LogLevel::Core);
        assert!(engine.hook_store().supported().is_empty());
        assert_eq!(engine.hookable_name(), "logger");
    }

    #[test]
    fn test_debug_shows_name_and_threshold() {
        let engine = LoggerEngine::new("null", Box::new(NullLog), LogLevel::Info);
        let text = format!("{:?}", engine);
        assert!(text.contains("\"null\""));
        assert!(text.contains("Info"));
    }
}
