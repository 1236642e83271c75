// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 引擎模块
//!
//! 应用有四个引擎槽位：logger、session、template、serializer。每个槽位在第一次使用时
//! 按“显式指定 → 配置 → 默认值”的顺序确定后端名，再通过 [`EngineFactory`] 构建。
//!
//! 后端名必须匹配 `^[A-Za-z_][A-Za-z0-9_:]*$`。后端配置先在 `engines.<kind>.<name>`
//! 下查找，再尝试驼峰形式 `engines.<kind>.<Name>`；`environment` 与 `location`
//! 作为默认值合并在下层。

pub mod logger;
pub mod serializer;
pub mod session;
pub mod template;

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use lazy_static::lazy_static;
use regex::Regex;

use crate::{config::Config, exception::AppError};

use self::{
    logger::{CaptureLog, ConsoleLog, LogBackend, LogLevel, LoggerEngine, NullLog},
    serializer::{Format, JsonFormat, SerializerEngine},
    session::{JsonStore, SessionEngine, SessionSettings, SessionStore, SimpleStore},
    template::{Renderer, TemplateEngine, TinyRenderer},
};

lazy_static! {
    static ref ENGINE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_:]*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Logger,
    Session,
    Template,
    Serializer,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Logger,
        EngineKind::Session,
        EngineKind::Template,
        EngineKind::Serializer,
    ];

    /// 配置键名，同时也是钩子名中的所有者段
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Logger => "logger",
            EngineKind::Session => "session",
            EngineKind::Template => "template",
            EngineKind::Serializer => "serializer",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `json_file` → `JsonFile`，`simple` → `Simple`
pub fn camelize(name: &str) -> String {
    name.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn validate_engine_name(kind: EngineKind, name: &str) -> Result<(), AppError> {
    if ENGINE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AppError::IllegalEngineName {
            kind,
            name: name.to_string(),
        })
    }
}

/// 构建一个引擎所需的全部输入
#[derive(Debug, Clone)]
pub struct EngineSetup {
    pub kind: EngineKind,
    pub name: String,
    /// 后端配置，已合并默认值
    pub config: toml::Table,
    /// 日志引擎本身构建时为 `None`
    pub logger: Option<Arc<LoggerEngine>>,
    /// 引擎的文件系统位置（会话目录、视图目录或应用目录）
    pub location: PathBuf,
}

impl EngineSetup {
    /// 按名称查找后端配置并合并默认值
    pub fn from_config(
        kind: EngineKind,
        name: &str,
        config: &Config,
        logger: Option<Arc<LoggerEngine>>,
        location: PathBuf,
    ) -> Result<Self, AppError> {
        validate_engine_name(kind, name)?;
        let mut table = toml::Table::new();
        table.insert(
            "environment".to_string(),
            toml::Value::String(config.environment().to_string()),
        );
        table.insert(
            "location".to_string(),
            toml::Value::String(config.appdir().to_string_lossy().into_owned()),
        );
        if kind == EngineKind::Logger {
            table.insert("log".to_string(), toml::Value::String(config.log().to_string()));
        }
        if let Some(engines) = config.engines(kind.as_str()) {
            let specific = engines
                .get(name)
                .or_else(|| engines.get(&camelize(name)))
                .and_then(|v| v.as_table());
            if let Some(specific) = specific {
                for (k, v) in specific {
                    table.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(Self {
            kind,
            name: name.to_string(),
            config: table,
            logger,
            location,
        })
    }

    pub fn str_setting(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn int_setting(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(|v| v.as_integer())
    }

    pub fn bool_setting(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }

    fn setup_error(&self, message: impl fmt::Display) -> AppError {
        AppError::EngineSetup {
            kind: self.kind,
            name: self.name.clone(),
            message: message.to_string(),
        }
    }
}

/// 后端构造函数
pub type Ctor<T> = Arc<dyn Fn(&EngineSetup) -> Result<T, AppError> + Send + Sync>;

/// 按引擎类别登记的后端构造函数表，键为驼峰形式的后端名。
///
/// 默认包含：logger `Console`/`Capture`/`Null`，session `Simple`/`Json`，
/// template `Tiny`，serializer `Json`。
#[derive(Clone)]
pub struct EngineFactory {
    loggers: HashMap<String, Ctor<Box<dyn LogBackend>>>,
    sessions: HashMap<String, Ctor<Box<dyn SessionStore>>>,
    templates: HashMap<String, Ctor<Box<dyn Renderer>>>,
    serializers: HashMap<String, Ctor<Box<dyn Format>>>,
}

impl Default for EngineFactory {
    fn default() -> Self {
        let mut factory = Self {
            loggers: HashMap::new(),
            sessions: HashMap::new(),
            templates: HashMap::new(),
            serializers: HashMap::new(),
        };
        factory.register_logger("console", |_| Ok(Box::new(ConsoleLog)));
        factory.register_logger("capture", |_| Ok(Box::new(CaptureLog::new())));
        factory.register_logger("null", |_| Ok(Box::new(NullLog)));
        factory.register_session("simple", |setup| {
            let capacity = setup.int_setting("capacity").unwrap_or(1024);
            Ok(Box::new(SimpleStore::new(capacity.max(1) as usize)))
        });
        factory.register_session("json", |setup| {
            Ok(Box::new(JsonStore::new(setup.location.clone())))
        });
        factory.register_template("tiny", |_| Ok(Box::new(TinyRenderer)));
        factory.register_serializer("json", |setup| {
            let pretty = setup.bool_setting("pretty").unwrap_or(false);
            Ok(Box::new(JsonFormat::new(pretty)))
        });
        factory
    }
}

impl EngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_logger<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&EngineSetup) -> Result<Box<dyn LogBackend>, AppError> + Send + Sync + 'static,
    {
        self.loggers.insert(camelize(name), Arc::new(ctor));
    }

    pub fn register_session<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&EngineSetup) -> Result<Box<dyn SessionStore>, AppError> + Send + Sync + 'static,
    {
        self.sessions.insert(camelize(name), Arc::new(ctor));
    }

    pub fn register_template<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&EngineSetup) -> Result<Box<dyn Renderer>, AppError> + Send + Sync + 'static,
    {
        self.templates.insert(camelize(name), Arc::new(ctor));
    }

    pub fn register_serializer<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&EngineSetup) -> Result<Box<dyn Format>, AppError> + Send + Sync + 'static,
    {
        self.serializers.insert(camelize(name), Arc::new(ctor));
    }

    /// 某类别下已登记的后端名
    pub fn names(&self, kind: EngineKind) -> Vec<String> {
        let mut names: Vec<String> = match kind {
            EngineKind::Logger => self.loggers.keys().cloned().collect(),
            EngineKind::Session => self.sessions.keys().cloned().collect(),
            EngineKind::Template => self.templates.keys().cloned().collect(),
            EngineKind::Serializer => self.serializers.keys().cloned().collect(),
        };
        names.sort();
        names
    }

    fn lookup<'f, T>(
        table: &'f HashMap<String, Ctor<T>>,
        setup: &EngineSetup,
    ) -> Result<&'f Ctor<T>, AppError> {
        table
            .get(&camelize(&setup.name))
            .ok_or_else(|| AppError::UnknownEngine {
                kind: setup.kind,
                name: setup.name.clone(),
            })
    }

    pub fn build_logger(&self, setup: &EngineSetup) -> Result<LoggerEngine, AppError> {
        let ctor = Self::lookup(&self.loggers, setup)?;
        let backend = ctor(setup)?;
        let threshold = match setup.str_setting("log") {
            Some(level) => level
                .parse::<LogLevel>()
                .map_err(|e| setup.setup_error(e))?,
            None => LogLevel::Debug,
        };
        Ok(LoggerEngine::new(&setup.name, backend, threshold))
    }

    pub fn build_session(&self, setup: &EngineSetup) -> Result<SessionEngine, AppError> {
        let ctor = Self::lookup(&self.sessions, setup)?;
        let store = ctor(setup)?;
        let settings = SessionSettings::from_table(&setup.config);
        Ok(SessionEngine::new(&setup.name, store, settings, setup.logger.clone()))
    }

    pub fn build_template(
        &self,
        setup: &EngineSetup,
        config: &Config,
    ) -> Result<TemplateEngine, AppError> {
        let ctor = Self::lookup(&self.templates, setup)?;
        let renderer = ctor(setup)?;
        let mut engine = TemplateEngine::new(&setup.name, renderer, setup.location.clone())
            .with_layout(config.layout())
            .with_charset(config.charset())
            .with_logger(setup.logger.clone());
        if let Some(ext) = setup.str_setting("extension") {
            engine = engine.with_extension(ext);
        }
        if let Some(dir) = setup.str_setting("layout_dir") {
            engine = engine.with_layout_dir(dir);
        }
        Ok(engine)
    }

    pub fn build_serializer(&self, setup: &EngineSetup) -> Result<SerializerEngine, AppError> {
        let ctor = Self::lookup(&self.serializers, setup)?;
        let format = ctor(setup)?;
        Ok(SerializerEngine::new(&setup.name, format, setup.logger.clone()))
    }
}
