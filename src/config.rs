use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::warn;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::exception::AppError;

/// 应用配置。
///
/// 既包含分发核心关心的设置（引擎名、视图目录、会话设置……），也包含演示服务器
/// 的监听参数。引擎专属设置位于 `[engines.<kind>.<Name>]` 表下。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_appname")]
    appname: String,
    #[serde(default = "default_appdir")]
    appdir: String,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default)]
    views: Option<String>,
    #[serde(default)]
    public_dir: Option<String>,
    #[serde(default)]
    logger: Option<String>,
    #[serde(default = "default_log")]
    log: String,
    #[serde(default = "default_session")]
    session: Option<String>,
    #[serde(default = "default_template")]
    template: Option<String>,
    #[serde(default)]
    serializer: Option<String>,
    #[serde(default)]
    layout: Option<String>,
    #[serde(default = "default_charset")]
    charset: String,
    #[serde(default = "default_true")]
    show_errors: bool,
    #[serde(default)]
    static_handler: Option<bool>,
    #[serde(default)]
    engines: toml::Table,

    // 以下为演示服务器的参数
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_true")]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_streaming_threshold")]
    streaming_threshold: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_file_cache_size")]
    file_cache_size: usize,
}

fn default_appname() -> String {
    "webapp".to_string()
}

fn default_appdir() -> String {
    ".".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log() -> String {
    "debug".to_string()
}

fn default_session() -> Option<String> {
    Some("simple".to_string())
}

fn default_template() -> Option<String> {
    Some("tiny".to_string())
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    7878
}

fn default_streaming_threshold() -> u64 {
    10485760 // 10MB
}

fn default_chunk_size() -> usize {
    262144 // 256KB
}

fn default_file_cache_size() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            appname: default_appname(),
            appdir: default_appdir(),
            environment: default_environment(),
            views: None,
            public_dir: None,
            logger: None,
            log: default_log(),
            session: default_session(),
            template: default_template(),
            serializer: None,
            layout: None,
            charset: default_charset(),
            show_errors: true,
            static_handler: None,
            engines: toml::Table::new(),
            port: default_port(),
            local: true,
            worker_threads: 0,
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            file_cache_size: default_file_cache_size(),
        }
    }

    /// 从 TOML 文件读取配置。
    pub fn from_toml(filename: &str) -> Result<Self, AppError> {
        let mut file = File::open(filename).map_err(|source| AppError::ConfigIo {
            path: filename.to_string(),
            source,
        })?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)
            .map_err(|source| AppError::ConfigIo {
                path: filename.to_string(),
                source,
            })?;
        Self::from_toml_str(&str_val)
    }

    /// 从 TOML 文本解析配置，并对需要计算的值做规范化。
    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        let mut raw_config: Config = toml::from_str(text)?;
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.file_cache_size == 0 {
            warn!("file_cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为32。");
            raw_config.file_cache_size = default_file_cache_size();
        }
        Ok(raw_config)
    }
}

impl Config {
    pub fn appname(&self) -> &str {
        &self.appname
    }

    pub fn appdir(&self) -> &Path {
        Path::new(&self.appdir)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// 视图目录：显式配置的相对路径基于 `appdir` 解析，缺省为 `<appdir>/views`
    pub fn views(&self) -> PathBuf {
        self.resolve(self.views.as_deref(), "views")
    }

    /// 静态文件目录：缺省为 `<appdir>/public`
    pub fn public_dir(&self) -> PathBuf {
        self.resolve(self.public_dir.as_deref(), "public")
    }

    /// 会话文件目录，固定为 `<appdir>/sessions`
    pub fn session_dir(&self) -> PathBuf {
        self.appdir().join("sessions")
    }

    fn resolve(&self, value: Option<&str>, fallback: &str) -> PathBuf {
        match value {
            Some(v) if Path::new(v).is_absolute() => PathBuf::from(v),
            Some(v) => self.appdir().join(v),
            None => self.appdir().join(fallback),
        }
    }

    pub fn logger(&self) -> Option<&str> {
        self.logger.as_deref()
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// 引擎名读取：空字符串视为未配置
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref().filter(|s| !s.is_empty())
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref().filter(|s| !s.is_empty())
    }

    pub fn serializer(&self) -> Option<&str> {
        self.serializer.as_deref().filter(|s| !s.is_empty())
    }

    pub fn layout(&self) -> Option<&str> {
        self.layout.as_deref().filter(|l| !l.is_empty())
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn show_errors(&self) -> bool {
        self.show_errors
    }

    /// 是否注册静态文件处理器：未显式配置时，取决于静态目录是否存在
    pub fn static_handler(&self) -> bool {
        self.static_handler
            .unwrap_or_else(|| self.public_dir().is_dir())
    }

    /// `[engines.<kind>]` 表
    pub fn engines(&self, kind: &str) -> Option<&toml::Table> {
        self.engines.get(kind).and_then(|v| v.as_table())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    /// 工作线程数，未设置时为 CPU 核数
    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    pub fn streaming_threshold(&self) -> u64 {
        self.streaming_threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn file_cache_size(&self) -> usize {
        self.file_cache_size
    }
}
