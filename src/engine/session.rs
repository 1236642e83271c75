// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 会话引擎
//!
//! [`SessionEngine`] 在存储后端 [`SessionStore`] 之上提供会话的新建、读取、写回与销毁，
//! 以及会话 Cookie 的生成。每个操作前后都有对应的钩子：
//! `engine.session.{before,after}_{create,retrieve,flush,destroy}`。
//!
//! 内建后端：
//! - `simple`：进程内 LRU 缓存，容量由 `capacity` 决定。
//! - `json`：每个会话一个 JSON 文件，位于 `<appdir>/sessions`。

use std::{
    fs,
    io::ErrorKind,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use uuid::Uuid;

use crate::{
    context::Context,
    cookie::Cookie,
    engine::logger::{LogLevel, LoggerEngine},
    exception::{DispatchError, SessionError},
    hook::{HookArgs, HookStore, Hookable, HookableKind},
    response::Response,
    session::Session,
    util,
};

lazy_static! {
    static ref SESSION_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

const SESSION_HOOKS: [&str; 8] = [
    "engine.session.before_create",
    "engine.session.after_create",
    "engine.session.before_retrieve",
    "engine.session.after_retrieve",
    "engine.session.before_flush",
    "engine.session.after_flush",
    "engine.session.before_destroy",
    "engine.session.after_destroy",
];

/// 会话存储后端
pub trait SessionStore: Send + Sync {
    /// 找不到时返回 [`SessionError::NotFound`]
    fn load(&self, id: &str) -> Result<Session, SessionError>;

    fn store(&self, session: &Session) -> Result<(), SessionError>;

    /// 删除不存在的会话不是错误
    fn erase(&self, id: &str) -> Result<(), SessionError>;
}

/// 进程内的会话存储
pub struct SimpleStore {
    sessions: Mutex<LruCache<String, Session>>,
}

impl SimpleStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        util::lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for SimpleStore {
    fn load(&self, id: &str) -> Result<Session, SessionError> {
        util::lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    fn store(&self, session: &Session) -> Result<(), SessionError> {
        let mut stored = session.clone();
        stored.mark_clean();
        util::lock(&self.sessions).put(session.id().to_string(), stored);
        Ok(())
    }

    fn erase(&self, id: &str) -> Result<(), SessionError> {
        util::lock(&self.sessions).pop(id);
        Ok(())
    }
}

/// 每个会话一个 JSON 文件
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// 会话文件路径；非法 id 不会映射到目录之外
    fn path_for(&self, id: &str) -> Result<PathBuf, SessionError> {
        if !SessionEngine::validate_id(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

impl SessionStore for JsonStore {
    fn load(&self, id: &str) -> Result<Session, SessionError> {
        let text = match fs::read_to_string(self.path_for(id)?) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()));
            }
            Err(e) => return Err(SessionError::Backend(e.to_string())),
        };
        serde_json::from_str(&text).map_err(|e| SessionError::Backend(e.to_string()))
    }

    fn store(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.path_for(session.id())?;
        fs::create_dir_all(&self.dir).map_err(|e| SessionError::Backend(e.to_string()))?;
        let text =
            serde_json::to_string(session).map_err(|e| SessionError::Backend(e.to_string()))?;
        fs::write(path, text)
            .map_err(|e| SessionError::Backend(e.to_string()))
    }

    fn erase(&self, id: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.path_for(id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Backend(e.to_string())),
        }
    }
}

/// 会话 Cookie 与有效期设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_domain: Option<String>,
    /// Cookie 有效期（秒）
    pub cookie_duration: Option<i64>,
    /// 会话有效期（秒）
    pub session_duration: Option<i64>,
    pub is_secure: bool,
    pub is_http_only: bool,
    pub cookie_same_site: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "dancer.session".to_string(),
            cookie_path: "/".to_string(),
            cookie_domain: None,
            cookie_duration: None,
            session_duration: None,
            is_secure: false,
            is_http_only: true,
            cookie_same_site: None,
        }
    }
}

impl SessionSettings {
    pub fn from_table(table: &toml::Table) -> Self {
        let defaults = Self::default();
        let string = |key: &str| table.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let int = |key: &str| table.get(key).and_then(|v| v.as_integer());
        let boolean = |key: &str| table.get(key).and_then(|v| v.as_bool());
        Self {
            cookie_name: string("cookie_name").unwrap_or(defaults.cookie_name),
            cookie_path: string("cookie_path").unwrap_or(defaults.cookie_path),
            cookie_domain: string("cookie_domain"),
            cookie_duration: int("cookie_duration"),
            session_duration: int("session_duration"),
            is_secure: boolean("is_secure").unwrap_or(defaults.is_secure),
            is_http_only: boolean("is_http_only").unwrap_or(defaults.is_http_only),
            cookie_same_site: string("cookie_same_site"),
        }
    }
}

pub struct SessionEngine {
    name: String,
    store: Box<dyn SessionStore>,
    settings: SessionSettings,
    hooks: HookStore,
    logger: Option<Arc<LoggerEngine>>,
}

impl SessionEngine {
    pub fn new(
        name: &str,
        store: Box<dyn SessionStore>,
        settings: SessionSettings,
        logger: Option<Arc<LoggerEngine>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            store,
            settings,
            hooks: HookStore::new(&SESSION_HOOKS),
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn cookie_name(&self) -> &str {
        &self.settings.cookie_name
    }

    pub fn generate_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// 会话 id 只允许字母、数字、`_` 与 `-`
    pub fn validate_id(id: &str) -> bool {
        SESSION_ID.is_match(id)
    }

    fn log(&self, level: LogLevel, message: &str) {
        if let Some(logger) = &self.logger {
            logger.log(level, message);
        }
    }

    pub fn create(&self, ctx: &mut Context<'_>) -> Result<Session, DispatchError> {
        self.execute_hook(ctx, "engine.session.before_create", &mut HookArgs::None)?;
        let expires = self
            .settings
            .session_duration
            .map(|secs| Utc::now() + Duration::seconds(secs));
        let session = Session::created(&self.generate_id(), expires);
        self.log(LogLevel::Core, &format!("新建会话{}", session.id()));
        self.execute_hook(
            ctx,
            "engine.session.after_create",
            &mut HookArgs::Session(&session),
        )?;
        Ok(session)
    }

    /// 读取会话。非法 id 与已过期的会话都按“不存在”处理
    pub fn retrieve(&self, ctx: &mut Context<'_>, id: &str) -> Result<Session, DispatchError> {
        if !Self::validate_id(id) {
            return Err(SessionError::NotFound(id.to_string()).into());
        }
        self.execute_hook(
            ctx,
            "engine.session.before_retrieve",
            &mut HookArgs::SessionId(id),
        )?;
        let session = self.store.load(id)?;
        if session.is_expired(Utc::now()) {
            return Err(SessionError::Expired(id.to_string()).into());
        }
        self.execute_hook(
            ctx,
            "engine.session.after_retrieve",
            &mut HookArgs::Session(&session),
        )?;
        Ok(session)
    }

    pub fn flush(&self, ctx: &mut Context<'_>, session: &mut Session) -> Result<(), DispatchError> {
        self.execute_hook(
            ctx,
            "engine.session.before_flush",
            &mut HookArgs::Session(&*session),
        )?;
        self.store.store(session)?;
        session.mark_clean();
        self.log(LogLevel::Core, &format!("会话{}已写回", session.id()));
        self.execute_hook(
            ctx,
            "engine.session.after_flush",
            &mut HookArgs::Session(&*session),
        )?;
        Ok(())
    }

    /// 从后端删除会话；非法 id 返回 [`SessionError::NotFound`]，不触发钩子
    pub fn destroy(&self, ctx: &mut Context<'_>, id: &str) -> Result<(), DispatchError> {
        if !Self::validate_id(id) {
            return Err(SessionError::NotFound(id.to_string()).into());
        }
        self.execute_hook(
            ctx,
            "engine.session.before_destroy",
            &mut HookArgs::SessionId(id),
        )?;
        self.store.erase(id)?;
        self.log(LogLevel::Core, &format!("会话{}已销毁", id));
        self.execute_hook(
            ctx,
            "engine.session.after_destroy",
            &mut HookArgs::SessionId(id),
        )?;
        Ok(())
    }

    /// 为会话生成 Cookie；`destroyed` 为真时 Cookie 立即过期
    pub fn cookie(&self, session: &Session, destroyed: bool) -> Cookie {
        let expires = if destroyed {
            Some(session.expires().unwrap_or_else(|| Utc::now() - Duration::days(1)))
        } else {
            self.settings
                .cookie_duration
                .map(|secs| Utc::now() + Duration::seconds(secs))
                .or(session.expires())
        };
        Cookie::new(self.cookie_name(), session.id())
            .with_path(&self.settings.cookie_path)
            .with_domain(self.settings.cookie_domain.as_deref())
            .with_expires(expires)
            .with_secure(self.settings.is_secure)
            .with_http_only(self.settings.is_http_only)
            .with_same_site(self.settings.cookie_same_site.as_deref())
    }

    pub fn set_cookie_header(&self, response: &mut Response, session: &Session, destroyed: bool) {
        let cookie = self.cookie(session, destroyed);
        response.push_header("Set-Cookie", &cookie.to_header());
    }
}

impl Hookable for SessionEngine {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Engine
    }

    fn hookable_name(&self) -> &str {
        "session"
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}
