// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板引擎
//!
//! [`TemplateEngine`] 负责视图路径解析、默认模板变量、布局（layout）以及渲染前后的钩子；
//! 具体的模板语言由 [`Renderer`] 后端实现。
//!
//! 内建的 `tiny` 后端只做变量替换：`[% name %]` 或 `[% user.name %]`。

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::{
    context::Context,
    engine::logger::{LogLevel, LoggerEngine},
    exception::{BoxError, DispatchError},
    hook::{HookArgs, HookStore, Hookable, HookableKind},
};

/// 模板变量
pub type Tokens = Map<String, Value>;

lazy_static! {
    static ref TINY_TOKEN: Regex = Regex::new(r"\[%\s*([A-Za-z_][A-Za-z0-9_.]*)\s*%\]").unwrap();
}

const TEMPLATE_HOOKS: [&str; 4] = [
    "engine.template.before_render",
    "engine.template.after_render",
    "engine.template.before_layout_render",
    "engine.template.after_layout_render",
];

pub trait Renderer: Send + Sync {
    fn render(&self, path: &Path, tokens: &Tokens) -> Result<String, BoxError>;
}

/// `[% token %]` 变量替换
pub struct TinyRenderer;

impl TinyRenderer {
    pub fn render_str(template: &str, tokens: &Tokens) -> String {
        TINY_TOKEN
            .replace_all(template, |caps: &Captures| lookup(tokens, &caps[1]))
            .into_owned()
    }
}

impl Renderer for TinyRenderer {
    fn render(&self, path: &Path, tokens: &Tokens) -> Result<String, BoxError> {
        let template = fs::read_to_string(path)?;
        Ok(Self::render_str(&template, tokens))
    }
}

/// 按点号路径取值；缺失的值渲染为空串
fn lookup(tokens: &Tokens, dotted: &str) -> String {
    let mut parts = dotted.split('.');
    let mut current = match parts.next().and_then(|first| tokens.get(first)) {
        Some(value) => value,
        None => return String::new(),
    };
    for part in parts {
        current = match current.get(part) {
            Some(value) => value,
            None => return String::new(),
        };
    }
    match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct TemplateEngine {
    name: String,
    renderer: Box<dyn Renderer>,
    views: PathBuf,
    layout: Option<String>,
    layout_dir: String,
    extension: String,
    charset: String,
    hooks: HookStore,
    logger: Option<Arc<LoggerEngine>>,
}

impl TemplateEngine {
    pub fn new(name: &str, renderer: Box<dyn Renderer>, views: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            renderer,
            views,
            layout: None,
            layout_dir: "layouts".to_string(),
            extension: "tt".to_string(),
            charset: "UTF-8".to_string(),
            hooks: HookStore::new(&TEMPLATE_HOOKS),
            logger: None,
        }
    }

    pub fn with_layout(mut self, layout: Option<&str>) -> Self {
        self.layout = layout.map(str::to_string);
        self
    }

    pub fn with_layout_dir(mut self, dir: &str) -> Self {
        self.layout_dir = dir.to_string();
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn with_logger(mut self, logger: Option<Arc<LoggerEngine>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn views(&self) -> &Path {
        &self.views
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    fn with_ext(&self, name: &str) -> String {
        let suffix = format!(".{}", self.extension);
        if name.ends_with(&suffix) {
            name.to_string()
        } else {
            format!("{}{}", name, suffix)
        }
    }

    /// 视图名到文件路径，缺少扩展名时自动补上
    pub fn view_pathname(&self, view: &str) -> PathBuf {
        self.views.join(self.with_ext(view.trim_start_matches('/')))
    }

    pub fn layout_pathname(&self, layout: &str) -> PathBuf {
        self.views
            .join(&self.layout_dir)
            .join(self.with_ext(layout.trim_start_matches('/')))
    }

    pub fn view_exists(&self, view: &str) -> bool {
        self.view_pathname(view).is_file()
    }

    /// 每次渲染都会带上的变量：`settings`、`params`、`vars`，以及存在时的 `session`
    fn default_tokens(&self, ctx: &Context<'_>) -> Tokens {
        let mut tokens = Tokens::new();
        let settings = serde_json::to_value(ctx.app().config()).unwrap_or(Value::Null);
        tokens.insert("settings".to_string(), settings);
        let params: Map<String, Value> = ctx
            .request()
            .params()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        tokens.insert("params".to_string(), Value::Object(params));
        let vars: Map<String, Value> = ctx
            .request()
            .vars()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tokens.insert("vars".to_string(), Value::Object(vars));
        if let Some(session) = ctx.current_session() {
            tokens.insert(
                "session".to_string(),
                Value::Object(session.data().clone()),
            );
        }
        tokens
    }

    fn render_file(&self, path: &Path, tokens: &Tokens) -> Result<String, DispatchError> {
        if !path.is_file() {
            return Err(DispatchError::Template(format!(
                "{} not found",
                path.display()
            )));
        }
        self.renderer.render(path, tokens).map_err(|e| {
            if let Some(logger) = &self.logger {
                logger.log(LogLevel::Error, &format!("渲染{}失败：{}", path.display(), e));
            }
            DispatchError::Template(e.to_string())
        })
    }

    /// 渲染视图，再套上布局（`layout` 缺省时使用配置中的布局）
    pub fn process(
        &self,
        ctx: &mut Context<'_>,
        view: &str,
        tokens: Tokens,
        layout: Option<&str>,
    ) -> Result<String, DispatchError> {
        let mut all_tokens = self.default_tokens(ctx);
        all_tokens.extend(tokens);

        self.execute_hook(
            ctx,
            "engine.template.before_render",
            &mut HookArgs::Tokens(&mut all_tokens),
        )?;
        let mut content = self.render_file(&self.view_pathname(view), &all_tokens)?;
        self.execute_hook(
            ctx,
            "engine.template.after_render",
            &mut HookArgs::Content(&mut content),
        )?;

        let layout = match layout.or(self.layout.as_deref()) {
            Some(layout) => layout.to_string(),
            None => return Ok(content),
        };
        all_tokens.insert("content".to_string(), Value::String(content));
        self.execute_hook(
            ctx,
            "engine.template.before_layout_render",
            &mut HookArgs::Tokens(&mut all_tokens),
        )?;
        let mut full = self.render_file(&self.layout_pathname(&layout), &all_tokens)?;
        self.execute_hook(
            ctx,
            "engine.template.after_layout_render",
            &mut HookArgs::Content(&mut full),
        )?;
        Ok(full)
    }
}

impl Hookable for TemplateEngine {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Engine
    }

    fn hookable_name(&self) -> &str {
        "template"
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}
