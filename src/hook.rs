// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 钩子模块
//!
//! 钩子是挂在命名扩展点上的回调。扩展点的规范名形如 `type.owner.event`，例如
//! `core.app.before_request`、`engine.template.after_render`。
//!
//! ## 组成
//! - [`Hook`]：名称 + 回调。
//! - [`HookStore`]：某个可挂钩对象（应用、引擎、路由处理器、插件）支持的扩展点及其钩子列表。
//! - [`Hookable`]：可挂钩对象的公共接口。
//! - [`PostponedHooks`]：所有者尚未构建时暂存的钩子，所有者构建后一次性认领。
//! - 别名表：`before` → `core.app.before_request` 等，只解析一跳。

use std::{
    collections::HashMap,
    fmt,
    panic::Location,
    path::Path,
    str::FromStr,
    sync::{Arc, RwLock},
};

use lazy_static::lazy_static;
use log::{debug, warn};
use serde_json::Value;

use crate::{
    context::{Context, Flow},
    engine::{logger::LogLevel, template::Tokens},
    exception::{AppError, BoxError, DispatchError},
    session::Session,
    util,
};

lazy_static! {
    /// 内建的钩子别名
    pub static ref HOOK_ALIASES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("before", "core.app.before_request");
        map.insert("before_request", "core.app.before_request");
        map.insert("after", "core.app.after_request");
        map.insert("after_request", "core.app.after_request");
        map.insert("on_route_exception", "core.app.route_exception");

        map.insert("init_error", "core.error.init");
        map.insert("before_error", "core.error.before");
        map.insert("after_error", "core.error.after");

        map.insert("before_template_render", "engine.template.before_render");
        map.insert("after_template_render", "engine.template.after_render");
        map.insert("before_layout_render", "engine.template.before_layout_render");
        map.insert("after_layout_render", "engine.template.after_layout_render");

        map.insert("before_serializer", "engine.serializer.before");
        map.insert("after_serializer", "engine.serializer.after");

        map.insert("before_file_render", "handler.file.before_render");
        map.insert("after_file_render", "handler.file.after_render");
        map
    };
}

/// 把别名解析为规范名。`extra` 为插件贡献的别名，优先于内建别名
pub fn canonical_name(name: &str, extra: &HashMap<String, String>) -> String {
    if let Some(target) = extra.get(name) {
        return target.clone();
    }
    match HOOK_ALIASES.get(name) {
        Some(target) => target.to_string(),
        None => name.to_string(),
    }
}

/// 钩子回调收到的参数，随扩展点不同而不同
pub enum HookArgs<'h> {
    None,
    /// 错误信息（`core.app.route_exception`、`core.error.*`）
    Error(&'h str),
    /// 渲染前可修改的模板变量
    Tokens(&'h mut Tokens),
    /// 渲染/序列化之后可修改的文本
    Content(&'h mut String),
    /// 即将被序列化的数据
    Data(&'h Value),
    Session(&'h Session),
    SessionId(&'h str),
    File(&'h Path),
}

pub type HookFn =
    Arc<dyn Fn(&mut Context<'_>, &mut HookArgs<'_>) -> Result<Flow, BoxError> + Send + Sync>;

#[derive(Clone)]
pub struct Hook {
    name: String,
    code: HookFn,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

impl Hook {
    pub fn new<F>(name: &str, code: F) -> Self
    where
        F: Fn(&mut Context<'_>, &mut HookArgs<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            code: Arc::new(code),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 同一回调换一个名字（别名解析之后）
    pub fn renamed(self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            code: self.code,
        }
    }

    pub fn call(&self, ctx: &mut Context<'_>, args: &mut HookArgs<'_>) -> Result<Flow, BoxError> {
        (self.code)(ctx, args)
    }
}

/// 可挂钩对象的类别，即钩子规范名的第一段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookableKind {
    Core,
    Engine,
    Handler,
    Plugin,
}

impl HookableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookableKind::Core => "core",
            HookableKind::Engine => "engine",
            HookableKind::Handler => "handler",
            HookableKind::Plugin => "plugin",
        }
    }
}

impl FromStr for HookableKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(HookableKind::Core),
            "engine" => Ok(HookableKind::Engine),
            "handler" => Ok(HookableKind::Handler),
            "plugin" => Ok(HookableKind::Plugin),
            _ => Err(AppError::UnknownHookType(s.to_string())),
        }
    }
}

impl fmt::Display for HookableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 拆分后的规范钩子名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookName {
    pub kind: HookableKind,
    pub owner: String,
    pub event: String,
}

impl HookName {
    pub fn parse(name: &str) -> Result<Self, AppError> {
        let mut parts = name.splitn(3, '.');
        let (Some(kind), Some(owner), Some(event)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::InvalidHookName(name.to_string()));
        };
        if kind.is_empty() || owner.is_empty() || event.is_empty() {
            return Err(AppError::InvalidHookName(name.to_string()));
        }
        Ok(Self {
            kind: kind.parse()?,
            owner: owner.to_string(),
            event: event.to_string(),
        })
    }
}

/// 一个可挂钩对象支持的扩展点及其钩子。
///
/// 扩展点集合在构造时确定；向不支持的扩展点添加钩子会被拒绝。
pub struct HookStore {
    hooks: RwLock<HashMap<String, Vec<Hook>>>,
}

impl HookStore {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let hooks = names
            .iter()
            .map(|n| (n.as_ref().to_string(), Vec::new()))
            .collect();
        Self {
            hooks: RwLock::new(hooks),
        }
    }

    pub fn empty() -> Self {
        Self::new::<&str>(&[])
    }

    pub fn supports(&self, name: &str) -> bool {
        util::read(&self.hooks).contains_key(name)
    }

    pub fn supported(&self) -> Vec<String> {
        let mut names: Vec<String> = util::read(&self.hooks).keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回是否被接受
    pub fn add(&self, hook: Hook) -> bool {
        let mut hooks = util::write(&self.hooks);
        match hooks.get_mut(hook.name()) {
            Some(list) => {
                list.push(hook);
                true
            }
            None => false,
        }
    }

    /// 按注册顺序返回某扩展点的钩子快照
    pub fn hooks(&self, name: &str) -> Vec<Hook> {
        util::read(&self.hooks)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        util::read(&self.hooks).get(name).map_or(0, Vec::len)
    }
}

/// 可挂钩对象：应用、引擎、路由处理器与插件
pub trait Hookable: Send + Sync {
    fn hookable_kind(&self) -> HookableKind;

    fn hookable_name(&self) -> &str;

    fn hook_store(&self) -> &HookStore;

    fn supports_hook(&self, name: &str) -> bool {
        self.hook_store().supports(name)
    }

    fn add_hook(&self, hook: Hook) -> bool {
        self.hook_store().add(hook)
    }

    fn execute_hook(
        &self,
        ctx: &mut Context<'_>,
        name: &str,
        args: &mut HookArgs<'_>,
    ) -> Result<Flow, DispatchError> {
        if !self.supports_hook(name) {
            return Err(DispatchError::UnknownHook(name.to_string()));
        }
        run_hooks(ctx, name, self.hook_store().hooks(name), args)
    }
}

/// 按注册顺序执行钩子。
///
/// 每个钩子执行前检查响应是否已 halt；钩子返回 `Halt` 时标记响应，
/// 返回 `Pass`/`Forward` 时立即交还调用者。钩子失败时剩余钩子不再执行，
/// 本周期的会话状态被清理，错误被记录并以 [`DispatchError::Hook`] 返回。
pub fn run_hooks(
    ctx: &mut Context<'_>,
    name: &str,
    hooks: Vec<Hook>,
    args: &mut HookArgs<'_>,
) -> Result<Flow, DispatchError> {
    for hook in hooks {
        if ctx.response().is_halted() {
            break;
        }
        match hook.call(ctx, args) {
            Ok(Flow::Halt) => ctx.response_mut().halt(),
            Ok(flow @ (Flow::Pass | Flow::Forward(_))) => return Ok(flow),
            Ok(_) => {}
            Err(err) => {
                ctx.cleanup();
                let error = DispatchError::Hook {
                    name: name.to_string(),
                    message: err.to_string(),
                };
                ctx.log(LogLevel::Error, &error.to_string());
                return Err(error);
            }
        }
    }
    Ok(Flow::Next)
}

struct PostponedHook {
    hook: Hook,
    site: &'static Location<'static>,
}

/// 所有者尚未构建时暂存的钩子：`(类别, 所有者)` → 规范名 → 钩子列表
#[derive(Default)]
pub struct PostponedHooks {
    table: HashMap<(HookableKind, String), HashMap<String, Vec<PostponedHook>>>,
}

impl PostponedHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn postpone(&mut self, name: &HookName, hook: Hook, site: &'static Location<'static>) {
        debug!(
            "钩子{}的所有者{}.{}尚未构建，暂存（注册于{}:{}）",
            hook.name(),
            name.kind,
            name.owner,
            site.file(),
            site.line()
        );
        self.table
            .entry((name.kind, name.owner.clone()))
            .or_default()
            .entry(hook.name().to_string())
            .or_default()
            .push(PostponedHook { hook, site });
    }

    /// 所有者认领属于它的全部暂存钩子，返回被接受的数量。
    /// 所有者不支持的扩展点上的钩子被丢弃并告警
    pub fn claim(&mut self, owner: &dyn Hookable) -> usize {
        let key = (owner.hookable_kind(), owner.hookable_name().to_string());
        let Some(entries) = self.table.remove(&key) else {
            return 0;
        };
        let mut claimed = 0;
        for (name, hooks) in entries {
            for postponed in hooks {
                if owner.supports_hook(&name) && owner.add_hook(postponed.hook) {
                    claimed += 1;
                } else {
                    warn!(
                        "{}.{}不支持钩子{}，已丢弃（注册于{}:{}）",
                        key.0,
                        key.1,
                        name,
                        postponed.site.file(),
                        postponed.site.line()
                    );
                }
            }
        }
        claimed
    }

    /// 某所有者尚未被认领的钩子数量
    pub fn pending(&self, kind: HookableKind, owner: &str) -> usize {
        self.table
            .get(&(kind, owner.to_string()))
            .map_or(0, |events| events.values().map(Vec::len).sum())
    }

    /// 某类别下仍有暂存钩子的所有者
    pub fn owners(&self, kind: HookableKind) -> Vec<String> {
        let mut owners: Vec<String> = self
            .table
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, owner)| owner.clone())
            .collect();
        owners.sort();
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Owner {
        hooks: HookStore,
    }

    impl Hookable for Owner {
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

    fn noop(name: &str) -> Hook {
        Hook::new(name, |_ctx: &mut Context<'_>, _args: &mut HookArgs<'_>| Ok(Flow::Next))
    }

    #[test]
    fn test_aliases() {
        let extra = HashMap::new();
        assert_eq!(canonical_name("before", &extra), "core.app.before_request");
        assert_eq!(canonical_name("after_request", &extra), "core.app.after_request");
        assert_eq!(
            canonical_name("before_template_render", &extra),
            "engine.template.before_render"
        );
        assert_eq!(
            canonical_name("after_file_render", &extra),
            "handler.file.after_render"
        );
        assert_eq!(canonical_name("core.app.before_request", &extra), "core.app.before_request");
    }

    #[test]
    fn test_plugin_aliases_take_precedence() {
        let extra = HashMap::from([("before".to_string(), "plugin.auth.before".to_string())]);
        assert_eq!(canonical_name("before", &extra), "plugin.auth.before");
    }

    #[test]
    fn test_parse_hook_name() {
        let name = HookName::parse("engine.session.before_flush").unwrap();
        assert_eq!(name.kind, HookableKind::Engine);
        assert_eq!(name.owner, "session");
        assert_eq!(name.event, "before_flush");
    }

    #[test]
    fn test_parse_invalid_hook_name() {
        assert!(matches!(
            HookName::parse("nodots"),
            Err(AppError::InvalidHookName(_))
        ));
        assert!(matches!(
            HookName::parse("core..event"),
            Err(AppError::InvalidHookName(_))
        ));
        assert!(matches!(
            HookName::parse("widget.x.y"),
            Err(AppError::UnknownHookType(ref t)) if t == "widget"
        ));
    }

    #[test]
    fn test_store_rejects_unsupported() {
        let store = HookStore::new(&["engine.template.before_render"]);
        assert!(store.supports("engine.template.before_render"));
        assert!(store.add(noop("engine.template.before_render")));
        assert!(!store.add(noop("engine.template.nope")));
        assert_eq!(store.count("engine.template.before_render"), 1);
        assert_eq!(store.supported(), vec!["engine.template.before_render".to_string()]);
    }

    #[test]
    fn test_postponed_claim() {
        let owner = Owner {
            hooks: HookStore::new(&["engine.template.before_render"]),
        };
        let mut postponed = PostponedHooks::new();
        let supported = HookName::parse("engine.template.before_render").unwrap();
        let unsupported = HookName::parse("engine.template.bogus").unwrap();
        postponed.postpone(&supported, noop("engine.template.before_render"), Location::caller());
        postponed.postpone(&supported, noop("engine.template.before_render"), Location::caller());
        postponed.postpone(&unsupported, noop("engine.template.bogus"), Location::caller());
        assert_eq!(postponed.pending(HookableKind::Engine, "template"), 3);

        assert_eq!(postponed.claim(&owner), 2);
        assert_eq!(owner.hook_store().count("engine.template.before_render"), 2);
        assert_eq!(postponed.pending(HookableKind::Engine, "template"), 0);
        // 第二次认领没有任何东西
        assert_eq!(postponed.claim(&owner), 0);
    }
}
