// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Application 模块
//!
//! 一个逻辑上的子应用：路由表、钩子注册表、四个惰性构建的引擎槽位、
//! 暂存钩子表、插件与路由处理器列表。
//!
//! 构建阶段通过 `&mut self` 注册路由与插件，[`Application::finish`] 之后以
//! `Arc<Application>` 的形式在各请求间只读共享。请求分发见 `dispatcher` 模块。

use std::{
    collections::HashMap,
    panic::Location,
    sync::{Arc, Mutex, OnceLock},
};

use log::{debug, warn};

use crate::{
    config::Config,
    context::{Context, Flow},
    engine::{
        logger::{LogLevel, LoggerEngine},
        serializer::SerializerEngine,
        session::SessionEngine,
        template::TemplateEngine,
        validate_engine_name, EngineFactory, EngineKind, EngineSetup,
    },
    exception::{AppError, BoxError, DispatchError},
    handler::{file::FileHandler, RouteHandler},
    hook::{
        canonical_name, run_hooks, Hook, HookArgs, HookName, HookStore, Hookable, HookableKind,
        PostponedHooks,
    },
    param::HttpMethod,
    plugin::Plugin,
    route::{HandlerFn, Route, RoutePattern},
    util,
};

/// 应用自身拥有的扩展点
pub const APP_HOOKS: [&str; 6] = [
    "core.app.before_request",
    "core.app.after_request",
    "core.app.route_exception",
    "core.error.init",
    "core.error.before",
    "core.error.after",
];

pub struct Application {
    name: String,
    config: Config,
    factory: EngineFactory,
    routes: HashMap<HttpMethod, Vec<Arc<Route>>>,
    hooks: HookStore,
    /// 插件贡献的钩子别名
    hook_aliases: HashMap<String, String>,
    postponed: Mutex<PostponedHooks>,
    plugins: Vec<Arc<dyn Plugin>>,
    route_handlers: Vec<Arc<dyn RouteHandler>>,
    prefix: Option<String>,
    /// 显式指定的引擎名，优先于配置
    engine_names: HashMap<EngineKind, String>,
    logger: OnceLock<Arc<LoggerEngine>>,
    session: OnceLock<Arc<SessionEngine>>,
    template: OnceLock<Option<Arc<TemplateEngine>>>,
    serializer: OnceLock<Option<Arc<SerializerEngine>>>,
    /// 串行化引擎构建
    build_lock: Mutex<()>,
    finished: bool,
}

impl Application {
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, EngineFactory::default())
    }

    /// 使用自定义的引擎工厂（可登记额外的后端）
    pub fn with_factory(config: Config, factory: EngineFactory) -> Self {
        Self {
            name: config.appname().to_string(),
            config,
            factory,
            routes: HashMap::new(),
            hooks: HookStore::new(&APP_HOOKS),
            hook_aliases: HashMap::new(),
            postponed: Mutex::new(PostponedHooks::new()),
            plugins: Vec::new(),
            route_handlers: Vec::new(),
            prefix: None,
            engine_names: HashMap::new(),
            logger: OnceLock::new(),
            session: OnceLock::new(),
            template: OnceLock::new(),
            serializer: OnceLock::new(),
            build_lock: Mutex::new(()),
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn factory(&self) -> &EngineFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut EngineFactory {
        &mut self.factory
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 通过日志引擎记录；日志引擎无法构建时退回 `log` 门面
    pub fn log(&self, level: LogLevel, message: &str) {
        match self.logger_engine() {
            Ok(logger) => logger.log(level, message),
            Err(e) => warn!("日志引擎不可用（{}）：{}", e, message),
        }
    }
}

// --- 路由 ---

impl Application {
    /// 注册一条路由，前缀取自当前的词法前缀。重复的模式不会被拒绝
    pub fn add_route<F>(
        &mut self,
        method: &str,
        pattern: impl Into<RoutePattern>,
        conditions: &[(&str, &str)],
        handler: F,
    ) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        let method = parse_method(method)?;
        let route = Route::new(
            method,
            pattern.into(),
            self.prefix.as_deref(),
            conditions,
            Arc::new(handler),
        )?;
        Ok(self.push_route(route))
    }

    fn push_route(&mut self, route: Route) -> Arc<Route> {
        let route = Arc::new(route);
        debug!("注册路由 {} {}", route.method(), route.spec());
        self.routes
            .entry(route.method())
            .or_default()
            .push(Arc::clone(&route));
        route
    }

    fn route_with(
        &mut self,
        method: HttpMethod,
        pattern: RoutePattern,
        handler: HandlerFn,
    ) -> Result<Arc<Route>, AppError> {
        let route = Route::new(method, pattern, self.prefix.as_deref(), &[], handler)?;
        Ok(self.push_route(route))
    }

    /// 注册 GET 路由，同一模式的 HEAD 路由不存在时一并注册
    pub fn get<F>(&mut self, pattern: impl Into<RoutePattern>, handler: F) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        let handler: HandlerFn = Arc::new(handler);
        let route = self.route_with(HttpMethod::Get, pattern.clone(), Arc::clone(&handler))?;
        let head = Route::new(HttpMethod::Head, pattern, self.prefix.as_deref(), &[], handler)?;
        if !self.route_exists(&head) {
            self.push_route(head);
        }
        Ok(route)
    }

    pub fn post<F>(&mut self, pattern: impl Into<RoutePattern>, handler: F) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.route_with(HttpMethod::Post, pattern.into(), Arc::new(handler))
    }

    pub fn put<F>(&mut self, pattern: impl Into<RoutePattern>, handler: F) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.route_with(HttpMethod::Put, pattern.into(), Arc::new(handler))
    }

    pub fn del<F>(&mut self, pattern: impl Into<RoutePattern>, handler: F) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.route_with(HttpMethod::Delete, pattern.into(), Arc::new(handler))
    }

    pub fn patch<F>(&mut self, pattern: impl Into<RoutePattern>, handler: F) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.route_with(HttpMethod::Patch, pattern.into(), Arc::new(handler))
    }

    pub fn options<F>(&mut self, pattern: impl Into<RoutePattern>, handler: F) -> Result<Arc<Route>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.route_with(HttpMethod::Options, pattern.into(), Arc::new(handler))
    }

    /// 为多个方法注册同一处理函数；`methods` 为空时注册全部方法
    pub fn any<F>(
        &mut self,
        methods: &[&str],
        pattern: impl Into<RoutePattern>,
        handler: F,
    ) -> Result<Vec<Arc<Route>>, AppError>
    where
        F: Fn(&mut Context<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        let methods = if methods.is_empty() {
            HttpMethod::ALL.to_vec()
        } else {
            methods
                .iter()
                .map(|m| parse_method(m))
                .collect::<Result<Vec<_>, _>>()?
        };
        let pattern = pattern.into();
        let handler: HandlerFn = Arc::new(handler);
        methods
            .into_iter()
            .map(|method| self.route_with(method, pattern.clone(), Arc::clone(&handler)))
            .collect()
    }

    /// 同一方法下是否已有相同模式的路由
    pub fn route_exists(&self, route: &Route) -> bool {
        self.routes
            .get(&route.method())
            .is_some_and(|routes| routes.iter().any(|r| r.spec() == route.spec()))
    }

    /// 某方法下各路由编译后的正则，按注册顺序
    pub fn routes_regexps_for(&self, method: &str) -> Result<Vec<String>, AppError> {
        let method = parse_method(method)?;
        Ok(self
            .routes(method)
            .iter()
            .map(|r| r.regexp().to_string())
            .collect())
    }

    pub fn routes(&self, method: HttpMethod) -> &[Arc<Route>] {
        self.routes.get(&method).map_or(&[], Vec::as_slice)
    }

    /// 在回调期间为新注册的路由加上前缀，结束后（包括出错时）恢复原前缀。
    /// 嵌套调用时前缀依次拼接，`/` 表示不加前缀
    pub fn lexical_prefix<F>(&mut self, prefix: &str, register: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut Self) -> Result<(), AppError>,
    {
        let previous = self.prefix.clone();
        self.prefix = match (previous.as_deref(), prefix) {
            (_, "/") | (_, "") => previous.clone(),
            (Some(outer), inner) => Some(format!("{}{}", outer, inner)),
            (None, inner) => Some(inner.to_string()),
        };
        let result = register(self);
        self.prefix = previous;
        result.map_err(|e| AppError::Prefix {
            prefix: prefix.to_string(),
            source: Box::new(e),
        })
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

fn parse_method(method: &str) -> Result<HttpMethod, AppError> {
    method
        .parse::<HttpMethod>()
        .map_err(|_| AppError::UnsupportedMethod(method.to_string()))
}

// --- 钩子 ---

impl Application {
    /// 注册钩子。名称先经别名解析为规范名：
    /// 应用自身支持则立即登记；否则交给第一个支持它的已构建引擎、路由处理器或插件；
    /// 都不支持时按 `(类别, 所有者)` 暂存，待所有者构建时认领。
    #[track_caller]
    pub fn add_hook(&self, hook: Hook) -> Result<(), AppError> {
        let site = Location::caller();
        let name = canonical_name(hook.name(), &self.hook_aliases);
        let hook = hook.renamed(&name);

        if self.hooks.supports(&name) {
            self.hooks.add(hook);
            return Ok(());
        }

        let parsed = HookName::parse(&name)?;
        if let Some(owner) = self
            .hook_candidates()
            .into_iter()
            .find(|candidate| candidate.supports_hook(&name))
        {
            owner.add_hook(hook);
            return Ok(());
        }

        util::lock(&self.postponed).postpone(&parsed, hook, site);
        Ok(())
    }

    /// 以闭包注册钩子
    #[track_caller]
    pub fn hook<F>(&self, name: &str, code: F) -> Result<(), AppError>
    where
        F: Fn(&mut Context<'_>, &mut HookArgs<'_>) -> Result<Flow, BoxError> + Send + Sync + 'static,
    {
        self.add_hook(Hook::new(name, code))
    }

    /// 执行命名钩子。应用不拥有该名称时委托给第一个拥有它的候选者
    pub fn execute_hook(
        &self,
        ctx: &mut Context<'_>,
        name: &str,
        args: &mut HookArgs<'_>,
    ) -> Result<Flow, DispatchError> {
        let name = canonical_name(name, &self.hook_aliases);
        if self.hooks.supports(&name) {
            return run_hooks(ctx, &name, self.hooks.hooks(&name), args);
        }
        match self
            .hook_candidates()
            .into_iter()
            .find(|candidate| candidate.supports_hook(&name))
        {
            Some(owner) => owner.execute_hook(ctx, &name, args),
            None => Err(DispatchError::UnknownHook(name)),
        }
    }

    /// 已构建的引擎、已登记的路由处理器与插件
    fn hook_candidates(&self) -> Vec<&dyn Hookable> {
        let mut candidates: Vec<&dyn Hookable> = Vec::new();
        if let Some(engine) = self.logger.get() {
            candidates.push(&**engine);
        }
        if let Some(engine) = self.session.get() {
            candidates.push(&**engine);
        }
        if let Some(Some(engine)) = self.template.get() {
            candidates.push(&**engine);
        }
        if let Some(Some(engine)) = self.serializer.get() {
            candidates.push(&**engine);
        }
        candidates.extend(self.route_handlers.iter().map(|h| h.as_hookable()));
        candidates.extend(self.plugins.iter().map(|p| p.as_hookable()));
        candidates
    }

    fn claim_postponed(&self, owner: &dyn Hookable) {
        let claimed = util::lock(&self.postponed).claim(owner);
        if claimed > 0 {
            debug!(
                "{}.{}认领了{}个暂存钩子",
                owner.hookable_kind(),
                owner.hookable_name(),
                claimed
            );
        }
    }

    /// 某所有者仍在暂存表中的钩子数量
    pub fn postponed_hooks(&self, kind: HookableKind, owner: &str) -> usize {
        util::lock(&self.postponed).pending(kind, owner)
    }

    /// 登记插件：合并其别名并认领属于它的暂存钩子
    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        for (alias, canonical) in plugin.hook_aliases() {
            self.hook_aliases.insert(alias, canonical);
        }
        self.claim_postponed(plugin.as_hookable());
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// 登记路由处理器，其路由在 [`Application::finish`] 时注册
    pub fn add_route_handler(&mut self, handler: Arc<dyn RouteHandler>) {
        self.claim_postponed(handler.as_hookable());
        self.route_handlers.push(handler);
    }

    pub fn route_handlers(&self) -> &[Arc<dyn RouteHandler>] {
        &self.route_handlers
    }
}

impl Hookable for Application {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Core
    }

    fn hookable_name(&self) -> &str {
        "app"
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}

// --- 引擎槽位 ---

impl Application {
    /// 引擎名：显式指定 → 配置 → 默认值（仅日志与会话有默认值）
    fn engine_name(&self, kind: EngineKind) -> Option<String> {
        if let Some(name) = self.engine_names.get(&kind) {
            return Some(name.clone()).filter(|n| !n.is_empty());
        }
        let configured = match kind {
            EngineKind::Logger => Some(self.config.logger().unwrap_or("console")),
            EngineKind::Session => Some(self.config.session().unwrap_or("simple")),
            EngineKind::Template => self.config.template(),
            EngineKind::Serializer => self.config.serializer(),
        };
        configured.map(str::to_string)
    }

    /// 指定某类引擎的后端名，已构建的同类引擎被丢弃。
    /// 模板与序列化引擎可以用空名表示不使用
    pub fn set_engine(&mut self, kind: EngineKind, name: &str) -> Result<(), AppError> {
        let optional = matches!(kind, EngineKind::Template | EngineKind::Serializer);
        if !(optional && name.is_empty()) {
            validate_engine_name(kind, name)?;
        }
        self.engine_names.insert(kind, name.to_string());
        match kind {
            EngineKind::Logger => self.logger = OnceLock::new(),
            EngineKind::Session => self.session = OnceLock::new(),
            EngineKind::Template => self.template = OnceLock::new(),
            EngineKind::Serializer => self.serializer = OnceLock::new(),
        }
        Ok(())
    }

    pub fn set_logger_engine(&mut self, engine: LoggerEngine) {
        let engine = Arc::new(engine);
        self.claim_postponed(&*engine);
        self.logger = OnceLock::from(engine);
    }

    pub fn set_session_engine(&mut self, engine: SessionEngine) {
        let engine = Arc::new(engine);
        self.claim_postponed(&*engine);
        self.session = OnceLock::from(engine);
    }

    pub fn set_template_engine(&mut self, engine: Option<TemplateEngine>) {
        let engine = engine.map(Arc::new);
        if let Some(engine) = &engine {
            self.claim_postponed(&**engine);
        }
        self.template = OnceLock::from(engine);
    }

    pub fn set_serializer_engine(&mut self, engine: Option<SerializerEngine>) {
        let engine = engine.map(Arc::new);
        if let Some(engine) = &engine {
            self.claim_postponed(&**engine);
        }
        self.serializer = OnceLock::from(engine);
    }

    pub fn is_engine_built(&self, kind: EngineKind) -> bool {
        match kind {
            EngineKind::Logger => self.logger.get().is_some(),
            EngineKind::Session => self.session.get().is_some(),
            EngineKind::Template => self.template.get().is_some(),
            EngineKind::Serializer => self.serializer.get().is_some(),
        }
    }

    /// 双重检查：持有构建锁后再看一次槽位
    fn build_slot<'s, T>(
        &'s self,
        slot: &'s OnceLock<T>,
        build: impl FnOnce() -> Result<T, AppError>,
    ) -> Result<&'s T, AppError> {
        if let Some(value) = slot.get() {
            return Ok(value);
        }
        let _guard = util::lock(&self.build_lock);
        if let Some(value) = slot.get() {
            return Ok(value);
        }
        let value = build()?;
        Ok(slot.get_or_init(|| value))
    }

    fn setup(
        &self,
        kind: EngineKind,
        name: &str,
        logger: Option<Arc<LoggerEngine>>,
    ) -> Result<EngineSetup, AppError> {
        let location = match kind {
            EngineKind::Session => self.config.session_dir(),
            EngineKind::Template => self.config.views(),
            EngineKind::Logger | EngineKind::Serializer => self.config.appdir().to_path_buf(),
        };
        EngineSetup::from_config(kind, name, &self.config, logger, location)
    }

    pub fn logger_engine(&self) -> Result<Arc<LoggerEngine>, AppError> {
        let engine = self.build_slot(&self.logger, || {
            let name = self
                .engine_name(EngineKind::Logger)
                .unwrap_or_else(|| "console".to_string());
            let setup = self.setup(EngineKind::Logger, &name, None)?;
            let engine = Arc::new(self.factory.build_logger(&setup)?);
            self.claim_postponed(&*engine);
            Ok(engine)
        })?;
        Ok(Arc::clone(engine))
    }

    pub fn session_engine(&self) -> Result<Arc<SessionEngine>, AppError> {
        if let Some(engine) = self.session.get() {
            return Ok(Arc::clone(engine));
        }
        // 日志引擎在构建锁之外解析
        let logger = self.logger_engine()?;
        let engine = self.build_slot(&self.session, || {
            let name = self
                .engine_name(EngineKind::Session)
                .unwrap_or_else(|| "simple".to_string());
            let setup = self.setup(EngineKind::Session, &name, Some(logger))?;
            let engine = Arc::new(self.factory.build_session(&setup)?);
            self.claim_postponed(&*engine);
            Ok(engine)
        })?;
        Ok(Arc::clone(engine))
    }

    pub fn template_engine(&self) -> Result<Option<Arc<TemplateEngine>>, AppError> {
        if let Some(engine) = self.template.get() {
            return Ok(engine.clone());
        }
        let logger = self.logger_engine()?;
        let engine = self.build_slot(&self.template, || {
            let Some(name) = self.engine_name(EngineKind::Template) else {
                return Ok(None);
            };
            let setup = self.setup(EngineKind::Template, &name, Some(logger))?;
            let engine = Arc::new(self.factory.build_template(&setup, &self.config)?);
            self.claim_postponed(&*engine);
            Ok(Some(engine))
        })?;
        Ok(engine.clone())
    }

    pub fn serializer_engine(&self) -> Result<Option<Arc<SerializerEngine>>, AppError> {
        if let Some(engine) = self.serializer.get() {
            return Ok(engine.clone());
        }
        let logger = self.logger_engine()?;
        let engine = self.build_slot(&self.serializer, || {
            let Some(name) = self.engine_name(EngineKind::Serializer) else {
                return Ok(None);
            };
            let setup = self.setup(EngineKind::Serializer, &name, Some(logger))?;
            let engine = Arc::new(self.factory.build_serializer(&setup)?);
            self.claim_postponed(&*engine);
            Ok(Some(engine))
        })?;
        Ok(engine.clone())
    }
}

// --- 收尾 ---

impl Application {
    /// 首次分发前调用：构建全部引擎，注册路由处理器的路由，
    /// 并报告仍未被认领的暂存钩子。重复调用无副作用
    pub fn finish(&mut self) -> Result<(), AppError> {
        if self.finished {
            return Ok(());
        }
        self.logger_engine()?;
        self.session_engine()?;
        self.template_engine()?;
        self.serializer_engine()?;

        let has_file_handler = self
            .route_handlers
            .iter()
            .any(|h| h.as_hookable().hookable_name() == "file");
        if self.config.static_handler() && !has_file_handler {
            let handler = Arc::new(FileHandler::new(&self.config));
            self.add_route_handler(handler);
        }

        // 处理器路由排在显式路由之后，且不受词法前缀影响
        let saved_prefix = self.prefix.take();
        let handlers = self.route_handlers.clone();
        let registered = handlers
            .into_iter()
            .try_for_each(|handler| handler.register(self));
        self.prefix = saved_prefix;
        registered?;

        let postponed = util::lock(&self.postponed);
        for kind in [HookableKind::Engine, HookableKind::Handler, HookableKind::Plugin] {
            for owner in postponed.owners(kind) {
                warn!(
                    "应用{}：{}.{}从未被构建，{}个钩子未被认领",
                    self.name,
                    kind,
                    owner,
                    postponed.pending(kind, &owner)
                );
            }
        }
        drop(postponed);

        self.finished = true;
        debug!("应用{}构建完成", self.name);
        Ok(())
    }
}
