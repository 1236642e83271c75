// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 分发上下文模块
//!
//! [`Context`] 是一次分发周期的全部可变状态：当前请求、当前响应、当前会话以及
//! 已销毁会话的标记。它由 `dispatch` 持有，并以 `&mut` 的形式显式传给每个路由处理函数
//! 与钩子。应用本身在分发期间只读。
//!
//! 控制流原语（halt / pass / forward）不做非局部跳转，而是返回一个 [`Flow`] 值，
//! 由分发循环据此切换状态。

use std::collections::HashMap;

use bytes::Bytes;
use log::debug;
use serde_json::Value;

use crate::{
    app::Application,
    engine::{logger::LogLevel, session::SessionEngine, template::Tokens},
    exception::{DispatchError, SessionError},
    hook::HookArgs,
    param::HttpMethod,
    request::Request,
    response::Response,
    route::Splat,
    session::Session,
};

/// 路由处理函数与钩子的返回值
#[derive(Debug, Clone)]
pub enum Flow {
    /// 正常继续，不提供内容
    Next,
    /// 路由返回的内容；若响应已确定内容则被忽略
    Content(Bytes),
    /// 需要经序列化引擎输出的结构化数据
    Data(Value),
    /// 立即结束分发：不再执行后续钩子、路由与会话写回
    Halt,
    /// 放弃当前路由，继续尝试下一个匹配的路由
    Pass,
    /// 以新的请求重新开始分发
    Forward(Box<Request>),
}

impl From<&str> for Flow {
    fn from(s: &str) -> Self {
        Flow::Content(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Flow {
    fn from(s: String) -> Self {
        Flow::Content(Bytes::from(s))
    }
}

impl From<Bytes> for Flow {
    fn from(b: Bytes) -> Self {
        Flow::Content(b)
    }
}

impl From<Value> for Flow {
    fn from(v: Value) -> Self {
        Flow::Data(v)
    }
}

pub struct Context<'a> {
    app: &'a Application,
    request: Request,
    response: Response,
    /// 当前会话。与 `destroyed` 互斥
    session: Option<Session>,
    destroyed: Option<Session>,
}

impl<'a> Context<'a> {
    pub fn new(app: &'a Application, request: Request) -> Self {
        Self {
            app,
            request,
            response: Response::new(),
            session: None,
            destroyed: None,
        }
    }

    pub fn app(&self) -> &'a Application {
        self.app
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }

    /// 丢弃本周期的会话状态
    pub(crate) fn cleanup(&mut self) {
        self.session = None;
        self.destroyed = None;
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.app.log(level, message);
    }

    /// 执行一个命名钩子，名称可以是别名
    pub fn execute_hook(
        &mut self,
        name: &str,
        args: &mut HookArgs<'_>,
    ) -> Result<Flow, DispatchError> {
        let app = self.app;
        app.execute_hook(self, name, args)
    }
}

// --- 控制流原语 ---

impl Context<'_> {
    pub fn halt(&mut self) -> Flow {
        self.response.halt();
        Flow::Halt
    }

    /// 以指定内容结束分发
    pub fn halt_with(&mut self, content: impl Into<Bytes>) -> Flow {
        self.response.set_content(content.into());
        self.halt()
    }

    pub fn pass(&mut self) -> Flow {
        self.response.set_passed(true);
        Flow::Pass
    }

    pub fn forward(&self, path: &str) -> Flow {
        self.forward_with(path, None, None)
    }

    /// 以新路径（可选地合并参数、改写方法）重新分发。
    ///
    /// 若当前存在会话而请求中没有会话 Cookie，则把会话 id 写入新请求的 Cookie，
    /// 使目标路由看到同一个会话。
    pub fn forward_with(
        &self,
        path: &str,
        params: Option<HashMap<String, String>>,
        method: Option<HttpMethod>,
    ) -> Flow {
        let mut request = self.request.forwarded(path, params, method);
        if let Some(session) = &self.session {
            if let Ok(engine) = self.app.session_engine() {
                let name = engine.cookie_name();
                if request.cookie(name).is_none() {
                    request.set_cookie(name, session.id());
                }
            }
        }
        Flow::Forward(Box::new(request))
    }

    /// 设置重定向，`status` 缺省为 302
    pub fn redirect(&mut self, location: &str, status: Option<u16>) -> Flow {
        self.response.redirect(location, status.unwrap_or(302));
        Flow::Next
    }
}

// --- 请求与响应的便捷访问 ---

impl Context<'_> {
    pub fn status(&mut self, status: u16) {
        self.response.set_status(status);
    }

    pub fn header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, value);
    }

    pub fn content_type(&mut self, content_type: &str) {
        self.response.set_content_type(content_type);
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.param(name)
    }

    pub fn route_param(&self, name: &str) -> Option<&str> {
        self.request.route_param(name)
    }

    pub fn splat(&self) -> &[Splat] {
        self.request.splat()
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.request.var(name)
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        self.request.set_var(name, value.into());
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.request.cookie(name)
    }

    /// 用模板引擎渲染视图
    pub fn template(&mut self, view: &str, tokens: Tokens) -> Result<String, DispatchError> {
        let engine = self
            .app
            .template_engine()?
            .ok_or_else(|| DispatchError::Template("no template engine configured".to_string()))?;
        engine.process(self, view, tokens, None)
    }
}

// --- 会话生命周期 ---

impl Context<'_> {
    /// 是否存在会话：内存中有当前会话，或带有会话 Cookie 且本周期未销毁会话。
    /// 不会触发任何后端读取
    pub fn has_session(&self) -> bool {
        if self.session.is_some() {
            return true;
        }
        if self.destroyed.is_some() {
            return false;
        }
        self.session_cookie().is_some()
    }

    /// 会话 Cookie 中的 id；格式非法的 id 视同没有 Cookie
    fn session_cookie(&self) -> Option<String> {
        let engine = self.app.session_engine().ok()?;
        self.request
            .cookie(engine.cookie_name())
            .filter(|id| SessionEngine::validate_id(id))
            .map(str::to_string)
    }

    /// 当前会话，首次访问时按 Cookie 读取或新建
    pub fn session(&mut self) -> Result<&mut Session, DispatchError> {
        if self.session.is_none() {
            let engine = self.app.session_engine()?;
            let mut found = None;
            if self.destroyed.is_none() {
                if let Some(id) = self.request.cookie(engine.cookie_name()).map(str::to_string) {
                    match engine.retrieve(self, &id) {
                        Ok(session) => found = Some(session),
                        Err(DispatchError::Session(e)) if e.is_not_found() => {
                            debug!("[ID{}]会话{}不存在，将新建会话", self.request.id(), id);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            let session = match found {
                Some(session) => session,
                None => engine.create(self)?,
            };
            self.set_session(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| DispatchError::Session(SessionError::Backend("no session".to_string())))
    }

    /// 替换当前会话，同时清除销毁标记
    pub fn set_session(&mut self, session: Session) {
        self.destroyed = None;
        self.session = Some(session);
    }

    /// 内存中的当前会话，不会触发读取
    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub(crate) fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    pub fn destroyed_session(&self) -> Option<&Session> {
        self.destroyed.as_ref()
    }

    pub(crate) fn take_destroyed(&mut self) -> Option<Session> {
        self.destroyed.take()
    }

    /// 恢复转发前的销毁标记，同时清除当前会话
    pub(crate) fn set_destroyed(&mut self, session: Session) {
        self.session = None;
        self.destroyed = Some(session);
    }

    pub fn session_get(&mut self, key: &str) -> Result<Option<Value>, DispatchError> {
        Ok(self.session()?.read(key).cloned())
    }

    pub fn session_set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), DispatchError> {
        self.session()?.write(key, value.into());
        Ok(())
    }

    /// 销毁会话：立即在后端删除，并记录销毁标记以便写回过期 Cookie。
    ///
    /// Cookie 中的 id 先经后端读取确认；读取不到（包括 id 非法）或没有 Cookie 时，
    /// 使用一个从未持久化的临时会话，不会新建会话，也不会删除后端数据。
    pub fn destroy_session(&mut self) -> Result<(), DispatchError> {
        let engine = self.app.session_engine()?;
        let (mut session, persisted) = match self.session.take() {
            Some(session) => (session, true),
            None => match self.request.cookie(engine.cookie_name()).map(str::to_string) {
                Some(id) => match engine.retrieve(self, &id) {
                    Ok(session) => (session, true),
                    // 过期会话的 id 已经过校验，仍需从后端删除
                    Err(DispatchError::Session(SessionError::Expired(_))) => {
                        (Session::new(&id), true)
                    }
                    Err(DispatchError::Session(SessionError::NotFound(_))) => {
                        debug!("[ID{}]会话{}不存在，不访问后端", self.request.id(), id);
                        (Session::new(&engine.generate_id()), false)
                    }
                    Err(e) => return Err(e),
                },
                None => (Session::new(&engine.generate_id()), false),
            },
        };
        session.expire();
        if persisted {
            engine.destroy(self, session.id())?;
        }
        self.destroyed = Some(session);
        Ok(())
    }

    /// 请求结束时写回会话并设置 Cookie
    pub(crate) fn finalize_session(&mut self) -> Result<(), DispatchError> {
        if let Some(mut session) = self.session.take() {
            let engine = self.app.session_engine()?;
            if session.is_dirty() || session.is_new() {
                engine.flush(self, &mut session)?;
            }
            engine.set_cookie_header(&mut self.response, &session, false);
            self.session = Some(session);
        } else if self.destroyed.is_none() {
            if let Some(id) = self.session_cookie() {
                // 只续期 Cookie，不读取后端
                let engine = self.app.session_engine()?;
                engine.set_cookie_header(&mut self.response, &Session::new(&id), false);
            }
        } else if let Some(destroyed) = &self.destroyed {
            let engine = self.app.session_engine()?;
            engine.set_cookie_header(&mut self.response, destroyed, true);
        }
        Ok(())
    }
}
