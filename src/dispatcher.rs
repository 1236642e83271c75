// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发
//!
//! 分发循环按注册顺序遍历请求方法下的路由，首个匹配者运行
//! `before_request` 钩子与路由体，并把结果归为 [`RouteResult`]：
//!
//! - `Halted`：立即返回响应，不运行 after 钩子，也不写回会话；
//! - `Passed`：清除本路由的捕获与已缓冲内容，继续尝试后续路由；
//! - `Forwarded`：携带会话（或会话的销毁标记），以新请求从头开始分发；
//! - `Failed`：路由或 before 钩子出错，已生成 500 响应。
//!
//! 分发入口把所有残余的致命错误（包括 panic）转换为 500 纯文本响应。

use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use log::{debug, error, info};
use serde_json::{json, Value};

use crate::{
    app::Application,
    context::{Context, Flow},
    engine::{logger::LogLevel, template::Tokens},
    exception::DispatchError,
    hook::HookArgs,
    param::{reason_phrase, HttpMethod},
    request::{parse_form, Envelope, Request},
    response::Response,
    route::Route,
    session::Session,
    util::{self, HtmlBuilder},
};

/// 单条路由的执行结果
enum RouteResult {
    Continue,
    Halted,
    Passed,
    Forwarded(Request),
    Failed,
}

/// 405 纯文本响应，不构造请求、不写日志
pub fn method_not_allowed(method: &str) -> Response {
    Response::plain(
        405,
        &format!("Method Not Allowed\n\n{} is not supported.", method),
    )
}

fn internal_error(message: &str) -> Response {
    Response::plain(500, &format!("Internal Server Error\n\n{}", message))
}

impl Application {
    /// 分发一个请求信封，总会得到一个响应
    pub fn dispatch(&self, envelope: Envelope) -> Response {
        let method = match envelope.method().parse::<HttpMethod>() {
            Ok(method) => method,
            Err(_) => return method_not_allowed(envelope.method()),
        };
        let request = match Request::new(method, envelope) {
            Ok(request) => request,
            Err(e) => {
                error!("读取请求体失败：{}", e);
                return Response::plain(400, &format!("Bad Request\n\n{}", e));
            }
        };
        match self.dispatch_request(request, false) {
            Some(response) => response,
            None => internal_error("no response"),
        }
    }

    /// 分发一个已构造的请求。
    ///
    /// `fallthrough` 为真时没有路由匹配则返回 `None`，交由下一个应用处理；
    /// 否则生成 404 响应。
    pub fn dispatch_request(&self, request: Request, fallthrough: bool) -> Option<Response> {
        let id = request.id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatch_loop(request, fallthrough)
        }));
        let message = match outcome {
            Ok(Ok(response)) => return response,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => util::panic_message(&*payload),
        };
        error!("[ID{}]分发失败：{}", id, message);
        self.log(LogLevel::Error, &message);
        Some(internal_error(&message))
    }

    fn dispatch_loop(
        &self,
        request: Request,
        fallthrough: bool,
    ) -> Result<Option<Response>, DispatchError> {
        let mut request = request;
        let mut carried: Option<Session> = None;
        let mut carried_destroyed: Option<Session> = None;
        let mut first_cycle = true;

        'cycle: loop {
            debug!(
                "[ID{}]分发 {} {}",
                request.id(),
                request.method(),
                request.path()
            );
            let mut ctx = Context::new(self, request);

            if first_cycle {
                first_cycle = false;
                if let Err(e) = self.parse_body(&mut ctx) {
                    self.render_error(&mut ctx, 400, &e.to_string())?;
                    return Ok(Some(ctx.into_response()));
                }
            }

            let method = ctx.request().method();
            for route in self.routes(method) {
                let Some(captures) = route.matches(ctx.request()) else {
                    continue;
                };
                ctx.request_mut().set_route_params(captures.params);
                ctx.request_mut().set_splat(captures.splat);
                if let Some(session) = carried.take() {
                    ctx.set_session(session);
                }
                if let Some(destroyed) = carried_destroyed.take() {
                    ctx.set_destroyed(destroyed);
                }

                match self.run_route(&mut ctx, route)? {
                    RouteResult::Continue => return self.complete(ctx).map(Some),
                    RouteResult::Halted => {
                        ctx.cleanup();
                        return Ok(Some(ctx.into_response()));
                    }
                    RouteResult::Passed => {
                        debug!("[ID{}]路由{}放行", ctx.request().id(), route.spec());
                        ctx.response_mut().set_passed(false);
                        ctx.response_mut().clear_content();
                        ctx.request_mut().clear_captures();
                    }
                    RouteResult::Forwarded(next) => {
                        debug!("[ID{}]转发到{}", ctx.request().id(), next.path());
                        carried = ctx.take_session();
                        carried_destroyed = ctx.take_destroyed();
                        ctx.cleanup();
                        request = next;
                        continue 'cycle;
                    }
                    RouteResult::Failed => return Ok(Some(ctx.into_response())),
                }
            }

            if fallthrough {
                return Ok(None);
            }
            let path = ctx.request().path().to_string();
            info!("[ID{}]没有匹配{}的路由，返回404", ctx.request().id(), path);
            self.render_error(&mut ctx, 404, &path)?;
            return Ok(Some(ctx.into_response()));
        }
    }

    /// 表单请求体解析为参数；与序列化引擎内容类型一致的请求体反序列化为数据
    fn parse_body(&self, ctx: &mut Context<'_>) -> Result<(), DispatchError> {
        if ctx.request().body().is_empty() {
            return Ok(());
        }
        let content_type = ctx.request().content_type().unwrap_or("").to_string();
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let params = parse_form(ctx.request().body());
            ctx.request_mut().set_body_params(params);
            return Ok(());
        }
        if let Some(serializer) = self.serializer_engine()? {
            if content_type.starts_with(serializer.content_type()) {
                let data = serializer
                    .deserialize(ctx.request().body())
                    .map_err(|e| DispatchError::BadRequest(e.to_string()))?;
                ctx.request_mut().set_data(data);
            }
        }
        Ok(())
    }

    fn run_route(
        &self,
        ctx: &mut Context<'_>,
        route: &Route,
    ) -> Result<RouteResult, DispatchError> {
        match self.execute_hook(ctx, "core.app.before_request", &mut HookArgs::None) {
            Ok(Flow::Pass) => return Ok(RouteResult::Passed),
            Ok(Flow::Forward(next)) => return Ok(RouteResult::Forwarded(*next)),
            Ok(_) => {}
            Err(e) => return self.route_fault(ctx, &e.to_string()),
        }
        if ctx.response().is_halted() {
            return Ok(RouteResult::Halted);
        }
        if ctx.response().is_passed() {
            return Ok(RouteResult::Passed);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| route.execute(ctx)));
        let flow = match outcome {
            Ok(Ok(flow)) => flow,
            Ok(Err(e)) => return self.route_fault(ctx, &e.to_string()),
            Err(payload) => return self.route_fault(ctx, &util::panic_message(&*payload)),
        };

        match flow {
            Flow::Halt => {
                ctx.response_mut().halt();
                return Ok(RouteResult::Halted);
            }
            Flow::Pass => return Ok(RouteResult::Passed),
            Flow::Forward(next) => return Ok(RouteResult::Forwarded(*next)),
            Flow::Content(content) => {
                if !ctx.response().has_content() {
                    ctx.response_mut().set_content(content);
                }
            }
            Flow::Data(data) => {
                if !ctx.response().has_content() {
                    if let Err(e) = self.serialize_data(ctx, &data) {
                        return self.route_fault(ctx, &e.to_string());
                    }
                }
            }
            Flow::Next => {}
        }

        if ctx.response().is_halted() {
            return Ok(RouteResult::Halted);
        }
        if ctx.response().is_passed() {
            return Ok(RouteResult::Passed);
        }
        Ok(RouteResult::Continue)
    }

    /// 结构化数据交给序列化引擎；没有序列化引擎时字符串原样输出，其余值按 JSON 文本输出
    fn serialize_data(&self, ctx: &mut Context<'_>, data: &Value) -> Result<(), DispatchError> {
        let content = match self.serializer_engine()? {
            Some(serializer) => {
                let content = serializer.serialize(ctx, data)?;
                ctx.content_type(serializer.content_type());
                content
            }
            None => match data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        };
        ctx.response_mut().set_content(Bytes::from(content));
        Ok(())
    }

    /// 路由或 before 钩子出错：记录，运行一次 `route_exception` 钩子，生成 500
    fn route_fault(
        &self,
        ctx: &mut Context<'_>,
        message: &str,
    ) -> Result<RouteResult, DispatchError> {
        self.log(LogLevel::Error, &format!("Route exception: {}", message));
        self.execute_hook(ctx, "core.app.route_exception", &mut HookArgs::Error(message))?;
        ctx.cleanup();
        self.render_error(ctx, 500, message)?;
        Ok(RouteResult::Failed)
    }

    /// 正常结束：after 钩子、会话写回、清理、默认内容类型
    fn complete(&self, mut ctx: Context<'_>) -> Result<Response, DispatchError> {
        // after 钩子返回 pass/forward 时，其余 after 钩子被跳过，响应照常返回
        let flow = self.execute_hook(&mut ctx, "core.app.after_request", &mut HookArgs::None)?;
        if matches!(flow, Flow::Pass | Flow::Forward(_)) {
            debug!("[ID{}]after 钩子提前结束", ctx.request().id());
        }
        if !ctx.response().is_halted() {
            ctx.finalize_session()?;
        }
        ctx.cleanup();
        if ctx.response().has_content() && ctx.response().content_type().is_none() {
            let content_type = format!("text/html; charset={}", self.config().charset());
            ctx.content_type(&content_type);
        }
        Ok(ctx.into_response())
    }

    /// 以错误响应替换当前响应：
    /// `core.error.init` → `core.error.before` → 生成内容 → `core.error.after`
    fn render_error(
        &self,
        ctx: &mut Context<'_>,
        status: u16,
        message: &str,
    ) -> Result<(), DispatchError> {
        let message = if status >= 500 && !self.config().show_errors() {
            String::new()
        } else {
            message.to_string()
        };
        self.execute_hook(ctx, "core.error.init", &mut HookArgs::Error(&message))?;
        *ctx.response_mut() = Response::new();
        ctx.status(status);
        self.execute_hook(ctx, "core.error.before", &mut HookArgs::Error(&message))?;

        let title = format!("Error {} - {}", status, reason_phrase(status));
        let view = status.to_string();
        let mut content = if let Some(serializer) = self.serializer_engine()? {
            let data = json!({"status": status, "title": title, "message": message});
            let content = serializer.serialize(ctx, &data)?;
            ctx.content_type(serializer.content_type());
            content
        } else if let Some(template) = self
            .template_engine()?
            .filter(|engine| engine.view_exists(&view))
        {
            let mut tokens = Tokens::new();
            tokens.insert("status".to_string(), json!(status));
            tokens.insert("title".to_string(), json!(title));
            tokens.insert("message".to_string(), json!(message));
            template.process(ctx, &view, tokens, None)?
        } else {
            let note = Some(message.as_str()).filter(|m| !m.is_empty());
            HtmlBuilder::from_status_code(status, note).build()
        };

        self.execute_hook(ctx, "core.error.after", &mut HookArgs::Content(&mut content))?;
        if ctx.response().content_type().is_none() {
            let content_type = format!("text/html; charset={}", self.config().charset());
            ctx.content_type(&content_type);
        }
        ctx.response_mut().set_content(Bytes::from(content));
        Ok(())
    }

    /// 没有任何应用处理该请求时使用的 404 响应
    pub fn not_found(&self, request: Request) -> Response {
        let path = request.path().to_string();
        let mut ctx = Context::new(self, request);
        match self.render_error(&mut ctx, 404, &path) {
            Ok(()) => ctx.into_response(),
            Err(e) => internal_error(&e.to_string()),
        }
    }
}
