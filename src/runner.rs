// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 依次尝试多个应用：第一个有路由匹配的应用给出响应，都不匹配时返回 404。

use std::sync::Arc;

use log::{debug, error};

use crate::{
    app::Application,
    dispatcher::method_not_allowed,
    param::HttpMethod,
    request::{Envelope, Request},
    response::Response,
};

#[derive(Default)]
pub struct Runner {
    apps: Vec<Arc<Application>>,
}

impl Runner {
    pub fn new(apps: Vec<Arc<Application>>) -> Self {
        Self { apps }
    }

    pub fn add_app(&mut self, app: Arc<Application>) {
        self.apps.push(app);
    }

    pub fn apps(&self) -> &[Arc<Application>] {
        &self.apps
    }

    /// 请求体只从信封读取一次，各应用拿到的是同一请求的副本
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

        for app in &self.apps {
            if let Some(response) = app.dispatch_request(request.clone(), true) {
                return response;
            }
            debug!("[ID{}]应用{}没有匹配的路由", request.id(), app.name());
        }

        match self.apps.first() {
            Some(app) => app.not_found(request),
            None => Response::plain(404, &format!("Not Found\n\n{}", request.path())),
        }
    }
}
