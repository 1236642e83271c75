// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 路由处理器：在 [`Application::finish`] 时向应用注册自己的路由，
//! 并拥有 `handler.<name>.<event>` 形式的钩子。

pub mod file;

use std::sync::Arc;

use crate::{app::Application, exception::AppError, hook::Hookable};

pub trait RouteHandler: Hookable {
    /// 注册路由，排在显式路由之后
    fn register(self: Arc<Self>, app: &mut Application) -> Result<(), AppError>;

    fn as_hookable(&self) -> &dyn Hookable;
}
