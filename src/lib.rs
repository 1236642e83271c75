// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # webapp
//!
//! Web 应用运行时的请求分发核心：路由匹配、生命周期钩子、惰性构建的引擎
//! （日志、会话、模板、序列化）、会话生命周期，以及 `halt`/`pass`/`forward`
//! 三种控制流。
//!
//! ```no_run
//! use webapp::{Application, Config, Envelope, Flow};
//!
//! let mut app = Application::new(Config::new());
//! app.get("/hello/:name", |ctx| {
//!     let name = ctx.route_param("name").unwrap_or("world").to_string();
//!     Ok(Flow::from(format!("Hi, {}", name)))
//! })
//! .unwrap();
//! app.finish().unwrap();
//! let response = app.dispatch(Envelope::new("GET", "/hello/Ada"));
//! assert_eq!(response.text(), "Hi, Ada");
//! ```

pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod cookie;
pub mod dispatcher;
pub mod engine;
pub mod exception;
pub mod handler;
pub mod hook;
pub mod param;
pub mod plugin;
pub mod request;
pub mod response;
pub mod route;
pub mod runner;
pub mod session;
pub mod util;

pub use app::Application;
pub use cache::FileCache;
pub use config::Config;
pub use context::{Context, Flow};
pub use engine::{logger::LogLevel, EngineFactory, EngineKind};
pub use exception::{AppError, BoxError, DispatchError, SessionError, WireError};
pub use hook::{Hook, HookArgs};
pub use param::HttpMethod;
pub use plugin::{BasicPlugin, Plugin};
pub use request::{Envelope, Request};
pub use response::Response;
pub use route::Splat;
pub use runner::Runner;
pub use session::Session;
pub use util::HtmlBuilder;
