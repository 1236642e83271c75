// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 序列化引擎：路由返回结构化数据时，由它转换为响应体

use std::sync::Arc;

use serde_json::Value;

use crate::{
    context::Context,
    engine::logger::LoggerEngine,
    exception::{BoxError, DispatchError},
    hook::{HookArgs, HookStore, Hookable, HookableKind},
};

const SERIALIZER_HOOKS: [&str; 2] = ["engine.serializer.before", "engine.serializer.after"];

pub trait Format: Send + Sync {
    fn serialize(&self, data: &Value) -> Result<String, BoxError>;

    fn deserialize(&self, body: &[u8]) -> Result<Value, BoxError>;

    fn content_type(&self) -> &str;
}

pub struct JsonFormat {
    pretty: bool,
}

impl JsonFormat {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl Format for JsonFormat {
    fn serialize(&self, data: &Value) -> Result<String, BoxError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(text)
    }

    fn deserialize(&self, body: &[u8]) -> Result<Value, BoxError> {
        Ok(serde_json::from_slice(body)?)
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}

pub struct SerializerEngine {
    name: String,
    format: Box<dyn Format>,
    hooks: HookStore,
    logger: Option<Arc<LoggerEngine>>,
}

impl SerializerEngine {
    pub fn new(name: &str, format: Box<dyn Format>, logger: Option<Arc<LoggerEngine>>) -> Self {
        Self {
            name: name.to_string(),
            format,
            hooks: HookStore::new(&SERIALIZER_HOOKS),
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        self.format.content_type()
    }

    /// 序列化数据，前后分别触发 `engine.serializer.before` 与 `engine.serializer.after`
    pub fn serialize(&self, ctx: &mut Context<'_>, data: &Value) -> Result<String, DispatchError> {
        self.execute_hook(ctx, "engine.serializer.before", &mut HookArgs::Data(data))?;
        let mut content = self.format.serialize(data).map_err(|e| {
            if let Some(logger) = &self.logger {
                logger.error(&format!("Failed to serialize data: {}", e));
            }
            DispatchError::Serializer(e.to_string())
        })?;
        self.execute_hook(
            ctx,
            "engine.serializer.after",
            &mut HookArgs::Content(&mut content),
        )?;
        Ok(content)
    }

    pub fn deserialize(&self, body: &[u8]) -> Result<Value, DispatchError> {
        self.format.deserialize(body).map_err(|e| {
            if let Some(logger) = &self.logger {
                logger.error(&format!("Failed to deserialize content: {}", e));
            }
            DispatchError::Serializer(e.to_string())
        })
    }
}

impl Hookable for SerializerEngine {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Engine
    }

    fn hookable_name(&self) -> &str {
        "serializer"
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}
