// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 会话值对象：id、键值数据、脏标记、新建标记与过期时间。

use chrono::{DateTime, Duration, Utc};
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    new: bool,
}

impl Session {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            data: Map::new(),
            expires: None,
            dirty: false,
            new: false,
        }
    }

    /// 新建的会话，尚未写入后端
    pub fn created(id: &str, expires: Option<DateTime<Utc>>) -> Self {
        Self {
            expires,
            new: true,
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn read(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn write(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
        self.dirty = true;
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        let old = self.data.remove(key);
        if old.is_some() {
            self.dirty = true;
        }
        old
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    /// 写入后端之后调用
    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.new = false;
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    pub fn set_expires(&mut self, expires: Option<DateTime<Utc>>) {
        self.expires = expires;
    }

    /// 把过期时间设为昨天
    pub fn expire(&mut self) {
        self.expires = Some(Utc::now() - Duration::days(1));
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }
}
