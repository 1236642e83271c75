// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 插件：拥有 `plugin.<name>.<event>` 钩子，并可以为这些钩子提供别名。

use crate::hook::{HookStore, Hookable, HookableKind};

pub trait Plugin: Hookable {
    /// `(别名, 规范名)` 列表，合并进应用的别名表，优先于内建别名
    fn hook_aliases(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn as_hookable(&self) -> &dyn Hookable;
}

/// 只声明扩展点与别名的插件，供应用代码直接使用
pub struct BasicPlugin {
    name: String,
    hooks: HookStore,
    aliases: Vec<(String, String)>,
}

impl BasicPlugin {
    /// `events` 为事件名，展开为 `plugin.<name>.<event>`
    pub fn new(name: &str, events: &[&str]) -> Self {
        let names: Vec<String> = events
            .iter()
            .map(|event| format!("plugin.{}.{}", name, event))
            .collect();
        Self {
            name: name.to_string(),
            hooks: HookStore::new(&names),
            aliases: Vec::new(),
        }
    }

    /// 把 `alias` 指向本插件的 `event`
    pub fn with_alias(mut self, alias: &str, event: &str) -> Self {
        self.aliases
            .push((alias.to_string(), format!("plugin.{}.{}", self.name, event)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Hookable for BasicPlugin {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Plugin
    }

    fn hookable_name(&self) -> &str {
        &self.name
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}

impl Plugin for BasicPlugin {
    fn hook_aliases(&self) -> Vec<(String, String)> {
        self.aliases.clone()
    }

    fn as_hookable(&self) -> &dyn Hookable {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_plugin_hooks() {
        let plugin = BasicPlugin::new("auth", &["login", "logout"]).with_alias("on_login", "login");
        assert!(plugin.supports_hook("plugin.auth.login"));
        assert!(!plugin.supports_hook("plugin.auth.signup"));
        assert_eq!(
            plugin.hook_aliases(),
            vec![("on_login".to_string(), "plugin.auth.login".to_string())]
        );
        assert_eq!(plugin.hookable_kind(), HookableKind::Plugin);
    }
}
