use std::any::Any;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use crate::param::reason_phrase;

/// 默认错误页面的构建器
pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    /// 按状态码构建错误页面。`note` 会被转义后放在标题下方，缺省时使用原因短语
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{} {}", code, reason_phrase(code));
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            pre {
                white-space: pre-wrap;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => escape_html(n),
            None => reason_phrase(code).to_string(),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <pre>{}</pre>
            ",
            title, description
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

/// 转义 HTML 中有特殊含义的字符
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 获取互斥锁；锁被污染时恢复并继续
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("互斥锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("读写锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("读写锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

/// 从 `catch_unwind` 得到的负载中提取 panic 信息
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_error_page_escapes_note() {
        let html = HtmlBuilder::from_status_code(500, Some("<script>x</script>")).build();
        assert!(html.contains("500 Internal Server Error"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>x"));
    }

    #[test]
    fn test_error_page_default_note() {
        let html = HtmlBuilder::from_status_code(404, None).build();
        assert!(html.contains("<title>404 Not Found</title>"));
    }

    #[test]
    fn test_unknown_status_does_not_panic() {
        let html = HtmlBuilder::from_status_code(599, None).build();
        assert!(html.contains("599 Unknown"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a & b"), "a &amp; b");
        assert_eq!(escape_html("\"'"), "&quot;&#39;");
    }

    #[test]
    fn test_poisoned_mutex_recovers() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let cloned = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload = panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");
    }
}
