use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(32) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// 静态文件内容缓存。条目以文件路径为键，修改时间变化即视为失效
pub struct FileCache {
    cache: LruCache<PathBuf, CacheEntry>,
    max_entry_size: u64,
}

impl FileCache {
    /// 容量为 0 时退回默认容量
    pub fn new(capacity: usize, max_entry_size: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            cache: LruCache::new(capacity),
            max_entry_size,
        }
    }

    /// 文件是否小到值得缓存
    pub fn should_cache(&self, file_size: u64) -> bool {
        file_size <= self.max_entry_size
    }

    pub fn push(&mut self, path: &Path, bytes: Bytes, modified_time: SystemTime) {
        let entry = CacheEntry {
            content: bytes,
            modified_time,
        };
        self.cache.put(path.to_path_buf(), entry);
    }

    /// 查询有效缓存；过期条目会被顺带移除
    pub fn find(&mut self, path: &Path, current_modified_time: SystemTime) -> Option<Bytes> {
        let stale = match self.cache.get(path) {
            Some(entry) if entry.modified_time == current_modified_time => {
                return Some(entry.content.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.cache.pop(path);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
