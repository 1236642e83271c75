// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 静态文件处理器
//!
//! 为 `GET`/`HEAD /**` 提供 `public_dir` 下的文件。文件不存在（或路径包含 `..`
//! 段）时放行给后续路由。小文件经 [`FileCache`] 缓存；超过流式阈值的文件在信封
//! 支持流式输出时按块写出，否则一次性读入内存。

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use log::debug;

use crate::{
    app::Application,
    cache::FileCache,
    config::Config,
    context::{Context, Flow},
    exception::{AppError, BoxError},
    handler::RouteHandler,
    hook::{HookArgs, HookStore, Hookable, HookableKind},
    param::MIME_TYPES,
    util,
};

const FILE_HOOKS: [&str; 2] = ["handler.file.before_render", "handler.file.after_render"];

const DEFAULT_MIME: &str = "application/octet-stream";

pub struct FileHandler {
    public_dir: PathBuf,
    cache: Mutex<FileCache>,
    streaming_threshold: u64,
    chunk_size: usize,
    hooks: HookStore,
}

impl FileHandler {
    pub fn new(config: &Config) -> Self {
        Self::with_dir(config.public_dir(), config)
    }

    /// 指定静态目录，其余参数取自配置
    pub fn with_dir(public_dir: PathBuf, config: &Config) -> Self {
        let threshold = config.streaming_threshold();
        Self {
            public_dir,
            cache: Mutex::new(FileCache::new(config.file_cache_size(), threshold)),
            streaming_threshold: threshold,
            chunk_size: config.chunk_size().max(1),
            hooks: HookStore::new(&FILE_HOOKS),
        }
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    pub fn cached_files(&self) -> usize {
        util::lock(&self.cache).len()
    }

    fn mime_type(path: &Path) -> &'static str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| MIME_TYPES.get(ext.to_ascii_lowercase().as_str()).copied())
            .unwrap_or(DEFAULT_MIME)
    }

    /// 请求路径映射到静态目录下的文件；包含 `..` 段时返回 `None`
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        if request_path.split('/').any(|segment| segment == "..") {
            return None;
        }
        Some(self.public_dir.join(request_path.trim_start_matches('/')))
    }

    fn read_cached(&self, path: &Path, size: u64) -> Result<Bytes, BoxError> {
        let modified = fs::metadata(path)?.modified()?;
        if let Some(bytes) = util::lock(&self.cache).find(path, modified) {
            debug!("文件{}命中缓存", path.display());
            return Ok(bytes);
        }
        let bytes = Bytes::from(fs::read(path)?);
        let mut cache = util::lock(&self.cache);
        if cache.should_cache(size) {
            cache.push(path, bytes.clone(), modified);
        }
        Ok(bytes)
    }

    pub fn serve(&self, ctx: &mut Context<'_>) -> Result<Flow, BoxError> {
        let request_path = ctx.request().path().to_string();
        if request_path.contains('\0') {
            ctx.status(400);
            return Ok(Flow::Content(Bytes::from_static(b"Bad Request")));
        }
        let Some(path) = self.resolve(&request_path) else {
            return Ok(ctx.pass());
        };
        let size = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(ctx.pass()),
        };

        self.execute_hook(ctx, "handler.file.before_render", &mut HookArgs::File(&path))?;
        if ctx.response().is_halted() {
            return Ok(Flow::Halt);
        }

        ctx.content_type(Self::mime_type(&path));
        if ctx.request().is_streaming() && size > self.streaming_threshold {
            debug!(
                "[ID{}]流式发送{}，大小{}字节",
                ctx.request().id(),
                path.display(),
                size
            );
            let source = path.clone();
            let chunk_size = self.chunk_size;
            ctx.response_mut().set_stream(
                size,
                Arc::new(move |writer: &mut dyn Write| -> io::Result<()> {
                    let mut file = File::open(&source)?;
                    let mut buffer = vec![0u8; chunk_size];
                    loop {
                        let n = file.read(&mut buffer)?;
                        if n == 0 {
                            break;
                        }
                        writer.write_all(&buffer[..n])?;
                    }
                    Ok(())
                }),
            );
        } else {
            let bytes = self.read_cached(&path, size)?;
            ctx.response_mut().set_content(bytes);
        }

        self.execute_hook(ctx, "handler.file.after_render", &mut HookArgs::File(&path))?;
        Ok(Flow::Next)
    }
}

impl Hookable for FileHandler {
    fn hookable_kind(&self) -> HookableKind {
        HookableKind::Handler
    }

    fn hookable_name(&self) -> &str {
        "file"
    }

    fn hook_store(&self) -> &HookStore {
        &self.hooks
    }
}

impl RouteHandler for FileHandler {
    fn register(self: Arc<Self>, app: &mut Application) -> Result<(), AppError> {
        for method in ["get", "head"] {
            let handler = Arc::clone(&self);
            app.add_route(method, "/**", &[], move |ctx| handler.serve(ctx))?;
        }
        Ok(())
    }

    fn as_hookable(&self) -> &dyn Hookable {
        self
    }
}
