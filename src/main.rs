// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示服务器
//!
//! 基于 Tokio 运行时的 HTTP/1.1 适配层：
//! - 异步接收连接并读取完整的请求头与 `Content-Length` 声明的请求体，超过上限返回 413
//! - 把原始报文解析为 [`Envelope`]，在阻塞线程池中交给 [`Runner`] 分发
//! - 直接向套接字写出响应，流式响应体按块写出
//! - 后台管理控制台（`stop`/`status`/`help`）

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
};

use webapp::{
    Application, BoxError, Config, Envelope, Flow, HttpMethod, LogLevel, Runner,
};

const CONFIG_FILE: &str = "config/development.toml";
const LOG_CONFIG_FILE: &str = "config/log4rs.yaml";
const READ_CHUNK: usize = 4096;
/// 请求头的最大长度
const MAX_HEAD: usize = 64 * 1024;
/// 请求体的最大长度
const MAX_BODY: usize = 8 * 1024 * 1024;

/// 读取一个请求报文的结果
#[derive(Debug, PartialEq)]
enum ReadOutcome {
    /// 客户端未发送任何数据就关闭了连接
    Closed,
    Complete(Vec<u8>),
    /// `Content-Length` 超过 [`MAX_BODY`]
    TooLarge(usize),
}

fn main() -> Result<(), BoxError> {
    // 1. 日志系统：log4rs 通过外部 YAML 配置级别与输出目的地
    log4rs::init_file(LOG_CONFIG_FILE, Default::default())?;

    // 2. 应用配置
    let config = Config::from_toml(CONFIG_FILE)?;
    info!("配置文件已载入，应用：{}", config.appname());

    // 3. 构建应用并完成引擎初始化
    let app = Arc::new(build_app(config.clone())?);
    let runner = Arc::new(Runner::new(vec![app]));

    // 4. 运行时：工作线程数来自配置
    let runtime = Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, runner))
}

/// 演示路由
fn build_app(config: Config) -> Result<Application, BoxError> {
    let mut app = Application::new(config);

    app.get("/", |_ctx| Ok(Flow::from("Hello from webapp")))?;
    app.get("/hello/:name", |ctx| {
        let name = ctx.route_param("name").unwrap_or_default().to_string();
        Ok(Flow::from(format!("Hi, {}", name)))
    })?;
    app.get("/counter", |ctx| {
        let count = ctx
            .session_get("count")?
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + 1;
        ctx.session_set("count", count)?;
        Ok(Flow::from(format!("visits: {}", count)))
    })?;
    app.get("/logout", |ctx| {
        ctx.destroy_session()?;
        Ok(ctx.redirect("/", None))
    })?;
    app.get("/old", |ctx| Ok(ctx.forward("/")))?;
    app.post("/api/echo", |ctx| {
        let params = ctx.request().params();
        Ok(Flow::from(json!({ "params": params })))
    })?;

    app.hook("before", |ctx, _args| {
        ctx.log(
            LogLevel::Core,
            &format!("[ID{}]进入路由 {}", ctx.request().id(), ctx.request().path()),
        );
        Ok(Flow::Next)
    })?;

    app.finish()?;
    Ok(app)
}

async fn serve(config: Config, runner: Arc<Runner>) -> Result<(), BoxError> {
    // 监听地址：全地址 (0.0.0.0) 或本地回环 (127.0.0.1)
    let address = if config.local() {
        Ipv4Addr::new(127, 0, 0, 1)
    } else {
        Ipv4Addr::new(0, 0, 0, 0)
    };
    let socket = SocketAddrV4::new(address, config.port());
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", config.port(), e);
            return Err(e.into());
        }
    };
    info!("服务端将在{}上监听Socket连接", socket);

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let active_connection = Arc::new(AtomicU32::new(0));
    tokio::spawn(console(
        Arc::clone(&shutdown_flag),
        Arc::clone(&active_connection),
    ));

    let next_id = AtomicU64::new(0);
    loop {
        if shutdown_flag.load(Ordering::SeqCst) {
            info!("主循环接收到停机指令，正在退出...");
            break;
        }

        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("接受连接失败：{}", e);
                continue;
            }
        };
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let runner = Arc::clone(&runner);
        let active_connection = Arc::clone(&active_connection);
        tokio::spawn(async move {
            active_connection.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = handle_connection(stream, id, runner).await {
                error!("[ID{}]处理连接时出错：{}", id, e);
            }
            active_connection.fetch_sub(1, Ordering::SeqCst);
        });
    }
    Ok(())
}

/// 读取请求头以及 `Content-Length` 声明的请求体
async fn read_request<S>(stream: &mut S, id: u64) -> Result<ReadOutcome, BoxError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            // 客户端主动关闭连接
            return Ok(if buffer.is_empty() {
                ReadOutcome::Closed
            } else {
                ReadOutcome::Complete(buffer)
            });
        }
        buffer.extend_from_slice(&chunk[..n]);

        if let Some(head_end) = header_end(&buffer) {
            let declared = Envelope::parse(&buffer, id)
                .ok()
                .and_then(|envelope| envelope.content_length())
                .unwrap_or(0);
            if declared > MAX_BODY {
                warn!("[ID{}]请求体声明{}字节，超过上限", id, declared);
                return Ok(ReadOutcome::TooLarge(declared));
            }
            let wanted = head_end + 4 + declared;
            while buffer.len() < wanted {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            return Ok(ReadOutcome::Complete(buffer));
        }
        if buffer.len() >= MAX_HEAD {
            return Ok(ReadOutcome::Complete(buffer));
        }
    }
}

fn header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn handle_connection(
    mut stream: TcpStream,
    id: u64,
    runner: Arc<Runner>,
) -> Result<(), BoxError> {
    let buffer = match read_request(&mut stream, id).await? {
        ReadOutcome::Complete(buffer) => buffer,
        ReadOutcome::Closed => return Ok(()),
        ReadOutcome::TooLarge(_) => {
            let response =
                "HTTP/1.1 413 Payload Too Large\r\nContent-Length: 17\r\nConnection: close\r\n\r\nPayload Too Large";
            stream.write_all(response.as_bytes()).await?;
            return Ok(());
        }
    };
    let start_time = Instant::now();

    let envelope = match Envelope::parse(&buffer, id) {
        Ok(envelope) => envelope.with_streaming(true),
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败：{}，返回400", id, e);
            let response = "HTTP/1.1 400 Bad Request\r\nContent-Length: 11\r\n\r\nBad Request";
            stream.write_all(response.as_bytes()).await?;
            return Ok(());
        }
    };
    let head_only = envelope.method().eq_ignore_ascii_case(HttpMethod::Head.as_str());
    let method = envelope.method().to_string();
    let path = envelope.path().to_string();

    // 分发与写出都可能阻塞（会话后端、文件读取），交给阻塞线程池
    let mut std_stream = stream.into_std()?;
    std_stream.set_nonblocking(false)?;
    let status = tokio::task::spawn_blocking(move || -> std::io::Result<u16> {
        let response = runner.dispatch(envelope);
        response.write_to(&mut std_stream, head_only)?;
        Ok(response.status())
    })
    .await??;

    info!(
        "[ID{}] {} {} {} {}ms",
        id,
        method,
        path,
        status,
        start_time.elapsed().as_millis()
    );
    Ok(())
}

/// 后台管理控制台
async fn console(shutdown_flag: Arc<AtomicBool>, active_connection: Arc<AtomicU32>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                shutdown_flag.store(true, Ordering::SeqCst);
                println!("停机指令已激活，服务器将在处理完下一个请求后关闭...");
                break;
            }
            "status" => {
                println!("== webapp 状态 ===");
                println!("当前活跃连接数: {}", active_connection.load(Ordering::SeqCst));
                println!("====================");
            }
            "help" => {
                println!("== webapp Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}
