use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use serde_json::json;

use webapp::{
    engine::logger::{CaptureLog, LoggerEngine},
    engine::template::Tokens,
    Application, Config, Envelope, Flow, LogLevel, Runner, Splat,
};

fn config(extra: &str) -> Config {
    Config::from_toml_str(&format!("static_handler = false\n{}", extra)).unwrap()
}

fn app_with_capture(extra: &str) -> (Application, CaptureLog) {
    let mut app = Application::new(config(extra));
    let capture = CaptureLog::new();
    app.set_logger_engine(LoggerEngine::new(
        "capture",
        Box::new(capture.clone()),
        LogLevel::Core,
    ));
    (app, capture)
}

fn get(app: &Application, path: &str) -> webapp::Response {
    app.dispatch(Envelope::new("GET", path))
}

#[test]
fn test_hello_route_and_404() {
    let (mut app, _) = app_with_capture("");
    app.get("/hello/:name", |ctx| {
        let name = ctx.route_param("name").unwrap_or_default().to_string();
        Ok(Flow::from(format!("Hi, {}", name)))
    })
    .unwrap();
    app.finish().unwrap();

    let response = get(&app, "/hello/Ada");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "Hi, Ada");
    assert_eq!(response.content_type(), Some("text/html; charset=UTF-8"));

    let response = get(&app, "/hello/");
    assert_eq!(response.status(), 404);
    assert!(response.text().contains("/hello/"));
}

#[test]
fn test_head_is_registered_with_get() {
    let (mut app, _) = app_with_capture("");
    app.get("/page", |_ctx| Ok(Flow::from("page"))).unwrap();
    app.finish().unwrap();

    let response = app.dispatch(Envelope::new("HEAD", "/page"));
    assert_eq!(response.status(), 200);
    let mut wire = Vec::new();
    response.write_to(&mut wire, true).unwrap();
    let wire = String::from_utf8(wire).unwrap();
    assert!(wire.contains("Content-Length: 4"));
    assert!(wire.ends_with("\r\n\r\n"));
}

#[test]
fn test_pass_moves_to_next_route_without_stale_splat() {
    let (mut app, _) = app_with_capture("");
    let first_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&first_ran);
    app.get("/p/*", move |ctx| {
        flag.store(true, Ordering::SeqCst);
        assert_eq!(ctx.splat(), &[Splat::One("x".to_string())]);
        ctx.content_type("text/plain");
        Ok(ctx.pass())
    })
    .unwrap();
    app.get("/p/:name", |ctx| {
        assert!(ctx.splat().is_empty());
        Ok(Flow::from(format!("B saw {}", ctx.route_param("name").unwrap_or_default())))
    })
    .unwrap();
    app.finish().unwrap();

    let response = get(&app, "/p/x");
    assert!(first_ran.load(Ordering::SeqCst));
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "B saw x");
}

#[test]
fn test_pass_from_last_route_is_404() {
    let (mut app, _) = app_with_capture("");
    app.get("/only", |ctx| Ok(ctx.pass())).unwrap();
    app.finish().unwrap();
    assert_eq!(get(&app, "/only").status(), 404);
}

struct CountingReader {
    inner: io::Cursor<Vec<u8>>,
    total: Arc<AtomicUsize>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.total.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}

#[test]
fn test_forward_matches_direct_request_and_reads_body_once() {
    let (mut app, _) = app_with_capture("");
    app.post("/old", |ctx| Ok(ctx.forward("/new"))).unwrap();
    app.post("/new", |ctx| {
        Ok(Flow::from(format!(
            "{} {}",
            ctx.request().path(),
            ctx.param("who").unwrap_or_default()
        )))
    })
    .unwrap();
    app.finish().unwrap();

    let body = b"who=ada".to_vec();
    let total = Arc::new(AtomicUsize::new(0));
    let envelope = Envelope::new("POST", "/old")
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_reader(Box::new(CountingReader {
            inner: io::Cursor::new(body.clone()),
            total: Arc::clone(&total),
        }));
    let forwarded = app.dispatch(envelope);
    assert_eq!(total.load(Ordering::SeqCst), body.len());

    let direct = app.dispatch(
        Envelope::new("POST", "/new")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body),
    );
    assert_eq!(forwarded.status(), direct.status());
    assert_eq!(forwarded.text(), direct.text());
    assert_eq!(forwarded.text(), "/new ada");
}

#[test]
fn test_forward_with_params_and_method() {
    let (mut app, _) = app_with_capture("");
    app.get("/start", |ctx| {
        ctx.set_var("trail", "start");
        let params = [("extra".to_string(), "1".to_string())].into_iter().collect();
        Ok(ctx.forward_with("/target", Some(params), Some(webapp::HttpMethod::Post)))
    })
    .unwrap();
    app.post("/target", |ctx| {
        Ok(Flow::from(format!(
            "{} {} {}",
            ctx.request().method(),
            ctx.param("extra").unwrap_or_default(),
            ctx.var("trail").and_then(|v| v.as_str()).unwrap_or_default()
        )))
    })
    .unwrap();
    app.finish().unwrap();

    assert_eq!(get(&app, "/start").text(), "POST 1 start");
}

#[test]
fn test_halt_in_before_hook_skips_route_after_hooks_and_session() {
    let (mut app, _) = app_with_capture("");
    let route_ran = Arc::new(AtomicBool::new(false));
    let after_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&route_ran);
    app.get("/", move |_ctx| {
        flag.store(true, Ordering::SeqCst);
        Ok(Flow::from("route"))
    })
    .unwrap();
    app.hook("before", |ctx, _args| {
        ctx.session_set("touched", true)?;
        Ok(ctx.halt_with("stopped"))
    })
    .unwrap();
    let flag = Arc::clone(&after_ran);
    app.hook("after", move |_ctx, _args| {
        flag.store(true, Ordering::SeqCst);
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    let response = get(&app, "/");
    assert_eq!(response.text(), "stopped");
    assert!(response.is_halted());
    assert!(!route_ran.load(Ordering::SeqCst));
    assert!(!after_ran.load(Ordering::SeqCst));
    assert!(response.header("Set-Cookie").is_none());
}

#[test]
fn test_unknown_method_is_405_without_side_effects() {
    let (mut app, capture) = app_with_capture("");
    let before = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&before);
    app.hook("before", move |_ctx, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Flow::Next)
    })
    .unwrap();
    app.any(&[], "/", |_ctx| Ok(Flow::from("ok"))).unwrap();
    app.finish().unwrap();
    let logged = capture.entries().len();

    let response = app.dispatch(Envelope::new("BREW", "/"));
    assert_eq!(response.status(), 405);
    assert_eq!(response.text(), "Method Not Allowed\n\nBREW is not supported.");
    assert_eq!(response.content_type(), Some("text/plain"));
    assert_eq!(capture.entries().len(), logged);
    assert_eq!(before.load(Ordering::SeqCst), 0);
}

#[test]
fn test_before_hook_fault_is_500_with_single_route_exception() {
    let (mut app, capture) = app_with_capture("");
    app.get("/", |_ctx| Ok(Flow::from("never"))).unwrap();
    app.hook("before", |_ctx, _args| Err("database is down".into()))
        .unwrap();
    let exceptions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exceptions);
    app.hook("on_route_exception", move |_ctx, args| {
        assert!(matches!(args, webapp::HookArgs::Error(msg) if msg.contains("database is down")));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    for round in 1..=2 {
        let response = get(&app, "/");
        assert_eq!(response.status(), 500);
        assert!(response.text().contains("database is down"));
        assert_eq!(exceptions.load(Ordering::SeqCst), round);
    }
    assert!(capture.contains("Exception caught in 'core.app.before_request' filter"));
    assert!(capture.contains("Route exception: "));
}

#[test]
fn test_route_error_and_panic_become_500() {
    let (mut app, _) = app_with_capture("");
    app.get("/err", |_ctx| Err("handler failed".into())).unwrap();
    app.get("/panic", |_ctx| panic!("handler exploded")).unwrap();
    app.finish().unwrap();

    let response = get(&app, "/err");
    assert_eq!(response.status(), 500);
    assert!(response.text().contains("handler failed"));

    let response = get(&app, "/panic");
    assert_eq!(response.status(), 500);
    assert!(response.text().contains("handler exploded"));
}

#[test]
fn test_show_errors_off_hides_message() {
    let (mut app, _) = app_with_capture("show_errors = false");
    app.get("/err", |_ctx| Err("secret detail".into())).unwrap();
    app.finish().unwrap();

    let response = get(&app, "/err");
    assert_eq!(response.status(), 500);
    assert!(!response.text().contains("secret detail"));
}

#[test]
fn test_failing_after_hook_is_plain_500() {
    let (mut app, _) = app_with_capture("");
    app.get("/", |_ctx| Ok(Flow::from("fine"))).unwrap();
    app.hook("after", |_ctx, _args| Err("after broke".into())).unwrap();
    app.finish().unwrap();

    let response = get(&app, "/");
    assert_eq!(response.status(), 500);
    assert!(response.text().starts_with("Internal Server Error\n\n"));
    assert!(response.text().contains("after broke"));
}

#[test]
fn test_after_hook_can_decorate_response() {
    let (mut app, _) = app_with_capture("");
    app.get("/", |_ctx| Ok(Flow::from("body"))).unwrap();
    app.hook("after_request", |ctx, _args| {
        ctx.header("X-Served-By", "webapp");
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    let response = get(&app, "/");
    assert_eq!(response.header("x-served-by"), Some("webapp"));
    assert_eq!(response.text(), "body");
}

#[test]
fn test_pass_from_after_hook_ends_after_hooks_only() {
    let (mut app, _) = app_with_capture("");
    app.get("/", |_ctx| Ok(Flow::from("body"))).unwrap();
    app.hook("after_request", |ctx, _args| {
        ctx.header("X-First", "1");
        Ok(Flow::Pass)
    })
    .unwrap();
    app.hook("after_request", |ctx, _args| {
        ctx.header("X-Second", "2");
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    let response = get(&app, "/");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "body");
    assert_eq!(response.header("X-First"), Some("1"));
    assert!(response.header("X-Second").is_none());
}

#[test]
fn test_redirect() {
    let (mut app, _) = app_with_capture("");
    app.get("/from", |ctx| Ok(ctx.redirect("/to", None))).unwrap();
    app.get("/moved", |ctx| Ok(ctx.redirect("/there", Some(301)))).unwrap();
    app.finish().unwrap();

    let response = get(&app, "/from");
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("Location"), Some("/to"));
    assert_eq!(get(&app, "/moved").status(), 301);
}

#[test]
fn test_error_hooks_wrap_error_content() {
    let (mut app, _) = app_with_capture("");
    let init = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&init);
    app.hook("init_error", move |_ctx, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Flow::Next)
    })
    .unwrap();
    app.hook("after_error", |_ctx, args| {
        if let webapp::HookArgs::Content(content) = args {
            content.push_str("<!-- wrapped -->");
        }
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    let response = get(&app, "/nowhere");
    assert_eq!(response.status(), 404);
    assert!(response.text().ends_with("<!-- wrapped -->"));
    assert_eq!(init.load(Ordering::SeqCst), 1);
}

#[test]
fn test_serializer_data_and_json_body() {
    let (mut app, _) = app_with_capture("serializer = \"json\"");
    app.post("/api/items", |ctx| {
        let name = ctx
            .request()
            .data()
            .and_then(|d| d.get("name"))
            .cloned()
            .unwrap_or_default();
        Ok(Flow::from(json!({ "created": name, "param": ctx.param("name") })))
    })
    .unwrap();
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("POST", "/api/items")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"name":"widget"}"#),
    );
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_type(), Some("application/json"));
    let body: serde_json::Value = serde_json::from_str(&response.text()).unwrap();
    assert_eq!(body, json!({"created": "widget", "param": "widget"}));

    let response = app.dispatch(
        Envelope::new("POST", "/api/items")
            .with_header("Content-Type", "application/json")
            .with_body("{broken"),
    );
    assert_eq!(response.status(), 400);

    let response = get(&app, "/missing");
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = serde_json::from_str(&response.text()).unwrap();
    assert_eq!(body["status"], json!(404));
    assert_eq!(body["message"], json!("/missing"));
}

#[test]
fn test_serializer_hooks_run() {
    let (mut app, _) = app_with_capture("serializer = \"json\"");
    app.get("/data", |_ctx| Ok(Flow::from(json!([1, 2, 3])))).unwrap();
    app.hook("after_serializer", |_ctx, args| {
        if let webapp::HookArgs::Content(content) = args {
            **content = format!("/*guard*/{}", content);
        }
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    assert_eq!(get(&app, "/data").text(), "/*guard*/[1,2,3]");
}

#[test]
fn test_template_with_layout_and_error_view() {
    let dir = tempfile::tempdir().unwrap();
    let views = dir.path().join("views");
    std::fs::create_dir_all(views.join("layouts")).unwrap();
    std::fs::write(views.join("index.tt"), "Hello [% name %] ([% params.q %])").unwrap();
    std::fs::write(views.join("layouts/main.tt"), "<main>[% content %]</main>").unwrap();
    std::fs::write(views.join("404.tt"), "lost: [% message %]").unwrap();

    let (mut app, _) = app_with_capture(&format!(
        "appdir = {:?}\nlayout = \"main\"",
        dir.path().to_string_lossy()
    ));
    app.get("/", |ctx| {
        let mut tokens = Tokens::new();
        tokens.insert("name".to_string(), json!("Ada"));
        Ok(Flow::from(ctx.template("index", tokens)?))
    })
    .unwrap();
    app.hook("before_template_render", |_ctx, args| {
        if let webapp::HookArgs::Tokens(tokens) = args {
            tokens.insert("name".to_string(), json!("Grace"));
        }
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    assert_eq!(get(&app, "/?q=x").text(), "<main>Hello Grace (x)</main>");
    assert_eq!(get(&app, "/gone").text(), "<main>lost: /gone</main>");
}

#[test]
fn test_runner_falls_through_apps() {
    let mut first = Application::new(config("appname = \"first\""));
    first.get("/a", |_ctx| Ok(Flow::from("from first"))).unwrap();
    first.finish().unwrap();
    let mut second = Application::new(config("appname = \"second\""));
    second.get("/b", |_ctx| Ok(Flow::from("from second"))).unwrap();
    second.get("/a", |_ctx| Ok(Flow::from("shadowed"))).unwrap();
    second.finish().unwrap();

    let runner = Runner::new(vec![Arc::new(first), Arc::new(second)]);
    assert_eq!(runner.dispatch(Envelope::new("GET", "/a")).text(), "from first");
    assert_eq!(runner.dispatch(Envelope::new("GET", "/b")).text(), "from second");
    assert_eq!(runner.dispatch(Envelope::new("GET", "/c")).status(), 404);
    assert_eq!(runner.dispatch(Envelope::new("TRACE", "/a")).status(), 405);

    let empty = Runner::default();
    assert_eq!(empty.dispatch(Envelope::new("GET", "/")).status(), 404);
}

#[test]
fn test_route_conditions() {
    let (mut app, _) = app_with_capture("");
    app.add_route("get", "/agent", &[("user_agent", "^curl")], |_ctx| {
        Ok(Flow::from("curl"))
    })
    .unwrap();
    app.get("/agent", |_ctx| Ok(Flow::from("other"))).unwrap();
    app.finish().unwrap();

    let curl = app.dispatch(Envelope::new("GET", "/agent").with_header("User-Agent", "curl/8.0"));
    assert_eq!(curl.text(), "curl");
    let browser = app.dispatch(Envelope::new("GET", "/agent").with_header("User-Agent", "Mozilla"));
    assert_eq!(browser.text(), "other");
}

#[test]
fn test_lexical_prefix_routes_dispatch() {
    let (mut app, _) = app_with_capture("");
    app.lexical_prefix("/api", |app| {
        app.get("/ping", |_ctx| Ok(Flow::from("pong")))?;
        Ok(())
    })
    .unwrap();
    app.finish().unwrap();

    assert_eq!(get(&app, "/api/ping").text(), "pong");
    assert_eq!(get(&app, "/ping").status(), 404);
}
