use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::{Duration, Utc};
use mockall::{mock, predicate::eq};

use webapp::{
    engine::session::{SessionEngine, SessionSettings, SessionStore},
    Application, Config, Envelope, Flow, Session, SessionError,
};

mock! {
    pub Store {}

    impl SessionStore for Store {
        fn load(&self, id: &str) -> Result<Session, SessionError>;
        fn store(&self, session: &Session) -> Result<(), SessionError>;
        fn erase(&self, id: &str) -> Result<(), SessionError>;
    }
}

fn config(extra: &str) -> Config {
    Config::from_toml_str(&format!("static_handler = false\n{}", extra)).unwrap()
}

fn app_with_store(store: MockStore) -> Application {
    let mut app = Application::new(config(""));
    app.set_session_engine(SessionEngine::new(
        "mock",
        Box::new(store),
        SessionSettings::default(),
        None,
    ));
    app
}

/// `Set-Cookie` 中的 `name=value` 部分
fn cookie_pair(response: &webapp::Response) -> Option<String> {
    response
        .header("Set-Cookie")
        .and_then(|header| header.split(';').next())
        .map(str::to_string)
}

fn session_routes(app: &mut Application) {
    app.get("/plain", |_ctx| Ok(Flow::from("plain"))).unwrap();
    app.get("/read", |ctx| {
        let value = ctx.session_get("name")?;
        Ok(Flow::from(format!("{:?}", value)))
    })
    .unwrap();
    app.get("/write", |ctx| {
        ctx.session_set("name", "ada")?;
        Ok(Flow::from("written"))
    })
    .unwrap();
    app.get("/count", |ctx| {
        let count = ctx
            .session_get("count")?
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + 1;
        ctx.session_set("count", count)?;
        Ok(Flow::from(count.to_string()))
    })
    .unwrap();
    app.get("/logout", |ctx| {
        ctx.destroy_session()?;
        Ok(Flow::from("bye"))
    })
    .unwrap();
}

#[test]
fn test_untouched_session_never_hits_backend() {
    let mut store = MockStore::new();
    store.expect_load().never();
    store.expect_store().never();
    store.expect_erase().never();
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(Envelope::new("GET", "/plain"));
    assert_eq!(response.text(), "plain");
    assert!(response.header("Set-Cookie").is_none());
}

#[test]
fn test_cookie_without_access_only_renews_cookie() {
    let mut store = MockStore::new();
    store.expect_load().never();
    store.expect_store().never();
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/plain").with_header("Cookie", "dancer.session=abc123"),
    );
    assert_eq!(cookie_pair(&response).as_deref(), Some("dancer.session=abc123"));
}

#[test]
fn test_clean_session_is_loaded_but_not_stored() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .with(eq("abc123"))
        .times(1)
        .returning(|id| {
            let mut session = Session::new(id);
            session.write("name", "grace".into());
            session.mark_clean();
            Ok(session)
        });
    store.expect_store().never();
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/read").with_header("Cookie", "dancer.session=abc123"),
    );
    assert_eq!(response.text(), "Some(String(\"grace\"))");
    assert_eq!(cookie_pair(&response).as_deref(), Some("dancer.session=abc123"));
}

#[test]
fn test_expired_or_invalid_session_is_replaced() {
    let mut store = MockStore::new();
    store.expect_load().times(1).returning(|id| {
        Ok(Session::created(id, Some(Utc::now() - Duration::hours(1))))
    });
    store.expect_store().times(2).returning(|_| Ok(()));
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/write").with_header("Cookie", "dancer.session=stale"),
    );
    let pair = cookie_pair(&response).unwrap();
    assert!(pair.starts_with("dancer.session="));
    assert_ne!(pair, "dancer.session=stale");

    // 非法 id 不会交给后端
    let response = app.dispatch(
        Envelope::new("GET", "/write").with_header("Cookie", "dancer.session=..%2Fetc"),
    );
    assert_ne!(cookie_pair(&response).as_deref(), Some("dancer.session=..%2Fetc"));
}

#[test]
fn test_destroy_without_cookie_does_not_create() {
    let mut store = MockStore::new();
    store.expect_load().never();
    store.expect_store().never();
    store.expect_erase().never();
    let mut app = app_with_store(store);
    session_routes(&mut app);
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    app.hook("engine.session.before_create", move |_ctx, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    let response = app.dispatch(Envelope::new("GET", "/logout"));
    assert_eq!(response.text(), "bye");
    assert_eq!(created.load(Ordering::SeqCst), 0);
    let header = response.header("Set-Cookie").unwrap();
    assert!(header.starts_with("dancer.session="));
    assert!(header.contains("Expires="));
}

#[test]
fn test_destroy_with_cookie_erases_backend() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .with(eq("abc123"))
        .times(1)
        .returning(|id| Ok(Session::new(id)));
    store
        .expect_erase()
        .with(eq("abc123"))
        .times(1)
        .returning(|_| Ok(()));
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/logout").with_header("Cookie", "dancer.session=abc123"),
    );
    assert_eq!(cookie_pair(&response).as_deref(), Some("dancer.session=abc123"));
    assert!(response.header("Set-Cookie").unwrap().contains("Expires="));
}

#[test]
fn test_destroy_with_unknown_cookie_leaves_backend_alone() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .with(eq("gone"))
        .times(1)
        .returning(|id| Err(SessionError::NotFound(id.to_string())));
    store.expect_store().never();
    store.expect_erase().never();
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/logout").with_header("Cookie", "dancer.session=gone"),
    );
    assert_eq!(response.text(), "bye");
    assert!(response.header("Set-Cookie").unwrap().contains("Expires="));

    // 非法 id 既不读取也不删除
    let response = app.dispatch(
        Envelope::new("GET", "/logout").with_header("Cookie", "dancer.session=..%2Fvictim"),
    );
    assert_eq!(response.text(), "bye");
    assert_ne!(
        cookie_pair(&response).as_deref(),
        Some("dancer.session=../victim")
    );
}

#[test]
fn test_destroy_with_expired_session_still_erases() {
    let mut store = MockStore::new();
    store.expect_load().times(1).returning(|id| {
        Ok(Session::created(id, Some(Utc::now() - Duration::hours(1))))
    });
    store
        .expect_erase()
        .with(eq("stale"))
        .times(1)
        .returning(|_| Ok(()));
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/logout").with_header("Cookie", "dancer.session=stale"),
    );
    assert_eq!(cookie_pair(&response).as_deref(), Some("dancer.session=stale"));
}

#[test]
fn test_destroy_cannot_delete_files_outside_session_dir() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("victim.json");
    std::fs::write(&victim, "{}").unwrap();
    let mut app = Application::new(config(&format!(
        "session = \"json\"\nappdir = {:?}",
        dir.path().to_string_lossy()
    )));
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/logout").with_header("Cookie", "dancer.session=..%2Fvictim"),
    );
    assert_eq!(response.status(), 200);
    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "{}");
}

#[test]
fn test_invalid_cookie_is_not_renewed() {
    let mut store = MockStore::new();
    store.expect_load().never();
    store.expect_store().never();
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/plain").with_header("Cookie", "dancer.session=..%2Fetc"),
    );
    assert_eq!(response.text(), "plain");
    assert!(response.header("Set-Cookie").is_none());
}

#[test]
fn test_backend_failure_is_500() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .returning(|_| Err(SessionError::Backend("disk on fire".to_string())));
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/read").with_header("Cookie", "dancer.session=abc123"),
    );
    assert_eq!(response.status(), 500);
    assert!(response.text().contains("disk on fire"));
}

#[test]
fn test_simple_store_persists_across_requests() {
    let mut app = Application::new(config(""));
    session_routes(&mut app);
    app.finish().unwrap();

    let first = app.dispatch(Envelope::new("GET", "/count"));
    assert_eq!(first.text(), "1");
    let cookie = cookie_pair(&first).unwrap();

    let second = app.dispatch(Envelope::new("GET", "/count").with_header("Cookie", &cookie));
    assert_eq!(second.text(), "2");
    assert_eq!(cookie_pair(&second).as_deref(), Some(cookie.as_str()));

    let logout = app.dispatch(Envelope::new("GET", "/logout").with_header("Cookie", &cookie));
    assert_eq!(logout.text(), "bye");

    let after = app.dispatch(Envelope::new("GET", "/count").with_header("Cookie", &cookie));
    assert_eq!(after.text(), "1");
}

#[test]
fn test_json_store_writes_session_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = Application::new(config(&format!(
        "session = \"json\"\nappdir = {:?}",
        dir.path().to_string_lossy()
    )));
    session_routes(&mut app);
    app.finish().unwrap();

    let response = app.dispatch(Envelope::new("GET", "/write"));
    let cookie = cookie_pair(&response).unwrap();
    let id = cookie.trim_start_matches("dancer.session=").to_string();
    let file = dir.path().join("sessions").join(format!("{}.json", id));
    assert!(file.exists());

    let response = app.dispatch(Envelope::new("GET", "/read").with_header("Cookie", &cookie));
    assert_eq!(response.text(), "Some(String(\"ada\"))");

    app.dispatch(Envelope::new("GET", "/logout").with_header("Cookie", &cookie));
    assert!(!file.exists());
}

#[test]
fn test_forward_keeps_session() {
    let mut store = MockStore::new();
    store.expect_load().never();
    store.expect_store().times(1).returning(|_| Ok(()));
    let mut app = app_with_store(store);
    app.get("/start", |ctx| {
        ctx.session_set("step", "start")?;
        Ok(ctx.forward("/end"))
    })
    .unwrap();
    app.get("/end", |ctx| {
        let step = ctx.session_get("step")?;
        Ok(Flow::from(format!("{:?}", step)))
    })
    .unwrap();
    app.finish().unwrap();

    let response = app.dispatch(Envelope::new("GET", "/start"));
    assert_eq!(response.text(), "Some(String(\"start\"))");
    assert_eq!(response.header_values("Set-Cookie").len(), 1);
}

#[test]
fn test_session_hooks_are_claimed_when_engine_builds() {
    let mut app = Application::new(config(""));
    session_routes(&mut app);
    let flushed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&flushed);
    app.hook("engine.session.after_flush", move |_ctx, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Flow::Next)
    })
    .unwrap();
    app.finish().unwrap();

    app.dispatch(Envelope::new("GET", "/write"));
    app.dispatch(Envelope::new("GET", "/plain"));
    assert_eq!(flushed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroy_then_forward_expires_cookie() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .with(eq("abc123"))
        .times(1)
        .returning(|id| Ok(Session::new(id)));
    store.expect_store().never();
    store
        .expect_erase()
        .with(eq("abc123"))
        .times(1)
        .returning(|_| Ok(()));
    let mut app = app_with_store(store);
    session_routes(&mut app);
    app.get("/signout", |ctx| {
        ctx.destroy_session()?;
        Ok(ctx.forward("/plain"))
    })
    .unwrap();
    app.finish().unwrap();

    let response = app.dispatch(
        Envelope::new("GET", "/signout").with_header("Cookie", "dancer.session=abc123"),
    );
    assert_eq!(response.text(), "plain");
    let cookies = response.header_values("Set-Cookie");
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("dancer.session=abc123"));
    assert!(cookies[0].contains("Expires="));
}
