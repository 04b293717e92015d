//! End-to-end tests of the scriptable filter engine: hooks, reloads and
//! concurrent traffic.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use notify::event::{DataChange, ModifyKind};
use notify::{Event, EventKind};
use scriptproxy_runtime::ShutdownSignal;
use scriptproxy_scripting::prelude::*;
use scriptproxy_scripting::reload::{REQUEST_FILE, RESPONSE_FILE};
use scriptproxy_scripting::{HookBody, ReloadOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    dir: tempfile::TempDir,
    store: Arc<ScriptStore>,
    hooks: TrafficHooks,
    supervisor: Arc<ReloadSupervisor>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ScriptStore::new());
        let factory: Arc<dyn EngineFactory> = Arc::new(RhaiEngineFactory::new());
        let filter = Arc::new(ScriptFilter::new(Arc::clone(&store), Arc::clone(&factory)));
        let supervisor = Arc::new(
            ReloadSupervisor::new(Arc::clone(&store), factory, ScriptPaths::in_dir(dir.path()))
                .with_filter(Arc::clone(&filter)),
        );

        Self {
            dir,
            store,
            hooks: TrafficHooks::new(filter),
            supervisor,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, source: &str) {
        std::fs::write(self.path(name), source).unwrap();
    }

    /// Write a file and push a synthetic "modified" event through the
    /// supervisor loop, returning once the loop has drained.
    async fn write_and_notify(&self, name: &str, source: &str) {
        self.write(name, source);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Ok(modified(self.path(name)))).unwrap();
        drop(tx);

        let shutdown = ShutdownSignal::new();
        self.supervisor.run(rx, shutdown.subscribe()).await;
    }
}

fn modified(path: impl AsRef<Path>) -> Event {
    Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
        .add_path(path.as_ref().to_path_buf())
}

fn get(url: &str) -> Request<()> {
    Request::get(url)
        .header("user-agent", "filter-test")
        .body(())
        .unwrap()
}

fn html(body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .header(CONTENT_TYPE, "text/html")
        .header(CONTENT_LENGTH, body.len())
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn text(res: Response<HookBody>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_deny_all_script_blocks_every_request() {
    let h = Harness::new();
    h.write_and_notify(REQUEST_FILE, "fn onRequest(req){return false;}")
        .await;

    for url in ["http://example.com/", "https://other.org/a?b=c"] {
        let res = h.hooks.on_intercept(&get(url)).expect("blocked");
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(text(res).await, "Blocked by proxy!");
    }
}

#[tokio::test]
async fn test_uppercase_rewriter_scenario() {
    let h = Harness::new();
    h.write_and_notify(RESPONSE_FILE, "fn onBodyResponse(b){return b.to_upper();}")
        .await;

    let res = h.hooks.on_response(html("hello")).await;
    assert_eq!(text(res).await, "HELLO");
}

#[tokio::test]
async fn test_default_rewriter_is_identity() {
    let h = Harness::new();
    for body in ["", "hello", "<html><body>ünïcødé</body></html>", "a\r\nb\tc"] {
        let res = h.hooks.on_response(html(body)).await;
        assert_eq!(text(res).await, body);
    }
}

#[tokio::test]
async fn test_invalid_reload_keeps_previous_version() {
    let h = Harness::new();
    h.write_and_notify(RESPONSE_FILE, "fn onBodyResponse(b) { b.to_upper() }")
        .await;
    let accepted = h.store.current(ScriptRole::ResponseRewriter);

    let mut events = h.supervisor.subscribe();
    h.write_and_notify(RESPONSE_FILE, "fn onBodyResponse(b) { b.to_upper( ")
        .await;

    let event = events.try_recv().unwrap();
    assert!(event.outcome.is_rejected());
    assert_eq!(h.store.current(ScriptRole::ResponseRewriter).id(), accepted.id());

    let res = h.hooks.on_response(html("still works")).await;
    assert_eq!(text(res).await, "STILL WORKS");
}

#[tokio::test]
async fn test_invalid_first_load_keeps_default() {
    let h = Harness::new();
    h.write_and_notify(REQUEST_FILE, "this is not rhai {{").await;

    assert!(h.store.current(ScriptRole::RequestGate).is_default());
    assert!(h.hooks.on_intercept(&get("http://example.com/")).is_none());
}

#[tokio::test]
async fn test_gate_switches_from_allow_to_deny() {
    let h = Harness::new();
    h.write_and_notify(REQUEST_FILE, "fn onRequest(req) { true }").await;
    assert!(h.hooks.on_intercept(&get("http://example.com/")).is_none());

    h.write_and_notify(REQUEST_FILE, "fn onRequest(req) { false }").await;
    assert!(h.hooks.on_intercept(&get("http://example.com/")).is_some());
}

#[tokio::test]
async fn test_unrelated_file_events_are_ignored() {
    let h = Harness::new();
    h.write("notes.txt", "fn onRequest(req) { false }");

    let mut events = h.supervisor.subscribe();
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Ok(modified(h.path("notes.txt")))).unwrap();
    drop(tx);
    h.supervisor.run(rx, ShutdownSignal::new().subscribe()).await;

    assert!(events.try_recv().is_err());
    assert_eq!(h.store.generation(), 0);
}

#[tokio::test]
async fn test_blocklist_script_uses_host_and_headers() {
    let h = Harness::new();
    h.write_and_notify(
        REQUEST_FILE,
        r#"
            const BLOCKED = ["adservice", "googlesyndication", "doubleclick", "analytics"];

            fn onRequest(req) {
                if req.headers["sec-fetch-dest"] == "video" {
                    return false;
                }
                for name in global::BLOCKED {
                    if req.host.contains(name) {
                        print(">>> BLOCK >>> " + req.host);
                        return false;
                    }
                }
                true
            }
        "#,
    )
    .await;

    assert!(h.hooks.on_intercept(&get("https://news.example.com/")).is_none());
    assert!(h
        .hooks
        .on_intercept(&get("https://stats.doubleclick.net/pixel"))
        .is_some());

    let video = Request::get("https://cdn.example.com/clip.mp4")
        .header("Sec-Fetch-Dest", "video")
        .body(())
        .unwrap();
    assert!(h.hooks.on_intercept(&video).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_traffic_during_reloads() {
    let h = Arc::new(Harness::new());
    let allow = "fn onRequest(req) { true }";
    let deny = "fn onRequest(req) { false }";

    let mut workers = Vec::new();
    for i in 0..16 {
        let h = Arc::clone(&h);
        workers.push(tokio::spawn(async move {
            for j in 0..50 {
                let url = format!("http://host{i}.example.com/{j}");
                let before = h.store.current(ScriptRole::RequestGate);
                let blocked = h.hooks.on_intercept(&get(&url)).is_some();
                let after = h.store.current(ScriptRole::RequestGate);

                // Ids are unique, so an unchanged id means no swap happened
                // and the decision must match that version's source.
                if before.id() == after.id() {
                    assert_eq!(
                        blocked,
                        before.source().contains("false"),
                        "decision does not match version {}",
                        before.id()
                    );
                }

                let res = h.hooks.on_response(html("<p>x</p>")).await;
                assert_eq!(text(res).await, "<p>x</p>");
                tokio::task::yield_now().await;
            }
        }));
    }

    for n in 0..20 {
        let source = if n % 2 == 0 { deny } else { allow };
        h.write_and_notify(REQUEST_FILE, source).await;
        // Interleave a broken write as well.
        h.write_and_notify(REQUEST_FILE, "fn onRequest(").await;
    }

    for worker in workers {
        worker.await.unwrap();
    }

    // The last good write was `allow`; broken writes never replaced it.
    assert_eq!(h.store.current(ScriptRole::RequestGate).source(), allow);
    assert!(h.hooks.on_intercept(&get("http://example.com/")).is_none());
}

#[tokio::test]
async fn test_real_watcher_picks_up_edits() {
    let h = Harness::new();
    let mut events = h.supervisor.subscribe();

    let shutdown = ShutdownSignal::new();
    let task = Arc::clone(&h.supervisor)
        .spawn(shutdown.subscribe())
        .expect("watcher starts");

    // Give the OS watcher a moment to register.
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.write(REQUEST_FILE, "fn onRequest(req) { false }");

    let accepted = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if matches!(event.outcome, ReloadOutcome::Accepted { .. }) => {
                    break event;
                }
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {e}"),
            }
        }
    })
    .await
    .expect("reload within timeout");

    assert_eq!(accepted.role, ScriptRole::RequestGate);
    assert!(h.hooks.on_intercept(&get("http://example.com/")).is_some());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("supervisor stops")
        .unwrap();
}
