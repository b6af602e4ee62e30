use pushgate::config::SchemaConfig;
use pushgate::{
    Direction, FileEvent, ManualChangeSource, NotifyChangeSource, ReloadOutcome, SchemaRegistry,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const ROUTE: &str = "chat.chatHandler.send";

/// Routes library events to the test output; `RUST_LOG` selects what is shown.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write schema file");
}

#[test]
fn invalid_write_keeps_behaviour_and_valid_write_swaps() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("clientProtos.json");
    write(&path, r#"{ "chat.chatHandler.send": { "required string content": 1 } }"#);
    let source = ManualChangeSource::new();
    let registry = SchemaRegistry::new(Arc::new(source.clone()));
    registry
        .set_protos(Direction::Client, &path)
        .expect("initial load");

    let payload = registry
        .encode_with(Direction::Client, ROUTE, &json!({ "content": "hi" }))
        .expect("encodes");
    let version_before = registry.version();

    write(&path, r#"{ "chat.chatHandler.send": { "required string"#);
    source.fire(&path, FileEvent::Changed);
    assert_eq!(
        registry.decode(ROUTE, &payload).expect("old table still decodes"),
        json!({ "content": "hi" })
    );
    assert_eq!(registry.version(), version_before);

    write(
        &path,
        r#"{ "chat.chatHandler.send": { "required string content": 1, "optional uInt32 room": 2 } }"#,
    );
    source.fire(&path, FileEvent::Changed);
    let with_room = registry
        .encode_with(
            Direction::Client,
            ROUTE,
            &json!({ "content": "hi", "room": 3 }),
        )
        .expect("new field encodes");
    assert_eq!(
        registry.decode(ROUTE, &with_room).expect("decodes"),
        json!({ "content": "hi", "room": 3 })
    );
    assert!(registry.version() >= version_before);
}

#[test]
fn rename_and_remove_events_do_not_reload() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("serverProtos.json");
    write(&path, r#"{ "onChat": { "required string msg": 1 } }"#);
    let registry = SchemaRegistry::new(Arc::new(ManualChangeSource::new()));
    registry
        .set_protos(Direction::Server, &path)
        .expect("initial load");

    write(&path, r#"{ "onKick": { "required string reason": 1 } }"#);
    for event in [FileEvent::Renamed, FileEvent::Removed, FileEvent::Other] {
        assert_eq!(
            registry.on_update(Direction::Server, &path, event),
            ReloadOutcome::Ignored
        );
    }
    assert!(registry.has_encoder("onChat"));
    assert!(!registry.has_encoder("onKick"));
}

#[test]
fn load_from_config_reads_both_directions() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let server = dir.path().join("serverProtos.json");
    let client = dir.path().join("clientProtos.json");
    write(&server, r#"{ "onChat": { "required string msg": 1 } }"#);
    write(&client, r#"{ "chat.chatHandler.send": { "required string content": 1 } }"#);

    let registry = SchemaRegistry::load(&SchemaConfig {
        server_protos: server,
        client_protos: client,
        watch_debounce_ms: 10,
    });

    assert!(registry.has_encoder("onChat"));
    assert!(registry.has_decoder(ROUTE));
    assert_eq!(registry.active_watchers(), 2);
    let snapshot = registry.protos();
    assert_eq!(snapshot.version, registry.version());
    assert!(snapshot.server.get("onChat").is_some());
    registry.stop();
    assert_eq!(registry.active_watchers(), 0);
}

#[test]
fn file_watcher_applies_edits() {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("serverProtos.json");
    write(&path, r#"{ "onChat": { "required string msg": 1 } }"#);
    let registry = SchemaRegistry::new(Arc::new(NotifyChangeSource::new(Duration::from_millis(
        20,
    ))));
    registry
        .set_protos(Direction::Server, &path)
        .expect("initial load");

    write(&path, r#"{ "onKick": { "required string reason": 1 } }"#);

    let deadline = Instant::now() + Duration::from_secs(10);
    while !registry.has_encoder("onKick") && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(registry.has_encoder("onKick"), "edit picked up by watcher");
    assert!(!registry.has_encoder("onChat"));
    registry.stop();
}
