//! Plugin state file round-trip and dump rendering.

use syncvisor::PluginState;

#[test]
fn save_then_load_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin.state");

    let mut state = PluginState::new(&path);
    state.set("alpha", b"hello".to_vec());
    state.set("beta", vec![0u8, 1, 2, 255, 254]);
    state.set("empty", Vec::new());
    state.save().unwrap();

    let loaded = PluginState::load(&path).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.get("alpha"), Some(b"hello".as_slice()));
    assert_eq!(loaded.get("beta"), Some([0u8, 1, 2, 255, 254].as_slice()));
    assert_eq!(loaded.get("empty"), Some([].as_slice()));
}

#[test]
fn second_round_trip_preserves_bytes_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin.state");

    let mut state = PluginState::new(&path);
    state.set("k", b"v".to_vec());
    state.save().unwrap();
    let first = std::fs::read(&path).unwrap();

    let loaded = PluginState::load(&path).unwrap();
    loaded.save().unwrap();
    let second = std::fs::read(&path).unwrap();

    assert_eq!(first, second);
}

#[test]
fn dump_renders_quoted_keys_and_hex() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin.state");

    let mut state = PluginState::new(&path);
    state.set("greeting", b"hi\x00".to_vec());

    let mut out = Vec::new();
    state.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("\"greeting\"\n"));
    assert!(text.contains("68 69 00"));
    assert!(text.contains("|hi.|"));
    assert!(text.ends_with("\n\n"));
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin.state");
    std::fs::write(&path, b"SVS1\x05\x00\x00\x00").unwrap();

    assert!(PluginState::load(&path).is_err());
}

#[test]
fn wrong_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin.state");
    std::fs::write(&path, b"NOPE\x00\x00\x00\x00").unwrap();

    assert!(PluginState::load(&path).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(PluginState::load(&dir.path().join("absent.state")).is_err());
}
