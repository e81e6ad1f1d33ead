//! Configuration parsing and plugin-dir overlay merging.

use std::fs;
use std::path::Path;

use syncvisor::{ConfigError, MainConfig};

#[test]
fn parses_a_full_document() {
    let input = r#"
<csconf version="1">
  <plugin-dir>/etc/demo.d</plugin-dir>
  <plugin name="p1" library="libdemo" stack-size="262144">
    <state-file>/var/lib/demo/p1.state</state-file>
    <event-filter> p2 | p3 </event-filter>
  </plugin>
  <plugin name="p2" library="libdemo"/>
</csconf>
"#;
    let conf = MainConfig::parse(input, Path::new("/tmp/full.conf")).unwrap();

    assert_eq!(conf.version, 1);
    assert_eq!(conf.plugin_dir, Path::new("/etc/demo.d"));
    assert_eq!(conf.plugins.len(), 2);

    let p1 = &conf.plugins[0];
    assert_eq!(p1.name, "p1");
    assert_eq!(p1.library, "libdemo");
    assert_eq!(p1.stack_size, Some(262144));
    assert_eq!(p1.state_file.as_deref(), Some(Path::new("/var/lib/demo/p1.state")));

    // Whitespace around atoms is trimmed.
    assert_eq!(conf.filters["p1"], vec!["p2".to_string(), "p3".to_string()]);
}

#[test]
fn version_newer_than_supported_is_fatal() {
    let input = r#"<csconf version="2"></csconf>"#;
    let err = MainConfig::parse(input, Path::new("/tmp/v.conf")).unwrap_err();
    match err {
        ConfigError::Xml { message, .. } => assert!(message.contains("unsupported version")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_version_is_fatal() {
    let input = r#"<csconf></csconf>"#;
    let err = MainConfig::parse(input, Path::new("/tmp/v.conf")).unwrap_err();
    assert!(err.to_string().contains("version parameter missing"));
}

#[test]
fn duplicate_plugin_names_are_fatal() {
    let input = r#"
<csconf version="1">
  <plugin name="p1" library="a"/>
  <plugin name="p1" library="b"/>
</csconf>
"#;
    let err = MainConfig::parse(input, Path::new("/tmp/dup.conf")).unwrap_err();
    assert!(err.to_string().contains("duplicate plugin: p1"));
}

#[test]
fn malformed_xml_reports_position() {
    let input = "<csconf version=\"1\">\n  <plugin name=\"p1\"\n";
    let err = MainConfig::parse(input, Path::new("/tmp/bad.conf")).unwrap_err();
    match err {
        ConfigError::Xml { row, .. } => assert!(row >= 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_tag_is_rejected() {
    let input = r#"<csconf version="1"><mystery/></csconf>"#;
    let err = MainConfig::parse(input, Path::new("/tmp/tag.conf")).unwrap_err();
    assert!(err.to_string().contains("unexpected tag: mystery"));
}

#[test]
fn overlay_amends_declared_plugins_only() {
    let dir = tempfile::tempdir().unwrap();
    let overlay_dir = dir.path().join("conf.d");
    fs::create_dir(&overlay_dir).unwrap();

    let main_input = format!(
        r#"
<csconf version="1">
  <plugin-dir>{}</plugin-dir>
  <plugin name="p1" library="libdemo"/>
</csconf>
"#,
        overlay_dir.display()
    );

    fs::write(
        overlay_dir.join("p1.CONF"),
        r#"
<csconf version="1">
  <plugin name="p1">
    <state-file>/var/lib/demo/p1.state</state-file>
    <event-filter>p9</event-filter>
  </plugin>
  <plugin name="ghost">
    <event-filter>p1</event-filter>
  </plugin>
</csconf>
"#,
    )
    .unwrap();

    // Files not ending in .conf are ignored.
    fs::write(overlay_dir.join("notes.txt"), "not xml at all").unwrap();

    let main_path = dir.path().join("main.conf");
    fs::write(&main_path, &main_input).unwrap();

    let conf = MainConfig::load(&main_path).unwrap();

    assert_eq!(conf.plugins.len(), 1);
    assert_eq!(
        conf.plugins[0].state_file.as_deref(),
        Some(Path::new("/var/lib/demo/p1.state"))
    );
    assert_eq!(conf.filters["p1"], vec!["p9".to_string()]);
    // The undeclared plugin contributed nothing.
    assert!(conf.filters.get("ghost").is_none());
}

#[test]
fn broken_overlay_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let overlay_dir = dir.path().join("conf.d");
    fs::create_dir(&overlay_dir).unwrap();
    fs::write(overlay_dir.join("broken.conf"), "<csconf version=\"1\">").unwrap();

    let main_path = dir.path().join("main.conf");
    fs::write(
        &main_path,
        format!(
            r#"<csconf version="1"><plugin-dir>{}</plugin-dir><plugin name="p1" library="x"/></csconf>"#,
            overlay_dir.display()
        ),
    )
    .unwrap();

    let conf = MainConfig::load(&main_path).unwrap();
    assert_eq!(conf.plugins.len(), 1);
}

#[test]
fn missing_plugin_dir_is_not_fatal() {
    let input = r#"
<csconf version="1">
  <plugin-dir>/nonexistent/syncvisor-test.d</plugin-dir>
  <plugin name="p1" library="x"/>
</csconf>
"#;
    let dir = tempfile::tempdir().unwrap();
    let main_path = dir.path().join("main.conf");
    fs::write(&main_path, input).unwrap();

    let conf = MainConfig::load(&main_path).unwrap();
    assert_eq!(conf.plugins.len(), 1);
}
