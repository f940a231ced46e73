#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! The library is panic-free: Cargo.toml must deny the panic-prone clippy
//! lints, and the feature graph must keep the WebSocket transport on by
//! default. If a test fails, the manifest drifted from that policy.

use std::path::PathBuf;

fn manifest() -> toml::Table {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read '{}': {e}", path.display()));
    toml::from_str::<toml::Table>(&contents)
        .unwrap_or_else(|e| panic!("Cargo.toml is not valid TOML: {e}"))
}

fn table<'a>(parent: &'a toml::Table, key: &str) -> &'a toml::Table {
    parent
        .get(key)
        .and_then(toml::Value::as_table)
        .unwrap_or_else(|| panic!("Cargo.toml is missing [{key}]"))
}

mod panic_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn clippy_lints_deny_panics() {
        let manifest = manifest();
        let clippy = table(table(&manifest, "lints"), "clippy");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(toml::Value::as_str),
                Some("deny"),
                "[lints.clippy] must set `{lint} = \"deny\"` to keep library code panic-free"
            );
        }
    }
}

mod feature_policy {
    use super::*;

    fn feature(manifest: &toml::Table, name: &str) -> Vec<String> {
        table(manifest, "features")
            .get(name)
            .and_then(toml::Value::as_array)
            .unwrap_or_else(|| panic!("feature `{name}` is not declared"))
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn websocket_transport_is_default() {
        let manifest = manifest();
        assert!(feature(&manifest, "default").contains(&"transport-websocket".to_string()));
    }

    #[test]
    fn websocket_transport_pulls_in_runtime() {
        let manifest = manifest();
        let ws = feature(&manifest, "transport-websocket");
        for required in ["dep:tokio-tungstenite", "dep:futures-util", "tokio-runtime"] {
            assert!(
                ws.contains(&required.to_string()),
                "transport-websocket must enable `{required}`"
            );
        }
    }

    #[test]
    fn msrv_is_declared() {
        let manifest = manifest();
        let package = table(&manifest, "package");
        assert!(
            package
                .get("rust-version")
                .and_then(toml::Value::as_str)
                .is_some(),
            "[package] must declare rust-version"
        );
    }
}
