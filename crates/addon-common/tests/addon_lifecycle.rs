//! Integration tests for the shared add-on infrastructure
//!
//! - Manifest file to compose document, with carried-over settings
//! - Volume driver state surviving a restart in the on-disk format

use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use serde_yaml::Value;
use std::fs;
use tempfile::TempDir;

use addon_common::labels::{PRODUCT_VERSION_LABEL, STACK_VERSION_LABEL};
use addon_common::{LocalVolumeDriver, Manifest, Setting, StackDefinition, StackLabels, VolumeScope};

const MANIFEST: &str = r#"
title: Edge Historian
version: "2"
environments:
  historian:
    format: docker-compose
    services:
      db:
        image: registry.local/tsdb:1.8
        environment:
          - RETENTION=7d
        volumes:
          - tsdb:/var/lib/tsdb
        restart: unless-stopped
        labels:
          vendor: acme
    volumes:
      tsdb:
        labels:
          backup: daily
settings:
  env:
    - name: RETENTION
      type: dropdown
      default: 7d
      options: [7d, 30d]
"#;

#[test]
fn test_manifest_file_to_compose_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("manifest.yml");
    fs::write(&path, MANIFEST).unwrap();

    let manifest = Manifest::load(&path)
        .unwrap()
        .with_settings(&[Setting::text("RETENTION", "30d")]);
    let definition =
        StackDefinition::render("Edge Historian", &manifest, &StackLabels::current("3.1.0"))
            .unwrap();
    let document: Value = serde_yaml::from_str(&definition.to_yaml().unwrap()).unwrap();

    let db = &document["services"]["db"];
    assert_eq!(db["environment"][0].as_str(), Some("RETENTION=30d"));
    assert_eq!(db["restart"].as_str(), Some("unless-stopped"));
    assert_eq!(db["labels"]["vendor"].as_str(), Some("acme"));
    assert_eq!(db["labels"][STACK_VERSION_LABEL].as_str(), Some("2"));

    let tsdb = &document["volumes"]["tsdb"];
    assert_eq!(tsdb["labels"]["backup"].as_str(), Some("daily"));
    assert_eq!(tsdb["labels"][PRODUCT_VERSION_LABEL].as_str(), Some("3.1.0"));
    assert_eq!(definition.name, "edgehistorian");
}

#[test]
fn test_volume_driver_survives_restart() {
    let dir = TempDir::new().unwrap();

    let data_path = {
        let driver = LocalVolumeDriver::open(dir.path(), VolumeScope::Public);
        let path = driver.create("edgehistorian_tsdb").unwrap();
        fs::write(path.join("chunk-0001"), b"points").unwrap();
        driver.create("edgehistorian_tmp").unwrap();
        driver.remove("edgehistorian_tmp").unwrap();
        path
    };

    let state: JsonValue = serde_json::from_str(
        &fs::read_to_string(dir.path().join("addon-public/state.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        state,
        serde_json::json!({ "state": { "edgehistorian_tsdb": data_path.display().to_string() } })
    );

    let driver = LocalVolumeDriver::open(dir.path(), VolumeScope::Public);
    let entries = driver.list();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, data_path);
    assert_eq!(fs::read(data_path.join("chunk-0001")).unwrap(), b"points");
    assert!(LocalVolumeDriver::open(dir.path(), VolumeScope::Local).list().is_empty());
}
