//! Integration tests for SSR asset collection.

use federation_bridge::{
    collect_instance_assets, collect_ssr_assets, render_assets, AssetDescriptor, AssetKind,
    CollectOptions,
};
use federation_runtime::{
    FederationInstance, LoadedRemoteInfo, ModuleId, RemoteSnapshot, RemoteSpec,
    StaticSnapshotFetcher,
};
use std::sync::Arc;

const MANIFEST: &str = r#"{
    "name": "remoteApp",
    "version": "1.0.0",
    "publicPath": "http://localhost:3001/",
    "remoteEntry": "remoteEntry.js",
    "modules": [
        {
            "modulePath": "./Component",
            "assets": {
                "css": { "sync": ["main.css"], "async": ["extra.css"] },
                "js": { "sync": ["main.js"], "async": ["lazy-chunk.js"] }
            }
        },
        { "modulePath": "./Empty" }
    ]
}"#;

fn info(expose: &str) -> LoadedRemoteInfo {
    let spec = RemoteSpec::parse("remote", "remoteApp@http://localhost:3001/mf-manifest.json")
        .unwrap();
    let snapshot = Arc::new(RemoteSnapshot::from_json(MANIFEST).unwrap());
    LoadedRemoteInfo::new(&spec, expose, snapshot)
}

#[test]
fn test_collects_links_then_scripts() {
    let info = info("./Component");
    let assets = collect_ssr_assets("remoteApp/Component", Some(&info), CollectOptions::default());

    assert_eq!(
        assets,
        vec![
            AssetDescriptor::stylesheet("http://localhost:3001/extra.css"),
            AssetDescriptor::stylesheet("http://localhost:3001/main.css"),
            AssetDescriptor::script("http://localhost:3001/remoteEntry.js"),
            AssetDescriptor::script("http://localhost:3001/main.js"),
        ]
    );
}

#[test]
fn test_injection_flags() {
    let info = info("./Component");

    let links = collect_ssr_assets(
        "remote/Component",
        Some(&info),
        CollectOptions {
            inject_script: false,
            inject_link: true,
        },
    );
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|a| a.kind == AssetKind::Stylesheet));

    let scripts = collect_ssr_assets(
        "remote/Component",
        Some(&info),
        CollectOptions {
            inject_script: true,
            inject_link: false,
        },
    );
    assert_eq!(scripts.len(), 2);
    assert_eq!(scripts[0].url, "http://localhost:3001/remoteEntry.js");

    let none = collect_ssr_assets(
        "remote/Component",
        Some(&info),
        CollectOptions {
            inject_script: false,
            inject_link: false,
        },
    );
    assert!(none.is_empty());
}

#[test]
fn test_module_without_assets_still_gets_entry() {
    let info = info("./Empty");
    let assets = collect_ssr_assets("remoteApp/Empty", Some(&info), CollectOptions::default());
    assert_eq!(
        assets,
        vec![AssetDescriptor::script("http://localhost:3001/remoteEntry.js")]
    );
}

#[test]
fn test_unknown_module_is_empty() {
    let info = info("./Component");
    let options = CollectOptions::default();

    assert!(collect_ssr_assets("remoteApp/Missing", Some(&info), options).is_empty());
    assert!(collect_ssr_assets("otherApp/Component", Some(&info), options).is_empty());
    assert!(collect_ssr_assets("not-an-id", Some(&info), options).is_empty());
    assert!(collect_ssr_assets("remoteApp/Component", None, options).is_empty());
}

#[tokio::test]
async fn test_collect_from_instance() {
    let fetcher = StaticSnapshotFetcher::new().with_snapshot(
        "http://localhost:3001/mf-manifest.json",
        RemoteSnapshot::from_json(MANIFEST).unwrap(),
    );
    let instance = FederationInstance::new("host-app", "1.0.0", Arc::new(fetcher));
    instance.register_remote(
        RemoteSpec::parse("remote", "remoteApp@http://localhost:3001/mf-manifest.json").unwrap(),
    );

    // Nothing loaded yet.
    assert!(collect_instance_assets(&instance, "remote/Component", CollectOptions::default())
        .is_empty());

    instance
        .load_module_info(&ModuleId::parse("remote/Component").unwrap())
        .await
        .unwrap();
    let assets = collect_instance_assets(&instance, "remote/Component", CollectOptions::default());
    assert_eq!(assets.len(), 4);

    assert_eq!(
        render_assets(&assets),
        concat!(
            r#"<link rel="stylesheet" href="http://localhost:3001/extra.css">"#,
            r#"<link rel="stylesheet" href="http://localhost:3001/main.css">"#,
            r#"<script async src="http://localhost:3001/remoteEntry.js"></script>"#,
            r#"<script async src="http://localhost:3001/main.js"></script>"#,
        )
    );
}
