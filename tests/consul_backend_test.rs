//! Consul 驱动集成测试
//!
//! 这些测试需要运行中的 Consul agent。
//! 默认情况下，测试会被忽略，需要使用 `cargo test --test consul_backend_test -- --ignored` 运行。
//!
//! ```bash
//! docker run -d --name consul-test -p 8500:8500 hashicorp/consul:1.17 agent -dev -client=0.0.0.0
//! ```
#![cfg(feature = "consul")]

use flare_naming::{AppRecord, Config, ConsulRegistry, Registry, StopReason, WatchEvent};
use tokio::time::{Duration, timeout};

/// Consul 地址，可以通过环境变量 CONSUL_URL 覆盖
fn consul_url() -> String {
    std::env::var("CONSUL_URL").unwrap_or_else(|_| "http://127.0.0.1:8500".to_string())
}

fn create_registry() -> ConsulRegistry {
    ConsulRegistry::new(&Config::new("consul", vec![consul_url()]))
        .expect("Failed to create consul registry")
}

#[tokio::test]
#[ignore]
async fn test_consul_register_and_deregister() {
    let registry = create_registry();
    let app = AppRecord::new("consul-test-register", "127.0.0.1", 9090).with_meta("env", "test");

    let notify = registry.register(&app).await.expect("Failed to register app");

    let listing = registry
        .discover("consul-test-register")
        .await
        .expect("Failed to discover apps");
    assert!(listing.apps.contains(&app), "App not passing after registration");
    assert!(listing.revision > 0);

    registry.deregister(&app).await.expect("Failed to deregister app");
    registry.deregister(&app).await.expect("Deregister is not idempotent");

    let message = timeout(Duration::from_secs(5), notify)
        .await
        .expect("No stop notification")
        .expect("Notifier dropped");
    assert_eq!(message.reason, StopReason::DeregisteredByCaller);
}

#[tokio::test]
#[ignore]
async fn test_consul_watch() {
    let registry = create_registry();
    let app = AppRecord::new("consul-test-watch", "127.0.0.1", 9091);

    let mut stream = registry
        .watch("consul-test-watch")
        .await
        .expect("Failed to open watch");
    match stream.next().await {
        Some(WatchEvent::Snapshot(listing)) => assert!(listing.apps.is_empty()),
        other => panic!("expected baseline snapshot, got {:?}", other),
    }

    registry.register(&app).await.expect("Failed to register app");

    timeout(Duration::from_secs(10), async {
        loop {
            match stream.next().await {
                Some(WatchEvent::Snapshot(listing)) if listing.apps.contains(&app) => return,
                Some(_) => continue,
                None => panic!("watch closed"),
            }
        }
    })
    .await
    .expect("Watch did not deliver the registered app");

    registry.deregister(&app).await.expect("Failed to deregister app");
}
