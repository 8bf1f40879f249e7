//! etcd 驱动集成测试
//!
//! 这些测试需要运行中的 etcd 服务器实例。
//! 默认情况下，测试会被忽略，需要使用 `cargo test --test etcd_backend_test -- --ignored` 运行。
//!
//! 启动 etcd 服务器：
//! ```bash
//! # 使用 Docker 启动 etcd
//! docker run -d --name etcd-test -p 2379:2379 -p 2380:2380 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```
#![cfg(feature = "etcd")]

use flare_naming::{
    AppRecord, Config, EtcdRegistry, Naming, NamingOptions, Plugins, Registry, StopReason,
    WatchEvent,
};
use tokio::time::{Duration, sleep, timeout};

/// etcd 服务器地址
/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖，默认为 http://127.0.0.1:2379
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

fn create_test_config() -> Config {
    Config::new("etcd", etcd_endpoints()).with_options(NamingOptions {
        ttl_secs: 6,
        ..NamingOptions::default()
    })
}

/// 每个测试使用独立的服务名，避免相互影响
fn create_test_app(service: &str, port: u16) -> AppRecord {
    AppRecord::new(service, "127.0.0.1", port).with_meta("env", "test")
}

/// 测试：注册后可以发现，注销后消失
#[tokio::test]
#[ignore]
async fn test_etcd_register_and_deregister() {
    let registry = EtcdRegistry::new(&create_test_config())
        .await
        .expect("Failed to connect to etcd");
    let app = create_test_app("etcd-test-register", 8080);

    let notify = registry
        .register(&app)
        .await
        .expect("Failed to register app");

    let listing = registry
        .discover("etcd-test-register")
        .await
        .expect("Failed to discover apps");
    assert!(listing.apps.contains(&app), "App not found after registration");
    assert!(listing.revision > 0);

    registry.deregister(&app).await.expect("Failed to deregister app");
    // 再次注销同样成功
    registry.deregister(&app).await.expect("Deregister is not idempotent");

    let listing = registry
        .discover("etcd-test-register")
        .await
        .expect("Failed to discover apps");
    assert!(!listing.apps.contains(&app), "App still present after deregistration");

    let message = timeout(Duration::from_secs(5), notify)
        .await
        .expect("No stop notification")
        .expect("Notifier dropped");
    assert_eq!(message.reason, StopReason::DeregisteredByCaller);
}

/// 测试：租约在 TTL 之后仍然有效
#[tokio::test]
#[ignore]
async fn test_etcd_lease_is_kept_alive() {
    let registry = EtcdRegistry::new(&create_test_config())
        .await
        .expect("Failed to connect to etcd");
    let app = create_test_app("etcd-test-lease", 8081);

    registry.register(&app).await.expect("Failed to register app");
    sleep(Duration::from_secs(10)).await;

    let listing = registry
        .discover("etcd-test-lease")
        .await
        .expect("Failed to discover apps");
    assert!(listing.apps.contains(&app), "Lease expired despite keep-alive");

    registry.deregister(&app).await.expect("Failed to deregister app");
}

/// 测试：watch 推送增量变化
#[tokio::test]
#[ignore]
async fn test_etcd_watch() {
    let registry = EtcdRegistry::new(&create_test_config())
        .await
        .expect("Failed to connect to etcd");
    let first = create_test_app("etcd-test-watch", 8082);
    let second = create_test_app("etcd-test-watch", 8083);

    registry.register(&first).await.expect("Failed to register app");
    let mut stream = registry
        .watch("etcd-test-watch")
        .await
        .expect("Failed to open watch");

    match stream.next().await {
        Some(WatchEvent::Snapshot(listing)) => assert_eq!(listing.apps, vec![first.clone()]),
        other => panic!("expected baseline snapshot, got {:?}", other),
    }

    registry.register(&second).await.expect("Failed to register app");
    registry.deregister(&first).await.expect("Failed to deregister app");

    let latest = timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(WatchEvent::Snapshot(listing)) if listing.apps == vec![second.clone()] => {
                    return listing;
                }
                Some(_) => continue,
                None => panic!("watch closed"),
            }
        }
    })
    .await
    .expect("Watch did not converge");
    assert!(latest.revision > 0);

    registry.deregister(&second).await.expect("Failed to deregister app");
}

/// 测试：门面端到端
#[tokio::test]
#[ignore]
async fn test_etcd_naming_end_to_end() {
    let plugins = Plugins::with_builtins().expect("Failed to declare plugins");
    let naming = Naming::new(create_test_config(), &plugins)
        .await
        .expect("Failed to create naming");

    let a = create_test_app("etcd-test-naming", 8084);
    let b = create_test_app("etcd-test-naming", 8085);
    naming.register(&a).await.expect("Failed to register a");
    naming.register(&b).await.expect("Failed to register b");

    for _ in 0..10 {
        let picked = naming
            .discover("etcd-test-naming")
            .await
            .expect("Failed to discover");
        assert!(picked == a || picked == b);
    }

    naming.deregister(&a).await.expect("Failed to deregister a");
    naming.deregister(&b).await.expect("Failed to deregister b");
}
