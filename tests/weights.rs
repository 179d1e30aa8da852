//! Weighted route selection.

use std::sync::Arc;
use std::thread;

use axum::http::StatusCode;
use gateway::config::parse_config;
use gateway::weight::{WeightGroupConfig, WeightRegistry};
use gateway::Gateway;

mod common;
use common::ScriptedTransport;

const CANARY: &str = r#"
[[routes]]
id = "stable"
uri = "http://stable:8080"
predicates = ["Path=/shop/**", "Weight=shop,1"]

[[routes]]
id = "canary"
uri = "http://canary:8080"
predicates = ["Path=/shop/**", "Weight=shop,3"]
"#;

#[test]
fn test_ranges_follow_normalized_weights() {
    let config = WeightGroupConfig::from_weights("g", vec![("A".into(), 1), ("B".into(), 3)]);

    assert_eq!(config.normalized_weights(), &[0.25, 0.75]);
    assert_eq!(config.ranges(), &[0.0, 0.25, 1.0]);
    assert_eq!(config.select(0.0), Some("A"));
    assert_eq!(config.select(0.2499), Some("A"));
    assert_eq!(config.select(0.25), Some("B"));
    assert_eq!(config.select(0.9999), Some("B"));
}

#[test]
fn test_registry_selection_by_draw() {
    let registry = WeightRegistry::new();
    registry.add_weight("g", "A", 1).unwrap();
    registry.add_weight("g", "B", 3).unwrap();

    assert_eq!(registry.select_with("g", 0.1).as_deref(), Some("A"));
    assert_eq!(registry.select_with("g", 0.5).as_deref(), Some("B"));
    assert_eq!(registry.select_with("other", 0.5), None);
}

#[test]
fn test_draws_approximate_weights() {
    let registry = WeightRegistry::new();
    registry.add_weight("g", "A", 1).unwrap();
    registry.add_weight("g", "B", 3).unwrap();

    let draws = 8000;
    let a = (0..draws)
        .filter(|_| registry.select("g").as_deref() == Some("A"))
        .count();

    // Expect ~2000; the bound is many standard deviations wide
    assert!((1600..2400).contains(&a), "A selected {} times", a);
}

#[test]
fn test_concurrent_registration_loses_nothing() {
    let registry = Arc::new(WeightRegistry::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry
                    .add_weight("g", &format!("route-{}", i), i + 1)
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let group = registry.group("g").unwrap();
    assert_eq!(group.len(), 16);
    assert_eq!(group.ranges().last(), Some(&1.0));
    let total: u32 = group.weights().iter().map(|(_, w)| w).sum();
    assert_eq!(total, (1..=16).sum::<u32>());
}

#[test]
fn test_route_moves_between_groups() {
    let registry = WeightRegistry::new();
    registry.add_weight("a", "r1", 1).unwrap();
    registry.add_weight("a", "r2", 1).unwrap();
    registry.add_weight("b", "r1", 5).unwrap();

    assert!(!registry.group("a").unwrap().contains("r1"));
    assert!(registry.group("b").unwrap().contains("r1"));

    assert!(registry.remove_route("r2"));
    assert!(registry.group("a").is_none());
}

#[test]
fn test_zero_weight_rejected() {
    let registry = WeightRegistry::new();
    assert!(registry.add_weight("g", "A", 0).is_err());
    assert!(registry.is_empty());
}

async fn routed_to(draw: f64) -> String {
    let transport = ScriptedTransport::ok();
    let config = parse_config(CANARY).unwrap();
    let gw = Gateway::from_config(
        &config,
        Gateway::builder()
            .transport(transport.clone())
            .random(Arc::new(move || draw)),
    )
    .unwrap();

    let resp = gw.handle(common::get("/shop/cart")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    transport.last_url().unwrap()
}

#[tokio::test]
async fn test_gateway_routes_by_weight_draw() {
    assert_eq!(routed_to(0.1).await, "http://stable:8080/shop/cart");
    assert_eq!(routed_to(0.3).await, "http://canary:8080/shop/cart");
}

#[tokio::test]
async fn test_unweighted_route_leaves_group_on_reload() {
    let gw = Gateway::from_config(
        &parse_config(CANARY).unwrap(),
        Gateway::builder().transport(ScriptedTransport::ok()),
    )
    .unwrap();
    assert_eq!(gw.weights().group("shop").unwrap().len(), 2);

    let reloaded = parse_config(
        r#"
        [[routes]]
        id = "stable"
        uri = "http://stable:8080"
        predicates = ["Path=/shop/**"]
        "#,
    )
    .unwrap();
    gw.reload(&reloaded).unwrap();

    assert!(gw.weights().group("shop").is_none());
}
