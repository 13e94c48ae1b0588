use dom_adapter::{NodeSpec, StaticDom};
use selector_healer::{HealingConfig, HealingEngine, PartialHealingConfig, StrategyKind};
use std::time::Duration;

fn offline(strategies: Vec<StrategyKind>) -> HealingConfig {
    HealingConfig {
        strategies,
        ..HealingConfig::default()
    }
}

fn all_offline() -> HealingConfig {
    offline(vec![
        StrategyKind::DataTestIdRecovery,
        StrategyKind::TextContentMatching,
        StrategyKind::CssHierarchyAnalysis,
    ])
}

fn shop_page() -> StaticDom {
    StaticDom::with_body(vec![
        NodeSpec::new("header").child(NodeSpec::new("a").attr("href", "/").text("Home")),
        NodeSpec::new("main")
            .id("app")
            .child(
                NodeSpec::new("form")
                    .class("login-form")
                    .child(NodeSpec::new("input").attr("name", "email"))
                    .child(
                        NodeSpec::new("button")
                            .class("new-class")
                            .attr("data-testid", "login-submit")
                            .text("Sign in"),
                    ),
            )
            .child(
                NodeSpec::new("div")
                    .class("product")
                    .child(NodeSpec::new("button").class("cta").text("Add To Cart"))
                    .child(
                        NodeSpec::new("button")
                            .attr("data-testid", "submitBtn")
                            .text("Submit order"),
                    ),
            ),
    ])
}

#[tokio::test]
async fn renamed_test_id_heals_to_camel_case() {
    let engine = HealingEngine::new(all_offline());
    let result = engine
        .heal(&shop_page(), r#"[data-testid="submit-btn"]"#)
        .await;
    assert!(result.success, "{}", result.reasoning);
    assert_eq!(result.selector, r#"[data-testid="submitBtn"]"#);
    assert_eq!(result.strategy, "data-testid-recovery");
}

#[tokio::test]
async fn test_id_strategy_runs_first_whatever_the_configured_order() {
    let engine = HealingEngine::new(offline(vec![
        StrategyKind::CssHierarchyAnalysis,
        StrategyKind::TextContentMatching,
        StrategyKind::DataTestIdRecovery,
    ]));
    let result = engine
        .heal(&shop_page(), r#"[data-testid="submit-btn"]"#)
        .await;
    assert_eq!(result.strategy, "data-testid-recovery");

    let usage = engine.stats().strategy_usage;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage.get("data-testid-recovery"), Some(&1));
}

#[tokio::test]
async fn text_selector_heals_to_qualified_button() {
    let engine = HealingEngine::new(all_offline());
    let result = engine.heal(&shop_page(), r#"text="Add to cart""#).await;
    assert!(result.success, "{}", result.reasoning);
    assert_eq!(result.strategy, "text-content-matching");
    assert_eq!(result.selector, r#"button:has-text("Add To Cart")"#);
}

#[tokio::test]
async fn missing_class_heals_through_structure() {
    let engine = HealingEngine::new(all_offline());
    let result = engine.heal(&shop_page(), ".old-class").await;
    assert!(result.success, "{}", result.reasoning);
    assert_eq!(result.strategy, "css-hierarchy-analysis");
    assert!(result.confidence > 0.0);
    assert!(!result.alternatives.is_empty());
}

#[tokio::test]
async fn nothing_matching_fails_once() {
    let engine = HealingEngine::new(all_offline());
    let before = engine.stats().failed_heals;
    let result = engine.heal(&shop_page(), "#definitely-gone").await;
    assert!(!result.success);
    assert_eq!(result.strategy, "all-failed");
    assert_eq!(result.selector, "#definitely-gone");
    assert_eq!(engine.stats().failed_heals, before + 1);
    assert_eq!(engine.stats().total_attempts, 1);
}

#[tokio::test]
async fn cache_hits_until_ttl_expires() {
    let engine = HealingEngine::with_cache_ttl(all_offline(), Duration::from_millis(100));
    let dom = shop_page();
    let selector = r#"[data-testid="submit-btn"]"#;

    let fresh = engine.heal(&dom, selector).await;
    let cached = engine.heal(&dom, selector).await;
    assert_eq!(cached.strategy, "data-testid-recovery (cached)");
    assert_eq!(cached.selector, fresh.selector);
    assert_eq!(engine.stats().cache_hits, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let rerun = engine.heal(&dom, selector).await;
    assert!(rerun.success);
    assert_eq!(rerun.strategy, "data-testid-recovery");
    assert_eq!(engine.stats().cache_hits, 1);
    assert_eq!(engine.stats().total_attempts, 3);
    assert_eq!(engine.stats().successful_heals, 2);
}

#[tokio::test]
async fn clearing_the_cache_forces_a_new_pass() {
    let engine = HealingEngine::new(all_offline());
    let dom = shop_page();
    engine.heal(&dom, r#"text="Add to cart""#).await;
    engine.clear_cache();
    let again = engine.heal(&dom, r#"text="Add to cart""#).await;
    assert_eq!(again.strategy, "text-content-matching");
    assert_eq!(engine.stats().cache_hits, 0);

    engine.reset_stats();
    assert_eq!(engine.stats().total_attempts, 0);
}

#[tokio::test]
async fn disabling_through_update_short_circuits() {
    let engine = HealingEngine::new(all_offline());
    engine.update_config(&PartialHealingConfig {
        enabled: Some(false),
        ..Default::default()
    });
    let result = engine.heal(&shop_page(), r#"[data-testid="submit-btn"]"#).await;
    assert_eq!(result.strategy, "none");
    assert_eq!(engine.stats().total_attempts, 0);
}

#[test]
fn flakiness_needs_intermittent_failures() {
    let engine = HealingEngine::new(all_offline());

    for _ in 0..2 {
        engine.record_failure("#few");
    }
    engine.record_success("#few");
    assert!(!engine.is_flaky("#few"));

    for _ in 0..6 {
        engine.record_success("#flaky");
    }
    for _ in 0..4 {
        engine.record_failure("#flaky");
    }
    assert!(engine.is_flaky("#flaky"));

    engine.record_success("#broken");
    for _ in 0..9 {
        engine.record_failure("#broken");
    }
    assert!(!engine.is_flaky("#broken"));

    for _ in 0..10 {
        engine.record_success("#solid");
    }
    assert!(!engine.is_flaky("#solid"));

    engine.clear_flakiness_records();
    assert!(!engine.is_flaky("#flaky"));
    assert!(engine.flakiness_record("#flaky").is_none());
}

#[tokio::test]
async fn repeated_heal_failures_feed_flakiness() {
    let engine = HealingEngine::new(all_offline());
    let dom = shop_page();
    let selector = r#"[data-testid="submit-btn"]"#;
    for _ in 0..3 {
        engine.heal(&dom, selector).await;
        engine.clear_cache();
    }
    for _ in 0..2 {
        engine.heal(&dom, "#gone").await;
    }
    let healed = engine.flakiness_record(selector).unwrap();
    assert_eq!(healed.success_count, 3);
    let gone = engine.flakiness_record("#gone").unwrap();
    assert_eq!(gone.failure_count, 2);
    assert!(gone.last_failure_at_ms.is_some());
}
