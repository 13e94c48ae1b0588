use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use dom_adapter::{NodeSpec, StaticDom};
use parking_lot::Mutex;
use selector_healer::{
    AiBackendConfig, AiBackendError, AiPoweredAnalysis, HealingConfig, HealingEngine,
    OllamaClient, PartialAiBackendConfig, PartialHealingConfig, SelectorHealer, StrategyKind,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct MockOllama {
    models: Vec<String>,
    reply: String,
    status: StatusCode,
    delay: Duration,
    prompts: Mutex<Vec<Value>>,
}

impl MockOllama {
    fn replying(reply: &str) -> Self {
        Self {
            models: vec!["llama3.1:8b".to_string()],
            reply: reply.to_string(),
            status: StatusCode::OK,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

async fn tags(State(mock): State<Arc<MockOllama>>) -> Json<Value> {
    let models: Vec<Value> = mock.models.iter().map(|name| json!({ "name": name })).collect();
    Json(json!({ "models": models }))
}

async fn generate(
    State(mock): State<Arc<MockOllama>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    mock.prompts.lock().push(body);
    tokio::time::sleep(mock.delay).await;
    (
        mock.status,
        Json(json!({ "response": mock.reply, "done": true })),
    )
}

async fn serve(mock: Arc<MockOllama>) -> String {
    let router = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/generate", post(generate))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::warn!(?err, "mock backend stopped");
        }
    });
    format!("http://{addr}")
}

fn backend(endpoint: &str, timeout_ms: u64) -> AiBackendConfig {
    AiBackendConfig {
        endpoint: endpoint.to_string(),
        timeout_ms,
        ..AiBackendConfig::default()
    }
}

fn ai_only(endpoint: &str, timeout_ms: u64) -> HealingConfig {
    HealingConfig {
        strategies: vec![StrategyKind::AiPoweredAnalysis],
        ai_backend: backend(endpoint, timeout_ms),
        ..HealingConfig::default()
    }
}

fn checkout_page() -> StaticDom {
    StaticDom::with_body(vec![NodeSpec::new("div")
        .class("checkout")
        .child(NodeSpec::new("button").id("pay-now").class("btn").text("Pay now"))
        .child(NodeSpec::new("button").id("ghost").text("Ghost").hidden())])
}

const REPLY: &str = "Suggested selectors:\n\
    1. #ghost (97%) - hidden twin\n\
    2. #pay-now (90%) - unique id on the pay button\n\
    3. .btn (75%) - button class\n\
    4. #nowhere (60%) - guess";

#[tokio::test]
async fn verified_suggestion_heals() {
    let mock = Arc::new(MockOllama::replying(REPLY));
    let endpoint = serve(mock.clone()).await;
    let engine = HealingEngine::new(ai_only(&endpoint, 5_000));

    let result = engine.heal(&checkout_page(), "#checkout-submit").await;
    assert!(result.success, "{}", result.reasoning);
    assert_eq!(result.strategy, "ai-powered-analysis");
    assert_eq!(result.selector, "#pay-now");
    assert_eq!(result.confidence, 90.0);
    assert_eq!(result.reasoning, "unique id on the pay button");
    let alternatives: Vec<_> = result.alternatives.iter().map(|a| a.selector.as_str()).collect();
    assert_eq!(alternatives, vec!["#pay-now", ".btn"]);

    let prompts = mock.prompts.lock();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0]["model"], "llama3.1:8b");
    assert_eq!(prompts[0]["stream"], false);
    let prompt = prompts[0]["prompt"].as_str().unwrap();
    assert!(prompt.contains("#checkout-submit"));
    assert!(prompt.contains("pay-now"));
}

#[tokio::test]
async fn unverified_suggestions_are_still_reported() {
    let mock = Arc::new(MockOllama::replying("1. #nowhere (80%) - guess\n2. .none (70%) - guess"));
    let endpoint = serve(mock).await;
    let strategy = AiPoweredAnalysis::new(backend(&endpoint, 5_000), CancellationToken::new());

    let result = strategy.heal(&checkout_page(), "#x").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.reasoning, "AI suggestions could not be verified on the page");
    assert_eq!(result.alternatives.len(), 2);
}

#[tokio::test]
async fn slow_backend_times_out() {
    let mock = Arc::new(MockOllama {
        delay: Duration::from_secs(3),
        ..MockOllama::replying(REPLY)
    });
    let endpoint = serve(mock).await;
    let strategy = AiPoweredAnalysis::new(backend(&endpoint, 200), CancellationToken::new());

    let started = Instant::now();
    let result = strategy.heal(&checkout_page(), "#x").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!result.success);
    assert_eq!(result.reasoning, "AI request timed out after 200ms");
}

#[tokio::test]
async fn error_status_becomes_failed_result() {
    let mock = Arc::new(MockOllama {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        ..MockOllama::replying("model crashed")
    });
    let endpoint = serve(mock).await;
    let strategy = AiPoweredAnalysis::new(backend(&endpoint, 5_000), CancellationToken::new());

    let result = strategy.heal(&checkout_page(), "#x").await.unwrap();
    assert!(!result.success);
    assert!(result.reasoning.starts_with("Error: AI backend returned 500"));
}

#[tokio::test]
async fn unreachable_backend_fails_softly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let strategy = AiPoweredAnalysis::new(backend(&endpoint, 5_000), CancellationToken::new());
    let result = strategy.heal(&checkout_page(), "#x").await.unwrap();
    assert!(!result.success);
    assert_eq!(
        result.reasoning,
        format!("Ollama service not available at {}", endpoint)
    );
    assert!(!strategy.health_check(&checkout_page()).await);
}

#[tokio::test]
async fn missing_model_fails_health_check() {
    let mock = Arc::new(MockOllama {
        models: vec!["mistral:7b".to_string()],
        ..MockOllama::replying(REPLY)
    });
    let endpoint = serve(mock).await;

    let client = OllamaClient::new(&backend(&endpoint, 5_000));
    assert!(client.is_reachable().await);
    assert_eq!(
        client.ensure_model().await,
        Err(AiBackendError::ModelMissing {
            model: "llama3.1:8b".to_string()
        })
    );

    let engine = HealingEngine::new(ai_only(&endpoint, 5_000));
    let report = engine.run_health_checks(&checkout_page()).await;
    assert_eq!(report.get("ai-powered-analysis"), Some(&false));

    let result = engine.heal(&checkout_page(), "#checkout-submit").await;
    assert_eq!(result.strategy, "all-failed");
    assert!(engine.stats().strategy_usage.is_empty());
}

#[tokio::test]
async fn cancellation_aborts_generation() {
    let mock = Arc::new(MockOllama {
        delay: Duration::from_secs(5),
        ..MockOllama::replying(REPLY)
    });
    let endpoint = serve(mock).await;
    let cancel = CancellationToken::new();
    let strategy = AiPoweredAnalysis::new(backend(&endpoint, 30_000), cancel.clone());
    let dom = checkout_page();

    let started = Instant::now();
    let (result, _) = tokio::join!(strategy.heal(&dom, "#x"), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    let result = result.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.reasoning, "Error: AI request cancelled");
}

#[tokio::test]
async fn reconfiguring_the_backend_cancels_in_flight_requests() {
    let mock = Arc::new(MockOllama {
        delay: Duration::from_secs(5),
        ..MockOllama::replying(REPLY)
    });
    let endpoint = serve(mock).await;
    let engine = HealingEngine::new(ai_only(&endpoint, 30_000));
    let dom = checkout_page();

    let started = Instant::now();
    let (result, _) = tokio::join!(engine.heal(&dom, "#checkout-submit"), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.update_config(&PartialHealingConfig {
            ai_backend: Some(PartialAiBackendConfig {
                model: Some("llama3.2".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    });
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!result.success);
    assert_eq!(engine.config().ai_backend.model, "llama3.2");
}
