//! Explanation service driven through the mock provider and an on-disk cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gifttest_core::cache::ExplanationCache;
use gifttest_core::error::ExplainError;
use gifttest_core::explain::ExplanationService;
use gifttest_core::parser::parse;
use gifttest_core::traits::LlmProvider;
use gifttest_providers::mock::MockProvider;
use gifttest_providers::{GiftTestConfig, ProviderError, ProviderKind};

const BANK: &str = "\
::Q1:: Qual é a capital de Portugal? {=Lisboa ~Porto ~Braga}

::Q2:: O Tejo desagua em Lisboa. {T}
";

fn service(mock: Arc<MockProvider>, cache: ExplanationCache) -> ExplanationService {
    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    providers.insert("mock".into(), mock);
    ExplanationService::new(providers, cache)
}

fn config() -> GiftTestConfig {
    let mut config = GiftTestConfig::default();
    config.llm.retry_delay_ms = 1;
    config.llm.max_retry_delay_ms = 5;
    config
}

#[tokio::test]
async fn cached_explanations_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("explanations.json");
    let (bank, _) = parse(BANK, "sample.gift");
    let question = bank.find("Q1").unwrap();
    let explain = config().explain_config(ProviderKind::Mock, None);

    let mock = Arc::new(MockProvider::with_fixed_response("Lisboa é a capital."));
    let first = service(Arc::clone(&mock), ExplanationCache::load(&path))
        .explain(question, &explain)
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert!(first.persist_error.is_none());
    assert!(mock.last_request().unwrap().prompt.contains("Qual é a capital"));

    let fresh = Arc::new(MockProvider::with_fixed_response("different"));
    let second = service(Arc::clone(&fresh), ExplanationCache::load(&path))
        .explain(question, &explain)
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.text, "Lisboa é a capital.");
    assert_eq!(fresh.call_count(), 0);
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let (bank, _) = parse(BANK, "sample.gift");
    let question = bank.find("Q2").unwrap();
    let mock = Arc::new(
        MockProvider::with_fixed_response("Verdadeiro.")
            .with_failures([ProviderError::NetworkError("reset".into())]),
    );
    let explanation = service(Arc::clone(&mock), ExplanationCache::in_memory())
        .explain(question, &config().explain_config(ProviderKind::Mock, None))
        .await
        .unwrap();
    assert_eq!(explanation.text, "Verdadeiro.");
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let (bank, _) = parse(BANK, "sample.gift");
    let question = bank.find("Q2").unwrap();
    let mock = Arc::new(
        MockProvider::with_fixed_response("unused")
            .with_failures([ProviderError::AuthenticationFailed("bad key".into())]),
    );
    let err = service(Arc::clone(&mock), ExplanationCache::in_memory())
        .explain(question, &config().explain_config(ProviderKind::Mock, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ExplainError::Provider { attempts: 1, .. }));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn concurrent_requests_share_one_generation() {
    let (bank, _) = parse(BANK, "sample.gift");
    let question = bank.find("Q1").unwrap().clone();
    let mock = Arc::new(
        MockProvider::with_fixed_response("Lisboa.").with_delay(Duration::from_millis(50)),
    );
    let service = Arc::new(service(Arc::clone(&mock), ExplanationCache::in_memory()));
    let explain = config().explain_config(ProviderKind::Mock, None);

    let a = service.spawn_explain(question.clone(), explain.clone());
    let b = service.spawn_explain(question, explain);
    let (a, b) = (a.wait().await.unwrap(), b.wait().await.unwrap());

    assert_eq!(a.text, b.text);
    assert_eq!(mock.call_count(), 1);
    assert_eq!(service.pending_requests(), 0);
}

#[tokio::test]
async fn prefetch_warms_the_whole_bank() {
    let (bank, _) = parse(BANK, "sample.gift");
    let questions: Vec<_> = bank.questions_in(gifttest_core::bank::CategoryFilter::All);
    let mock = Arc::new(MockProvider::with_fixed_response("ok"));
    let service = service(Arc::clone(&mock), ExplanationCache::in_memory());

    let results = service
        .prefetch(&questions, &config().explain_config(ProviderKind::Mock, None), 2)
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(service.cache().len(), 2);
}
