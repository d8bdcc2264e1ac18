//! Integration tests for the LLM client and LLM-driven repair.
//!
//! These tests make real API calls.
//! Run with: BOOKFORGE_LLM_API_KEY=your_key cargo test --test llm_integration -- --ignored

use bookforge::artifact::{PromptDescriptor, QcResult, QualityMetrics};
use bookforge::book::VisualFingerprint;
use bookforge::llm::{CompletionRequest, LlmClient, LlmProvider, Message};
use bookforge::services::repair::LlmRepairConfig;
use bookforge::services::{LlmRepair, RepairService};
use std::sync::Arc;

fn create_test_client() -> LlmClient {
    LlmClient::from_env()
        .expect("BOOKFORGE_LLM_API_KEY environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_completion() {
    let client = create_test_client();
    let request = CompletionRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.complete(request).await;
    assert!(response.is_ok(), "Completion failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Expected '4' in response, got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_llm_repair_revises_descriptor() {
    let client: Arc<dyn LlmProvider> = Arc::new(create_test_client());
    let repair = LlmRepair::new(client, LlmRepairConfig::default());

    let descriptor = PromptDescriptor::new(1, "An old man fishing on a lake at dawn")
        .with_character("grey beard, green cap");
    let qc = QcResult::scored(1, None, QualityMetrics::uniform(3.0), 7.0)
        .with_issues(vec!["The cap is red instead of green".to_string()]);

    let revised = repair
        .repair(&descriptor, &qc, &VisualFingerprint::default())
        .await
        .expect("repair should succeed");

    assert_eq!(revised.page_number, 1);
    assert!(!revised.main_prompt.is_empty());
}
