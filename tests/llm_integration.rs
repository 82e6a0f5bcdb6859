//! Integration tests for the judge client.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test llm_integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use vibe_eval::judge::{default_dimensions, CodeFile, Judge, JudgeRequest, LlmJudge};
use vibe_eval::llm::{
    CostTracker, GenerationRequest, LiteLlmClient, LlmProvider, Message, OPENROUTER_API_BASE,
};

fn get_test_api_key() -> String {
    std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests")
}

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::new(
        OPENROUTER_API_BASE,
        Some(get_test_api_key()),
        Duration::from_secs(120),
    )
    .expect("client should build")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "openai/gpt-4o",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Response should contain '4', got: {}", content);
    assert!(response.usage.total_tokens > 0, "Should have token usage");
}

#[tokio::test]
#[ignore]
async fn test_live_judge_scores_every_dimension() {
    let client: Arc<dyn LlmProvider> = Arc::new(create_test_client());
    let costs = Arc::new(CostTracker::new());
    let judge = LlmJudge::new("gemini-flash", "google/gemini-3-flash-preview", client)
        .with_cost_tracker(costs.clone());

    let request = JudgeRequest {
        case_id: "fizzbuzz".to_string(),
        spec: "Write a Python script that prints FizzBuzz for 1..15.".to_string(),
        files: vec![CodeFile {
            path: "main.py".to_string(),
            content: "for i in range(1, 16):\n    print('Fizz' * (i % 3 == 0) + 'Buzz' * (i % 5 == 0) or i)\n"
                .to_string(),
        }],
        dimensions: default_dimensions(),
    };

    let score = judge.score(&request).await.expect("judge should answer");
    assert_eq!(score.scores.len(), 4);
    for (name, dimension) in &score.scores {
        assert!(
            (0.0..=10.0).contains(&dimension.score),
            "{} out of range: {}",
            name,
            dimension.score
        );
    }
    assert!(costs.total_usd() > 0.0);
}
