// tests/relevance_scoring.rs
//
// Two-stage relevance scoring through the public scorer, with a counting mock model.
//
// Covered:
// - keyword-only short circuit never calls the model
// - the blended score for a known headline
// - more matching terms never lower the keyword score
// - model failure falls back to the configured default

use std::sync::Arc;

use ai_research_hub::model::MockModel;
use ai_research_hub::relevance::{RelevanceEngine, RelevanceHandle, RelevanceScorer};

fn scorer(model: &MockModel) -> RelevanceScorer {
    let handle = RelevanceHandle::with_defaults().expect("default relevance table");
    RelevanceScorer::new(handle, Arc::new(model.clone()))
}

#[tokio::test]
async fn low_keyword_score_short_circuits_without_model_call() {
    let model = MockModel::new().with_completion("1.0");
    let s = scorer(&model);

    let off_topic = s.evaluate("Three easy pasta recipes for a weeknight dinner").await;
    assert_eq!(off_topic.score, 0.0);
    assert!(off_topic.short_circuited());

    // "transformer" alone: 0.7 + lead 0.35 = 1.05 / 10 -> 0.105, below the 0.2 threshold
    let weak = s.evaluate("The transformer in the garage hummed all night").await;
    assert!(weak.short_circuited());
    assert_eq!(weak.score, 1.0);

    assert_eq!(model.calls(), 0, "short-circuit path must not reach the model");
}

#[tokio::test]
async fn openai_headline_blends_with_model_reply() {
    let model = MockModel::new().with_completion("0.9");
    let s = scorer(&model);

    let rel = s.evaluate("OpenAI released a new GPT model for reasoning").await;

    // openai 0.8*1.5 + gpt 0.8*1.5 = 2.4 -> 0.24, plus one known entity 0.1 -> 0.34
    assert!((rel.keyword_score - 0.34).abs() < 1e-4, "got {}", rel.keyword_score);
    assert_eq!(rel.model_score, Some(0.9));
    // (0.34*0.4 + 0.9*0.6) * 10 = 6.76
    assert_eq!(rel.score, 7.0);
    assert_eq!(model.calls(), 1);
    assert!(rel.matched.contains(&"openai".to_string()));
    assert!(rel.matched.contains(&"gpt".to_string()));
}

#[tokio::test]
async fn failing_model_uses_default_score() {
    let model = MockModel::new().failing();
    let s = scorer(&model);
    let rel = s.evaluate("OpenAI released a new GPT model for reasoning").await;
    assert_eq!(rel.model_score, Some(0.5));
    // (0.34*0.4 + 0.5*0.6) * 10 = 4.36
    assert_eq!(rel.score, 4.0);
}

#[test]
fn adding_matching_terms_never_lowers_keyword_score() {
    let engine = RelevanceEngine::from_toml_str("").expect("empty toml uses defaults");
    let texts = [
        "A quiet week.",
        "A quiet week for machine learning.",
        "A quiet week for machine learning and deep learning.",
        "A quiet week for machine learning and deep learning at OpenAI and Google.",
        "A quiet week for machine learning and deep learning at OpenAI and Google, plus a new LLM.",
    ];
    let scores: Vec<f32> = texts.iter().map(|t| engine.keyword_score(t).score).collect();
    for pair in scores.windows(2) {
        assert!(pair[1] >= pair[0], "scores must be non-decreasing: {scores:?}");
    }
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
}

#[test]
fn custom_table_from_toml_is_used() {
    let engine = RelevanceEngine::from_toml_str(
        r#"
        [keywords]
        "robot" = 1.0
        "#,
    )
    .expect("valid toml");
    assert!(engine.keyword_score("A robot walks").score > 0.0);
    assert_eq!(engine.keyword_score("OpenAI GPT").score, 0.0);
}
