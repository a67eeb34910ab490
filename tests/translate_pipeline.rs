//! Translation pipeline tests against a mock OpenAI-compatible server.

use serde_json::json;
use std::sync::Arc;
use translive::config::TranslateConfig;
use translive::segment::{Segment, TranscriptView};
use translive::store::{KeywordStore, MemoryCache};
use translive::translate::TranslationPipeline;
use translive::translate::llm::ChatClient;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

fn pipeline_for(server: &MockServer, languages: &[&str]) -> (TranslationPipeline, KeywordStore) {
    let config = TranslateConfig {
        api_key: Some("test-key".to_owned()),
        api_base: server.uri(),
        languages: languages.iter().map(|l| (*l).to_owned()).collect(),
        ..TranslateConfig::default()
    };
    let keywords = KeywordStore::new(Arc::new(MemoryCache::new()), vec!["g0v".to_owned()]);
    let pipeline = TranslationPipeline::new(
        ChatClient::from_config(reqwest::Client::new(), &config),
        config.languages.clone(),
        keywords.clone(),
    );
    (pipeline, keywords)
}

#[tokio::test]
async fn committed_segment_gets_every_configured_language() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("into en,"))
        .respond_with(completion("hello"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("into ja,"))
        .respond_with(completion("こんにちは"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("special_keywords"))
        .respond_with(completion(r#"{"special_keywords":["vTaiwan"]}"#))
        .mount(&server)
        .await;

    let (pipeline, keywords) = pipeline_for(&server, &["en", "ja"]);
    let segment = Segment::with_text(false, 1.0, 2.0, "你好");
    let out = pipeline
        .translate_segment("s1", &segment, &TranscriptView::default(), true)
        .await;

    let mut languages: Vec<&str> = out.result.translated.keys().map(String::as_str).collect();
    languages.sort_unstable();
    assert_eq!(languages, vec!["en", "ja"]);
    assert_eq!(out.result.translated["en"], "hello");
    assert_eq!(out.result.translated["ja"], "こんにちは");
    assert_eq!(out.result.corrected, "你好");

    // Extracted keywords were appended to the session list.
    assert_eq!(keywords.get("s1").await, vec!["g0v", "vTaiwan"]);
}

#[tokio::test]
async fn per_language_failure_falls_back_to_corrected_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("into en,"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("into ja,"))
        .respond_with(completion("こんにちは"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("special_keywords"))
        .respond_with(completion(r#"{"special_keywords":[]}"#))
        .mount(&server)
        .await;

    let (pipeline, _) = pipeline_for(&server, &["en", "ja"]);
    let segment = Segment::with_text(false, 1.0, 2.0, "你好");
    let out = pipeline
        .translate_segment("s1", &segment, &TranscriptView::default(), true)
        .await;

    assert_eq!(out.result.translated["en"], "你好");
    assert_eq!(out.result.translated["ja"], "こんにちは");
}

#[tokio::test]
async fn partial_segments_skip_keyword_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("special_keywords"))
        .respond_with(completion(r#"{"special_keywords":["never"]}"#))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("into en,"))
        .respond_with(completion("he"))
        .mount(&server)
        .await;

    let (pipeline, keywords) = pipeline_for(&server, &["en"]);
    let segment = Segment::with_text(true, 1.0, 2.0, "he");
    let out = pipeline
        .translate_segment("s1", &segment, &TranscriptView::default(), true)
        .await;

    assert!(out.result.special_keywords.is_empty());
    assert_eq!(keywords.get("s1").await, vec!["g0v"]);
    server.verify().await;
}

#[tokio::test]
async fn correction_stage_rewrites_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("correct_this"))
        .respond_with(completion("<correct_this>\nfixed text\n</correct_this>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("into en,"))
        .respond_with(completion("fixed translation"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("special_keywords"))
        .respond_with(completion(r#"{"special_keywords":[]}"#))
        .mount(&server)
        .await;

    let (pipeline, _) = pipeline_for(&server, &["en"]);
    let segment = Segment::with_text(false, 1.0, 2.0, "fixd txt");
    let out = pipeline
        .translate_segment("s1", &segment, &TranscriptView::default(), false)
        .await;

    // Echoed delimiter tags are stripped from the model response.
    assert_eq!(out.result.corrected, "fixed text");
    assert_eq!(out.result.translated["en"], "fixed translation");
}

#[tokio::test]
async fn previous_partial_translation_is_passed_as_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("prev_translation"))
        .and(body_string_contains("previous words"))
        .respond_with(completion("previous words continued"))
        .mount(&server)
        .await;

    let (pipeline, _) = pipeline_for(&server, &["en"]);

    let mut view = TranscriptView::default();
    let mut prev = Segment::with_text(true, 5.0, 6.0, "prior");
    prev.result
        .translated
        .insert("en".to_owned(), "previous words".to_owned());
    view.partial = Some(prev);

    let segment = Segment::with_text(true, 5.0, 7.0, "prior and more");
    let out = pipeline
        .translate_segment("s1", &segment, &view, true)
        .await;
    assert_eq!(out.result.translated["en"], "previous words continued");
}
