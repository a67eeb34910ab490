//! Correction, multilingual translation and keyword extraction.
//!
//! The pipeline is purely functional over the transcript snapshot it is
//! given: it reads the snapshot and the keyword store, calls the LLM, and
//! returns a new segment. It never touches the transcript store, so a
//! cancelled run leaves no trace.

pub mod llm;
pub mod queue;

use crate::segment::{Segment, TranscriptView};
use crate::store::KeywordStore;
use async_trait::async_trait;
use futures_util::future::join_all;
use llm::{ChatClient, ChatMessage};
use std::collections::BTreeMap;
use tracing::warn;

/// Turns a transcribed segment into its corrected/translated form.
#[async_trait]
pub trait SegmentProcessor: Send + Sync {
    /// Process one segment against a transcript snapshot.
    async fn process(&self, sid: &str, segment: &Segment, view: &TranscriptView) -> Segment;
}

/// LLM-backed correction/translation/keyword pipeline.
pub struct TranslationPipeline {
    client: Option<ChatClient>,
    languages: Vec<String>,
    keywords: KeywordStore,
}

/// Prompt context drawn from the recent transcript.
struct PromptContext {
    corrected: String,
    translated: BTreeMap<String, String>,
}

/// How many trailing committed segments feed the prompt context.
const CONTEXT_SEGMENTS: usize = 3;
/// Maximum characters of joined context handed to the LLM.
const CONTEXT_TAIL_CHARS: usize = 50;

impl TranslationPipeline {
    pub fn new(client: Option<ChatClient>, languages: Vec<String>, keywords: KeywordStore) -> Self {
        Self {
            client,
            languages,
            keywords,
        }
    }

    /// Run the pipeline over `segment`.
    ///
    /// With `skip_correction` the correction stage is bypassed (the text is
    /// already clean, e.g. from the realtime STT); translation and keyword
    /// extraction still run. Failures never propagate: each stage falls
    /// back to the text it was given.
    pub async fn translate_segment(
        &self,
        sid: &str,
        segment: &Segment,
        view: &TranscriptView,
        skip_correction: bool,
    ) -> Segment {
        let Some(client) = &self.client else {
            return segment.clone();
        };
        if self.languages.is_empty() {
            return segment.clone();
        }
        let text = segment.result.corrected.clone();
        if text.is_empty() {
            return segment.clone();
        }

        let current_keywords = self.keywords.get(sid).await;
        let context = self.build_context(view);

        let corrected = if skip_correction {
            text
        } else {
            self.correct(client, &current_keywords, &context, &text).await
        };

        let keyword_job = async {
            if segment.partial {
                Vec::new()
            } else {
                self.extract_keywords(client, &corrected).await
            }
        };
        let translation_jobs = join_all(self.languages.iter().map(|language| {
            self.translate_one(client, &current_keywords, &context, view, language, &corrected)
        }));
        let (translations, special_keywords) = tokio::join!(translation_jobs, keyword_job);

        let mut translated = BTreeMap::new();
        for (language, translation) in self.languages.iter().zip(translations) {
            translated.insert(language.clone(), translation);
        }

        if !segment.partial {
            self.keywords.append_new(sid, &special_keywords).await;
        }

        let mut out = segment.clone();
        out.result.corrected = corrected;
        out.result.translated = translated;
        out.result.special_keywords = special_keywords;
        out
    }

    fn build_context(&self, view: &TranscriptView) -> PromptContext {
        let history = view
            .committed
            .iter()
            .rev()
            .take(CONTEXT_SEGMENTS)
            .rev()
            .collect::<Vec<_>>();

        let corrected = history
            .iter()
            .map(|s| s.result.corrected.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut translated = BTreeMap::new();
        for language in &self.languages {
            let joined = history
                .iter()
                .map(|s| {
                    s.result
                        .translated
                        .get(language)
                        .map_or("", String::as_str)
                })
                .collect::<Vec<_>>()
                .join(" ");
            translated.insert(language.clone(), tail_chars(&joined, CONTEXT_TAIL_CHARS));
        }

        PromptContext {
            corrected: tail_chars(&corrected, CONTEXT_TAIL_CHARS),
            translated,
        }
    }

    async fn correct(
        &self,
        client: &ChatClient,
        keywords: &[String],
        context: &PromptContext,
        text: &str,
    ) -> String {
        let developer = format!(
            "This is a transcription about:\n{}\n\n\
             Correct the text **only in <correct_this>** as \"corrected text\" \
             according to the reference and context.\n\
             Return only the corrected text, no any comment.",
            keywords.join(", ")
        );
        let user = format!(
            "{}\n<correct_this>\n{}\n</correct_this>",
            context.corrected, text
        );
        match client
            .complete(
                &[ChatMessage::developer(developer), ChatMessage::user(user)],
                false,
            )
            .await
        {
            Ok(response) => strip_tag(&response, "correct_this"),
            Err(e) => {
                warn!("correction failed, keeping original text: {e}");
                text.to_owned()
            }
        }
    }

    async fn translate_one(
        &self,
        client: &ChatClient,
        keywords: &[String],
        context: &PromptContext,
        view: &TranscriptView,
        language: &str,
        corrected: &str,
    ) -> String {
        // A previous partial translation keeps the phrasing of the evolving
        // sentence stable across successive partials.
        let prev_translation = view
            .partial
            .as_ref()
            .and_then(|p| p.result.translated.get(language))
            .filter(|t| !t.is_empty())
            .map(|t| format!("<prev_translation>\n{t}......\n</prev_translation>\n"))
            .unwrap_or_default();

        let developer = format!(
            "This is a transcription about:\n{}\n\n\
             Rewrite the text **only in <translate_this>** into {language}, \
             the sentence might not ended yet.\n\
             Return only the translated text, no any comment.\n{prev_translation}",
            keywords.join(", ")
        );
        let language_context = context
            .translated
            .get(language)
            .map_or("", String::as_str);
        let user = format!(
            "{language_context}\n<translate_this>\n{corrected}\n</translate_this>"
        );

        match client
            .complete(
                &[ChatMessage::developer(developer), ChatMessage::user(user)],
                false,
            )
            .await
        {
            Ok(response) => strip_tag(&response, "translate_this"),
            Err(e) => {
                warn!("translation into {language} failed, falling back: {e}");
                corrected.to_owned()
            }
        }
    }

    async fn extract_keywords(&self, client: &ChatClient, corrected: &str) -> Vec<String> {
        let developer = "If there are very special keywords in the provide text, \
                         add them to the special_keywords list.\n\
                         return in json format:\n{\"special_keywords\": []}";
        match client
            .complete(
                &[
                    ChatMessage::developer(developer),
                    ChatMessage::user(corrected),
                ],
                true,
            )
            .await
        {
            Ok(response) => match serde_json::from_str::<serde_json::Value>(&response) {
                Ok(value) => value["special_keywords"]
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|k| k.as_str())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default(),
                Err(e) => {
                    warn!("keyword extraction returned non-JSON: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("keyword extraction failed: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SegmentProcessor for TranslationPipeline {
    async fn process(&self, sid: &str, segment: &Segment, view: &TranscriptView) -> Segment {
        // Chained after the realtime STT the text is already clean; the
        // correction stage stays available for raw-text producers.
        self.translate_segment(sid, segment, view, true).await
    }
}

/// Last `count` characters of `text` (the LLM context window is tiny and
/// the tail is the relevant part).
fn tail_chars(text: &str, count: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= count {
        return text.to_owned();
    }
    chars[chars.len() - count..].iter().collect()
}

/// Remove `<tag>`/`</tag>` wrappers a model echoed back.
fn strip_tag(response: &str, tag: &str) -> String {
    response
        .replace(&format!("<{tag}>"), "")
        .replace(&format!("</{tag}>"), "")
        .trim()
        .to_owned()
}
