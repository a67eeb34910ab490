//! Upstream realtime speech-to-text session.
//!
//! One [`ScribeSessionManager`] per live session: it acquires a single-use
//! token, opens the upstream WebSocket, pumps base64 audio up and transcript
//! frames down, and emits normalized [`Segment`]s to the orchestrator.
//! Socket I/O runs on one task whose select loop couples the send and
//! receive directions, so a failure of either tears down both.

pub mod wire;

use crate::config::SttConfig;
use crate::error::{RelayError, Result};
use crate::segment::{Segment, utc_now_secs};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wire::{ScribeEvent, ScribeRequest, TokenResponse};

/// The upstream VAD reports speech roughly this long after it begins.
const SEG_START_OFFSET: f64 = 0.3;

/// Lifecycle of one upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttState {
    Init,
    TokenAcquired,
    Connected,
    Running,
    Closed,
    Error,
}

/// A normalized transcript headed for the translation queue.
#[derive(Debug, Clone)]
pub struct SttTranscript {
    pub sid: String,
    pub segment: Segment,
}

/// Per-session duplex link to the upstream realtime STT.
pub struct ScribeSessionManager {
    sid: String,
    audio_tx: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<SttState>>,
    cancel: CancellationToken,
}

impl ScribeSessionManager {
    /// Start the upstream session. Normalized segments arrive on `out_tx`.
    ///
    /// Token or connection failures put the manager in [`SttState::Error`];
    /// the orchestrator re-instantiates it on the next producer event.
    pub fn start(
        sid: String,
        config: SttConfig,
        http: reqwest::Client,
        out_tx: mpsc::UnboundedSender<SttTranscript>,
    ) -> Arc<Self> {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            sid: sid.clone(),
            audio_tx,
            state: Arc::new(Mutex::new(SttState::Init)),
            cancel: CancellationToken::new(),
        });

        let state = Arc::clone(&manager.state);
        let cancel = manager.cancel.clone();
        tokio::spawn(async move {
            let result = run_session(&sid, &config, http, audio_rx, out_tx, &state, cancel).await;
            let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
            match result {
                Ok(()) => {
                    if *state != SttState::Error {
                        *state = SttState::Closed;
                    }
                }
                Err(e) => {
                    error!("scribe session for {sid} failed: {e}");
                    *state = SttState::Error;
                }
            }
        });

        manager
    }

    /// Enqueue a base64 audio chunk; dropped unless the session is running.
    pub fn push_audio(&self, base64_audio: String) {
        if self.state() == SttState::Running {
            let _ = self.audio_tx.send(base64_audio);
        } else {
            debug!("dropping audio for {} (session not running)", self.sid);
        }
    }

    /// Close the upstream socket and stop both loops.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SttState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the session can still accept or will soon accept audio.
    pub fn is_alive(&self) -> bool {
        !matches!(self.state(), SttState::Closed | SttState::Error)
    }
}

async fn run_session(
    sid: &str,
    config: &SttConfig,
    http: reqwest::Client,
    mut audio_rx: mpsc::UnboundedReceiver<String>,
    out_tx: mpsc::UnboundedSender<SttTranscript>,
    state: &Arc<Mutex<SttState>>,
    cancel: CancellationToken,
) -> Result<()> {
    let Some(api_key) = config.api_key.clone() else {
        return Err(RelayError::Config(format!(
            "missing ELEVENLABS_API_KEY for {sid}"
        )));
    };

    let token = fetch_token(&http, &config.api_base, &api_key).await?;
    set_state(state, SttState::TokenAcquired);

    let mut url = url::Url::parse(&format!("{}/v1/speech-to-text/realtime", config.ws_base))
        .map_err(|e| RelayError::Stt(format!("bad ws base: {e}")))?;
    url.query_pairs_mut()
        .append_pair("token", &token)
        .append_pair("model_id", "scribe_v2_realtime")
        .append_pair("audio_format", "pcm_16000")
        .append_pair("commit_strategy", "vad")
        .append_pair("include_timestamps", "false");

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::Stt(format!("bad upstream url: {e}")))?;
    request.headers_mut().insert(
        "xi-api-key",
        api_key
            .parse()
            .map_err(|_| RelayError::Stt("API key is not a valid header value".to_owned()))?,
    );

    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| RelayError::Stt(format!("connect: {e}")))?;
    set_state(state, SttState::Connected);
    info!("connected to scribe for session {sid}");

    let (mut write, mut read) = ws.split();
    set_state(state, SttState::Running);

    let mut normalizer = TranscriptNormalizer::new(config.partial_interval_secs);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let frame = ScribeRequest::audio_chunk(chunk);
                let json = serde_json::to_string(&frame)
                    .map_err(|e| RelayError::Stt(format!("encode frame: {e}")))?;
                write
                    .send(Message::Text(json))
                    .await
                    .map_err(|e| RelayError::Stt(format!("send: {e}")))?;
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(sid, &text, &mut normalizer, &out_tx);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("scribe closed the stream for {sid}");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(RelayError::Stt(format!("recv: {e}")));
                    }
                }
            }
        }
    }

    Ok(())
}

fn handle_frame(
    sid: &str,
    raw: &str,
    normalizer: &mut TranscriptNormalizer,
    out_tx: &mpsc::UnboundedSender<SttTranscript>,
) {
    let event = match serde_json::from_str::<ScribeEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!("undecodable scribe frame for {sid}: {e}");
            return;
        }
    };

    match event {
        ScribeEvent::SessionStarted => info!("scribe session started for {sid}"),
        ScribeEvent::PartialTranscript { text } => {
            if let Some(segment) = normalizer.observe(true, &text, utc_now_secs()) {
                let _ = out_tx.send(SttTranscript {
                    sid: sid.to_owned(),
                    segment,
                });
            }
        }
        ScribeEvent::CommittedTranscript { text } => {
            if let Some(segment) = normalizer.observe(false, &text, utc_now_secs()) {
                let _ = out_tx.send(SttTranscript {
                    sid: sid.to_owned(),
                    segment,
                });
            }
        }
        ScribeEvent::Error { error }
        | ScribeEvent::AuthError { error }
        | ScribeEvent::QuotaExceededError { error } => {
            error!("scribe error for {sid}: {error}");
        }
        ScribeEvent::Unknown => {}
    }
}

async fn fetch_token(http: &reqwest::Client, api_base: &str, api_key: &str) -> Result<String> {
    let url = format!(
        "{}/v1/single-use-token/realtime_scribe",
        api_base.trim_end_matches('/')
    );
    let response = http
        .post(&url)
        .header("xi-api-key", api_key)
        .send()
        .await
        .map_err(|e| RelayError::Stt(format!("token request: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::Stt(format!("token status {status}")));
    }
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| RelayError::Stt(format!("token decode: {e}")))?;
    Ok(token.token)
}

fn set_state(state: &Arc<Mutex<SttState>>, next: SttState) {
    *state.lock().unwrap_or_else(|p| p.into_inner()) = next;
}

/// Turns raw upstream transcript frames into emitted segments.
///
/// Keeps the per-utterance start time, debounces partials to one per
/// interval, and suppresses a commit whose text equals the last emitted
/// partial (the upstream re-sends the final partial as its commit).
struct TranscriptNormalizer {
    partial_interval: f64,
    seg_start_time: Option<f64>,
    last_partial_emit: f64,
    last_partial_text: String,
}

impl TranscriptNormalizer {
    fn new(partial_interval: f64) -> Self {
        Self {
            partial_interval,
            seg_start_time: None,
            last_partial_emit: utc_now_secs(),
            last_partial_text: String::new(),
        }
    }

    fn observe(&mut self, partial: bool, text: &str, now: f64) -> Option<Segment> {
        let mut text = text.trim();
        if text.is_empty() {
            return None;
        }
        // One trailing clause separator is upstream noise, not content.
        if let Some(last) = text.chars().next_back() {
            if matches!(last, ',' | '.' | '。' | '，') {
                text = &text[..text.len() - last.len_utf8()];
            }
        }

        if !partial && text == self.last_partial_text {
            return None;
        }

        // The first frame of an utterance pins its start time, even when
        // that frame itself is debounced away below.
        let seg_start = *self.seg_start_time.get_or_insert(now);

        if partial && now - self.last_partial_emit <= self.partial_interval {
            return None;
        }

        let segment = Segment::with_text(partial, seg_start - SEG_START_OFFSET, now, text);

        if partial {
            self.last_partial_emit = now;
            self.last_partial_text = text.to_owned();
        } else {
            self.seg_start_time = None;
        }

        Some(segment)
    }
}
