//! Streaming dispatcher support: incremental UTF-8 decoding for tokenizers
//! that emit partial multi-byte sequences, OpenAI-compatible SSE chunk
//! shapes, and the TTL-evicted map of vision streaming sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use lf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incremental UTF-8 decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decodes a byte stream chunk by chunk, buffering an incomplete trailing
/// multi-byte sequence until the next chunk completes it.
///
/// For any partitioning of a valid UTF-8 byte sequence into chunks, the
/// concatenated outputs equal the decoded whole.  Invalid bytes inside a
/// chunk are replaced with U+FFFD rather than aborting the stream.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    remainder: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk.  Returns the decoded text; the undecodable
    /// tail (at most 3 bytes of an incomplete sequence) is kept for the
    /// next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.remainder);
        buf.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // Safe: from_utf8 validated this prefix.
                    out.push_str(std::str::from_utf8(&rest[..valid]).expect("validated prefix"));
                    match e.error_len() {
                        // Truncated sequence at the end of input: keep it.
                        None => {
                            rest = &rest[valid..];
                            break;
                        }
                        // Genuinely invalid bytes: substitute and continue.
                        Some(len) => {
                            out.push('\u{FFFD}');
                            rest = &rest[valid + len..];
                        }
                    }
                }
            }
        }

        self.remainder = rest.to_vec();
        out
    }

    /// Bytes still waiting for completion.
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }

    /// Flush at end of stream: an unfinished sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.remainder.is_empty() {
            return String::new();
        }
        self.remainder.clear();
        "\u{FFFD}".to_owned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible SSE chunks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// One `chat.completion.chunk` frame.
#[derive(Debug, Serialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl CompletionChunk {
    fn base(id: &str, created: i64, model: &str, delta: ChunkDelta, finish: Option<String>) -> Self {
        Self {
            id: id.to_owned(),
            object: "chat.completion.chunk",
            created,
            model: model.to_owned(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
        }
    }

    /// Opening frame announcing the assistant role.
    pub fn initial(id: &str, created: i64, model: &str) -> Self {
        Self::base(
            id,
            created,
            model,
            ChunkDelta {
                role: Some("assistant".into()),
                content: Some(String::new()),
            },
            None,
        )
    }

    /// One token frame.  Never batch multiple tokens into a frame.
    pub fn token(id: &str, created: i64, model: &str, text: &str) -> Self {
        Self::base(
            id,
            created,
            model,
            ChunkDelta {
                role: None,
                content: Some(text.to_owned()),
            },
            None,
        )
    }

    /// Closing frame with the finish reason; followed by `data: [DONE]`.
    pub fn done(id: &str, created: i64, model: &str) -> Self {
        Self::base(
            id,
            created,
            model,
            ChunkDelta {
                role: None,
                content: None,
            },
            Some("stop".into()),
        )
    }
}

/// Mint a completion id in the OpenAI shape.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming sessions (vision)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State of one vision streaming session.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: String,
    pub cascade_config: serde_json::Value,
    pub last_frame_at: Instant,
    pub frames_processed: u64,
}

/// Bounded, TTL-evicted registry of streaming sessions.
pub struct StreamSessionMap {
    sessions: Mutex<HashMap<String, StreamSession>>,
    ttl: Duration,
    max_sessions: usize,
}

impl StreamSessionMap {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            max_sessions,
        }
    }

    /// Register a new session; fails with `unavailable` at the cap.
    pub fn create(&self, cascade_config: serde_json::Value) -> Result<String> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_sessions {
            return Err(Error::Unavailable(format!(
                "streaming session limit reached ({})",
                self.max_sessions
            )));
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        sessions.insert(
            session_id.clone(),
            StreamSession {
                session_id: session_id.clone(),
                cascade_config,
                last_frame_at: Instant::now(),
                frames_processed: 0,
            },
        );
        Ok(session_id)
    }

    /// Record a processed frame; false when the session is unknown
    /// (evicted or never created).
    pub fn touch(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(s) => {
                s.last_frame_at = Instant::now();
                s.frames_processed += 1;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<StreamSession> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Drop sessions idle past the TTL; returns how many.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.last_frame_at) <= self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Background sweep for idle streaming sessions.
pub fn spawn_stream_reaper(
    map: Arc<StreamSessionMap>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = map.evict_idle();
            if evicted > 0 {
                tracing::debug!(evicted, "streaming session sweep");
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    // ── UTF-8 decoding ──────────────────────────────────────────────

    #[test]
    fn split_emoji_across_chunks() {
        let mut decoder = Utf8StreamDecoder::new();

        let first = decoder.decode(b"Hi \xf0\x9f");
        assert_eq!(first, "Hi ");
        assert_eq!(decoder.remainder(), b"\xf0\x9f");

        let second = decoder.decode(b"\x98\x8e done");
        assert_eq!(second, "\u{1F60E} done");
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn arbitrary_partitions_reassemble() {
        let text = "héllo wörld 😎 末端 done";
        let bytes = text.as_bytes();

        // Every split position, byte by byte.
        for split in 0..=bytes.len() {
            let mut decoder = Utf8StreamDecoder::new();
            let mut out = decoder.decode(&bytes[..split]);
            out.push_str(&decoder.decode(&bytes[split..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "split at {split}");
        }
    }

    #[test]
    fn one_byte_at_a_time() {
        let text = "añ😎b";
        let mut decoder = Utf8StreamDecoder::new();
        let mut out = String::new();
        for b in text.as_bytes() {
            out.push_str(&decoder.decode(&[*b]));
        }
        assert_eq!(out, text);
    }

    #[test]
    fn invalid_bytes_are_replaced_not_fatal() {
        let mut decoder = Utf8StreamDecoder::new();
        let out = decoder.decode(b"ok \xff\xfe still ok");
        assert!(out.starts_with("ok "));
        assert!(out.contains('\u{FFFD}'));
        assert!(out.ends_with("still ok"));
    }

    #[test]
    fn finish_flushes_dangling_sequence() {
        let mut decoder = Utf8StreamDecoder::new();
        decoder.decode(b"x\xf0\x9f");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(decoder.remainder().is_empty());
    }

    // ── Chunk shapes ────────────────────────────────────────────────

    #[test]
    fn initial_chunk_announces_role() {
        let chunk = CompletionChunk::initial("chatcmpl-1", 123, "m");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["choices"][0]["finish_reason"], serde_json::Value::Null);
    }

    #[test]
    fn token_chunk_carries_only_content() {
        let chunk = CompletionChunk::token("chatcmpl-1", 123, "m", "hello");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["delta"]["content"], "hello");
        assert!(json["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn done_chunk_sets_finish_reason() {
        let chunk = CompletionChunk::done("chatcmpl-1", 123, "m");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn completion_ids_have_prefix() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
    }

    // ── Streaming sessions ──────────────────────────────────────────

    #[test]
    fn create_touch_and_get() {
        let map = StreamSessionMap::new(Duration::from_secs(60), 10);
        let id = map.create(serde_json::json!({"detector": "yolo"})).unwrap();

        assert!(map.touch(&id));
        assert!(map.touch(&id));
        let session = map.get(&id).unwrap();
        assert_eq!(session.frames_processed, 2);
        assert_eq!(session.cascade_config["detector"], "yolo");
    }

    #[test]
    fn cap_is_enforced() {
        let map = StreamSessionMap::new(Duration::from_secs(60), 2);
        map.create(serde_json::Value::Null).unwrap();
        map.create(serde_json::Value::Null).unwrap();
        let err = map.create(serde_json::Value::Null).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::Unavailable);
    }

    #[test]
    fn idle_sessions_evicted() {
        let map = StreamSessionMap::new(Duration::from_millis(30), 10);
        let stale = map.create(serde_json::Value::Null).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let fresh = map.create(serde_json::Value::Null).unwrap();

        assert_eq!(map.evict_idle(), 1);
        assert!(map.get(&stale).is_none());
        assert!(map.get(&fresh).is_some());
        assert!(!map.touch(&stale));
    }
}
