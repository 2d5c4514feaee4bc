//! Voice chat over WebSocket: STT → LLM → TTS, with silence-based
//! endpointing.
//!
//! The client streams 16 kHz / 16-bit / mono PCM as binary frames.  When
//! the trailing window of audio is silence, the server runs the turn and
//! streams back JSON control messages (`transcription`, `llm_text`,
//! `tts_start`, `tts_done`, `status`, `error`) plus binary TTS audio.
//! Per-turn audio is held in memory only.

use serde::{Deserialize, Serialize};

use lf_domain::stream::ChatMessage;
use lf_domain::{Error, Result};
use lf_models::adapter::GenerateOptions;
use lf_models::ModelHandle;

/// PCM sample rate of the fast path.
pub const SAMPLE_RATE: u32 = 16_000;
/// Samples below this magnitude count as silence.
pub const SILENCE_AMPLITUDE: i16 = 64;
/// Trailing silence that ends an utterance.
pub const DEFAULT_SILENCE_WINDOW_MS: u32 = 700;
/// Minimum utterance length worth transcribing.
const MIN_UTTERANCE_MS: u32 = 250;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server → client control frames.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    Transcription { text: String },
    LlmText { text: String },
    TtsStart,
    TtsDone,
    Status { state: VoiceState },
    Error { message: String },
}

/// Client → server control frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceCommand {
    /// Force the end of the current utterance without waiting for silence.
    Flush,
    /// Drop buffered audio.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    StreamingIn,
    Transcribing,
    Generating,
    StreamingOut,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VAD endpointing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Number of PCM bytes in a silence window of the given length.
pub fn silence_window_bytes(window_ms: u32) -> usize {
    // 16-bit mono: 2 bytes per sample.
    (SAMPLE_RATE as usize * window_ms as usize / 1000) * 2
}

/// True when the trailing `window_bytes` of the buffer are all silence.
/// The buffer must hold at least one window plus a minimal utterance.
pub fn trailing_silence(pcm: &[u8], window_bytes: usize) -> bool {
    let min_len = window_bytes + silence_window_bytes(MIN_UTTERANCE_MS);
    if pcm.len() < min_len {
        return false;
    }
    let tail = &pcm[pcm.len() - window_bytes..];
    tail.chunks_exact(2).all(|pair| {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        sample.abs() <= SILENCE_AMPLITUDE
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live voice connection's state.
pub struct VoiceSession {
    pub state: VoiceState,
    audio_buf: Vec<u8>,
    window_bytes: usize,
    history: Vec<ChatMessage>,
}

impl VoiceSession {
    pub fn new(silence_window_ms: u32) -> Self {
        Self {
            state: VoiceState::Idle,
            audio_buf: Vec::new(),
            window_bytes: silence_window_bytes(silence_window_ms),
            history: Vec::new(),
        }
    }

    /// Append a binary frame.  Returns true when the trailing silence rule
    /// says the utterance ended and the turn should run.
    pub fn push_audio(&mut self, frame: &[u8]) -> bool {
        self.state = VoiceState::StreamingIn;
        self.audio_buf.extend_from_slice(frame);
        trailing_silence(&self.audio_buf, self.window_bytes)
    }

    /// Take the buffered utterance, leaving the buffer empty.
    pub fn take_utterance(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.audio_buf)
    }

    pub fn reset(&mut self) {
        self.audio_buf.clear();
        self.state = VoiceState::Idle;
    }

    pub fn buffered_bytes(&self) -> usize {
        self.audio_buf.len()
    }

    /// Run one full turn over the buffered utterance.  Emitted events are
    /// pushed through `emit`; binary TTS audio is returned for the caller
    /// to send as binary frames.
    pub async fn run_turn(
        &mut self,
        speech: &ModelHandle,
        language: &ModelHandle,
        emit: &mut (dyn FnMut(VoiceEvent) + Send),
    ) -> Result<Vec<u8>> {
        let pcm = self.take_utterance();
        if pcm.is_empty() {
            return Err(Error::InvalidArgument("no audio buffered".into()));
        }

        // STT.
        self.state = VoiceState::Transcribing;
        emit(VoiceEvent::Status {
            state: VoiceState::Transcribing,
        });
        let transcript = speech.as_speech()?.transcribe(&pcm, SAMPLE_RATE).await?;
        emit(VoiceEvent::Transcription {
            text: transcript.clone(),
        });

        // LLM.
        self.state = VoiceState::Generating;
        emit(VoiceEvent::Status {
            state: VoiceState::Generating,
        });
        self.history.push(ChatMessage::user(&transcript));
        let reply = language
            .as_language()?
            .generate(&self.history, &GenerateOptions::default())
            .await?;
        self.history.push(ChatMessage::assistant(&reply));
        emit(VoiceEvent::LlmText { text: reply.clone() });

        // TTS.
        self.state = VoiceState::StreamingOut;
        emit(VoiceEvent::TtsStart);
        let audio = speech.as_speech()?.synthesize(&reply).await?;
        emit(VoiceEvent::TtsDone);

        // Turn complete; tell the client we are listening again.
        self.state = VoiceState::Idle;
        emit(VoiceEvent::Status {
            state: VoiceState::Idle,
        });
        Ok(audio)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
