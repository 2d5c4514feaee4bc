//! Voice chat WebSocket endpoint: `GET /v1/{ns}/{id}/voice/chat`.
//!
//! Binary frames carry 16 kHz / 16-bit / mono PCM; text frames carry JSON
//! control commands.  The server pushes JSON control events plus binary TTS
//! audio.  Client disconnect ends the session and drops buffered audio.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;

use crate::state::AppState;
use crate::voice::{VoiceCommand, VoiceEvent, VoiceSession, DEFAULT_SILENCE_WINDOW_MS};
use lf_domain::identity::ModelFamily;
use lf_domain::Error;

pub async fn ws_handler(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, namespace, project, socket))
}

async fn handle_socket(state: AppState, namespace: String, project: String, mut socket: WebSocket) {
    let mut session = VoiceSession::new(DEFAULT_SILENCE_WINDOW_MS);

    loop {
        let message = match socket.recv().await {
            Some(Ok(message)) => message,
            // Disconnect or protocol error: unwind; the session drops its
            // buffered audio with it.
            Some(Err(e)) => {
                tracing::debug!(error = %e, "voice socket error");
                break;
            }
            None => break,
        };

        let run_turn = match message {
            Message::Binary(frame) => session.push_audio(&frame),
            Message::Text(raw) => match serde_json::from_str::<VoiceCommand>(&raw) {
                Ok(VoiceCommand::Flush) => session.buffered_bytes() > 0,
                Ok(VoiceCommand::Reset) => {
                    session.reset();
                    false
                }
                Err(e) => {
                    send_event(
                        &mut socket,
                        &VoiceEvent::Error {
                            message: format!("bad control message: {e}"),
                        },
                    )
                    .await;
                    false
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => false,
        };

        if !run_turn {
            continue;
        }

        match execute_turn(&state, &namespace, &project, &mut session, &mut socket).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, "voice turn failed");
                send_event(
                    &mut socket,
                    &VoiceEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await;
                session.reset();
            }
        }
    }
}

async fn execute_turn(
    state: &AppState,
    namespace: &str,
    project: &str,
    session: &mut VoiceSession,
    socket: &mut WebSocket,
) -> lf_domain::Result<()> {
    let config = state.projects.get(namespace, project)?;

    // Speech model: the first speech-family record in the runtime.
    let speech_record = config
        .runtime
        .models
        .iter()
        .find(|m| m.family == ModelFamily::Speech)
        .ok_or_else(|| Error::InvalidArgument("project has no speech model".into()))?;

    let identity =
        lf_domain::identity::ModelIdentity::parse(ModelFamily::Speech, &speech_record.model);
    let key = lf_domain::identity::CacheKey::from(&identity).build();
    let backends = state.backends.clone();
    let spec = lf_models::LoadSpec::new(identity);
    let speech = state
        .models
        .get_or_load(&key, || async move { backends.load(&spec).await })
        .await?;

    let (_, language) = state.language_model(&config, None).await?;

    // Events go through a buffer because the emit callback is synchronous.
    let mut events = Vec::new();
    let audio = session
        .run_turn(&speech, &language, &mut |event| events.push(event))
        .await?;

    for event in &events {
        send_event(socket, event).await;
        // Ship the audio between tts_start and tts_done, the way the
        // client expects to interleave them.
        if matches!(event, VoiceEvent::TtsStart) {
            if socket.send(Message::Binary(audio.clone())).await.is_err() {
                return Ok(()); // client went away mid-turn
            }
        }
    }
    Ok(())
}

async fn send_event(socket: &mut WebSocket, event: &VoiceEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
