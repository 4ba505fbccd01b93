//! # Realtime Voice Transport
//!
//! [`ChannelConnector`] over the generative API's bidirectional websocket.
//!
//! ## Protocol:
//! 1. Client connects and sends a `setup` message (model, response
//!    modality, prebuilt voice, system instruction)
//! 2. Server answers `setupComplete`; the channel is now open
//! 3. Client streams `realtimeInput.mediaChunks` with PCM16 microphone frames
//! 4. Server streams `serverContent` with inline audio parts and turn
//!    control flags, possibly a `goAway` before closing
//!
//! Each opened channel runs on its own tokio task. The task reports through
//! the channel's event stream and stops when the controller closes the
//! handle, the server closes the socket, or the socket fails.

use crate::genai::{
    model_resource, ClientMessage, Content, GenerationConfig, PrebuiltVoiceConfig, RealtimeInput,
    ServerMessage, Setup, SpeechConfig, VoiceConfig,
};
use crate::voice::channel::{
    ChannelConnector, ChannelEvent, ChannelHandle, ConnectRequest, ControlEvent, RemoteEnd,
};
use crate::voice::VoiceError;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub struct LiveConnector {
    endpoint: String,
    api_key: String,
}

impl LiveConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, VoiceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VoiceError::MissingApiKey);
        }
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
        })
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

impl ChannelConnector for LiveConnector {
    fn open(&self, request: &ConnectRequest, input_capacity: usize) -> ChannelHandle {
        let (handle, remote) = ChannelHandle::pair(input_capacity);
        let url = self.url();
        let setup = setup_message(request);
        info!("Opening realtime channel to {} ({})", self.endpoint, request.model);
        let task = tokio::spawn(run_channel(url, setup, remote));
        handle.with_task(task)
    }
}

pub fn setup_message(request: &ConnectRequest) -> ClientMessage {
    let system_instruction = if request.system_instruction.trim().is_empty() {
        None
    } else {
        Some(Content::system(request.system_instruction.clone()))
    };
    ClientMessage::Setup(Setup {
        model: model_resource(&request.model),
        generation_config: GenerationConfig {
            response_modalities: vec![request.response_modality.clone()],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: request.voice_name.clone(),
                    },
                },
            }),
        },
        system_instruction,
    })
}

/// Translate one server message into channel events. `opened` tracks whether
/// setup was already acknowledged so `Opened` is reported once.
pub fn server_events(message: ServerMessage, opened: &mut bool) -> Vec<ChannelEvent> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() && !*opened {
        *opened = true;
        events.push(ChannelEvent::Opened);
    }

    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(ChannelEvent::Control(ControlEvent::Interrupted));
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .map(ChannelEvent::Audio),
            );
        }
        if content.turn_complete {
            events.push(ChannelEvent::Control(ControlEvent::TurnComplete));
        }
    }

    if message.go_away.is_some() {
        events.push(ChannelEvent::Control(ControlEvent::GoAway));
    }

    events
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> Option<String> {
    let frame = frame?;
    if frame.code == CloseCode::Normal && frame.reason.is_empty() {
        return None;
    }
    Some(format!("{} {}", u16::from(frame.code), frame.reason).trim().to_string())
}

async fn run_channel(url: String, setup: ClientMessage, mut remote: RemoteEnd) {
    let outcome = drive_channel(&url, &setup, &mut remote).await;
    let event = match outcome {
        Ok(reason) => ChannelEvent::Closed(reason),
        Err(e) => ChannelEvent::Error(format!("{:#}", e)),
    };
    debug!("Realtime channel finished: {:?}", event);
    remote.emit(event);
}

async fn drive_channel(
    url: &str,
    setup: &ClientMessage,
    remote: &mut RemoteEnd,
) -> Result<Option<String>> {
    let input = remote.input.clone();
    let events = remote.events.clone();
    let shutdown = &mut remote.shutdown;

    // A close requested before the socket is up must not reach the remote.
    let socket = tokio::select! {
        biased;
        _ = &mut *shutdown => {
            debug!("Channel closed before connecting");
            return Ok(None);
        }
        connected = tokio_tungstenite::connect_async(url) => {
            connected.context("connecting to realtime endpoint")?.0
        }
    };
    let (mut sink, mut stream) = socket.split();

    let setup_text = serde_json::to_string(setup)?;
    tokio::select! {
        biased;
        _ = &mut *shutdown => {
            let _ = sink.send(Message::Close(None)).await;
            return Ok(None);
        }
        sent = sink.send(Message::Text(setup_text)) => {
            sent.context("sending session setup")?;
        }
    }

    let mut opened = false;

    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(None);
            }
            frame = input.pop(), if opened => {
                let Some(payload) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(None);
                };
                let message = ClientMessage::RealtimeInput(RealtimeInput {
                    media_chunks: vec![payload],
                });
                sink.send(Message::Text(serde_json::to_string(&message)?))
                    .await
                    .context("sending microphone audio")?;
            }
            message = stream.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => return Ok(close_reason(frame)),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e).context("realtime socket failed"),
                    None => return Ok(Some("connection lost".to_string())),
                };

                let parsed: ServerMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("Ignoring malformed server message: {}", e);
                        continue;
                    }
                };
                for event in server_events(parsed, &mut opened) {
                    trace!("<- {}", event_label(&event));
                    if events.send(event).is_err() {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(None);
                    }
                }
            }
        }
    }
}

fn event_label(event: &ChannelEvent) -> &'static str {
    match event {
        ChannelEvent::Opened => "opened",
        ChannelEvent::Audio(_) => "audio",
        ChannelEvent::Control(ControlEvent::TurnComplete) => "turn_complete",
        ChannelEvent::Control(ControlEvent::Interrupted) => "interrupted",
        ChannelEvent::Control(ControlEvent::GoAway) => "go_away",
        ChannelEvent::Closed(_) => "closed",
        ChannelEvent::Error(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "native-audio".to_string(),
            response_modality: "AUDIO".to_string(),
            voice_name: "Kore".to_string(),
            system_instruction: "Seja curto.".to_string(),
        }
    }

    fn parse(raw: &str) -> ServerMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_missing_key_is_rejected() {
        assert!(matches!(
            LiveConnector::new(DEFAULT_LIVE_ENDPOINT, "  "),
            Err(VoiceError::MissingApiKey)
        ));
    }

    #[test]
    fn test_url_carries_key() {
        let connector = LiveConnector::new("wss://example.test/ws", "abc").unwrap();
        assert_eq!(connector.url(), "wss://example.test/ws?key=abc");

        let connector = LiveConnector::new("wss://example.test/ws?alt=1", "abc").unwrap();
        assert_eq!(connector.url(), "wss://example.test/ws?alt=1&key=abc");
    }

    #[test]
    fn test_setup_carries_request() {
        let value = serde_json::to_value(setup_message(&request())).unwrap();
        assert_eq!(value["setup"]["model"], "models/native-audio");
        assert_eq!(value["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(value["setup"]["systemInstruction"]["parts"][0]["text"], "Seja curto.");
    }

    #[test]
    fn test_setup_complete_opens_once() {
        let mut opened = false;
        assert_eq!(
            server_events(parse(r#"{"setupComplete": {}}"#), &mut opened),
            vec![ChannelEvent::Opened]
        );
        assert!(opened);
        assert!(server_events(parse(r#"{"setupComplete": {}}"#), &mut opened).is_empty());
    }

    #[test]
    fn test_audio_parts_forwarded_in_order() {
        let mut opened = true;
        let events = server_events(
            parse(
                r#"{"serverContent": {"modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQA="}}
                ]}, "turnComplete": true}}"#,
            ),
            &mut opened,
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ChannelEvent::Audio(p) if p.data == "AAA="));
        assert!(matches!(&events[1], ChannelEvent::Audio(p) if p.data == "AQA="));
        assert_eq!(events[2], ChannelEvent::Control(ControlEvent::TurnComplete));
    }

    #[test]
    fn test_interrupt_and_go_away() {
        let mut opened = true;
        let events = server_events(
            parse(r#"{"serverContent": {"interrupted": true}, "goAway": {"timeLeft": "1s"}}"#),
            &mut opened,
        );
        assert_eq!(
            events,
            vec![
                ChannelEvent::Control(ControlEvent::Interrupted),
                ChannelEvent::Control(ControlEvent::GoAway)
            ]
        );
    }

    async fn local_endpoint() -> (TcpListener, LiveConnector) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = LiveConnector::new(format!("ws://{}", addr), "test-key").unwrap();
        (listener, connector)
    }

    #[tokio::test]
    async fn test_open_sends_setup_first() {
        let (listener, connector) = local_endpoint().await;
        let handle = connector.open(&request(), 4);

        let (tcp, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let first = timeout(Duration::from_secs(5), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(value["setup"]["model"], "models/native-audio");
        drop(handle);
    }

    #[tokio::test]
    async fn test_close_while_connecting_never_reaches_remote() {
        let (listener, connector) = local_endpoint().await;
        let mut handle = connector.open(&request(), 4);
        handle.close();
        drop(handle);

        let accepted = timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(accepted.is_err(), "transport connected after the channel was closed");
    }

    #[test]
    fn test_close_reason() {
        assert_eq!(close_reason(None), None);
        assert_eq!(
            close_reason(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: Cow::Borrowed(""),
            })),
            None
        );
        assert_eq!(
            close_reason(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: Cow::Borrowed("quota exceeded"),
            })),
            Some("1008 quota exceeded".to_string())
        );
    }
}
