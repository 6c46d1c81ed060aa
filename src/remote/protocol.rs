//! JSON messages of the Live `BidiGenerateContent` WebSocket protocol.
//!
//! Only the subset the agent speaks is modelled: the setup handshake,
//! realtime audio input, and server content carrying audio, turn boundaries
//! and interruptions.  Unknown fields are ignored on input.

use serde::{Deserialize, Serialize};

use super::session::InboundEvent;
use crate::audio::{transport_decode, transport_encode, AudioFrame};
use crate::config::SessionConfig;

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Top-level client message.  Serialises as `{"setup": {...}}` or
/// `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub realtime_input_config: RealtimeInputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
    pub activity_handling: String,
    pub turn_coverage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    pub start_of_speech_sensitivity: String,
    pub end_of_speech_sensitivity: String,
    pub silence_duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_chunks: Vec<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// The opening handshake for `config`.  Responses are audio only.
    pub fn setup(config: &SessionConfig) -> Self {
        ClientMessage::Setup(Setup {
            model: config.model_resource(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection {
                    start_of_speech_sensitivity: config.start_sensitivity.start_wire_name().to_string(),
                    end_of_speech_sensitivity: config.end_sensitivity.end_wire_name().to_string(),
                    silence_duration_ms: config.silence_duration_ms,
                },
                activity_handling: config.activity_handling.wire_name().to_string(),
                turn_coverage: config.turn_coverage.wire_name().to_string(),
            },
        })
    }

    /// One captured frame as a realtime media chunk.
    pub fn audio(frame: &AudioFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: frame.mime_type(),
                data: transport_encode(&frame.to_pcm_bytes()),
            }],
            audio_stream_end: None,
        })
    }

    /// Tells the server no more audio follows.
    pub fn audio_stream_end() -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: Vec::new(),
            audio_stream_end: Some(true),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into session events: `Interrupted` first, then each inline
    /// audio part in order, then `TurnComplete`.
    ///
    /// Parts whose payload is not valid base64 are logged and skipped.
    pub fn into_events(self) -> Vec<InboundEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }

        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            if let Some(text) = part.text.as_deref() {
                log::debug!("remote: model text part ({} chars)", text.len());
            }
            let Some(inline) = part.inline_data else {
                continue;
            };
            match transport_decode(&inline.data) {
                Ok(bytes) => events.push(InboundEvent::AudioChunk {
                    bytes,
                    mime_type: inline.mime_type,
                }),
                Err(e) => log::warn!("remote: skipping audio part: {e}"),
            }
        }

        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
        events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActivityHandling, Sensitivity};
    use serde_json::json;

    #[test]
    fn setup_message_shape() {
        let config = SessionConfig {
            system_instruction: "be brief".into(),
            end_sensitivity: Sensitivity::Low,
            activity_handling: ActivityHandling::NoInterruption,
            ..SessionConfig::default()
        };
        let value: serde_json::Value =
            serde_json::from_str(&ClientMessage::setup(&config).to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-09-2025",
                    "generationConfig": { "responseModalities": ["AUDIO"] },
                    "systemInstruction": { "parts": [{ "text": "be brief" }] },
                    "realtimeInputConfig": {
                        "automaticActivityDetection": {
                            "startOfSpeechSensitivity": "START_SENSITIVITY_HIGH",
                            "endOfSpeechSensitivity": "END_SENSITIVITY_LOW",
                            "silenceDurationMs": 200
                        },
                        "activityHandling": "NO_INTERRUPTION",
                        "turnCoverage": "TURN_INCLUDES_ONLY_ACTIVITY"
                    }
                }
            })
        );
    }

    #[test]
    fn audio_frame_message_shape() {
        let frame = AudioFrame::new(vec![1, -1], 16_000);
        let value: serde_json::Value =
            serde_json::from_str(&ClientMessage::audio(&frame).to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AQD//w==" }]
                }
            })
        );
    }

    #[test]
    fn stream_end_message_shape() {
        assert_eq!(
            ClientMessage::audio_stream_end().to_json().unwrap(),
            r#"{"realtimeInput":{"audioStreamEnd":true}}"#
        );
    }

    #[test]
    fn setup_complete_is_detected() {
        let msg = ServerMessage::parse(br#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn content_flattens_in_order() {
        let raw = json!({
            "serverContent": {
                "interrupted": true,
                "turnComplete": true,
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAE=" } },
                    { "text": "thinking" },
                    { "inlineData": { "data": "AgM=" } }
                ]}
            }
        })
        .to_string();

        let events = ServerMessage::parse(raw.as_bytes()).unwrap().into_events();
        assert_eq!(
            events,
            vec![
                InboundEvent::Interrupted,
                InboundEvent::AudioChunk {
                    bytes: vec![0, 1],
                    mime_type: Some("audio/pcm;rate=24000".into())
                },
                InboundEvent::AudioChunk {
                    bytes: vec![2, 3],
                    mime_type: None
                },
                InboundEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn bad_base64_part_is_skipped() {
        let raw = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm", "data": "***" } },
                { "inlineData": { "mimeType": "audio/pcm", "data": "AAE=" } }
            ]}}
        })
        .to_string();

        let events = ServerMessage::parse(raw.as_bytes()).unwrap().into_events();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unknown_messages_parse_to_nothing() {
        let msg = ServerMessage::parse(br#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap();
        assert!(!msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn go_away_is_parsed() {
        let msg = ServerMessage::parse(br#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(msg.go_away.and_then(|g| g.time_left).as_deref(), Some("10s"));
    }
}
