//! JSON wire format of the live bidirectional session

use crate::transport::{InboundEvent, SessionSetup, ToolCall, WireMessage};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage {
    Setup(SetupPayload),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Enabled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Enabled>,
}

#[derive(Serialize)]
struct Enabled {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponse {
    function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize)]
struct FunctionResponse {
    id: String,
    name: String,
    response: Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallPayload>,
    go_away: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    turn_complete: bool,
    interrupted: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<ServerPart>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerPart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Transcription {
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ToolCallPayload {
    function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

pub fn encode_setup(setup: &SessionSetup) -> Result<String> {
    let payload = SetupPayload {
        model: setup.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO"],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: setup.voice.clone(),
                    },
                },
            },
        },
        system_instruction: Content {
            parts: vec![TextPart {
                text: setup.system_instruction.clone(),
            }],
        },
        tools: vec![serde_json::json!({ "functionDeclarations": setup.function_declarations })],
        input_audio_transcription: setup.transcribe_input.then_some(Enabled {}),
        output_audio_transcription: setup.transcribe_output.then_some(Enabled {}),
    };
    Ok(serde_json::to_string(&ClientMessage::Setup(payload))?)
}

pub fn encode_client(message: &WireMessage) -> Result<String> {
    let message = match message {
        WireMessage::Audio(frame) => ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: frame.mime_type(),
                data: frame.to_transport(),
            }),
            text: None,
        }),
        WireMessage::Text(text) => ClientMessage::RealtimeInput(RealtimeInput {
            audio: None,
            text: Some(text.clone()),
        }),
        WireMessage::ToolResult(result) => ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: result.id.clone(),
                name: result.name.clone(),
                response: result.response.clone(),
            }],
        }),
    };
    Ok(serde_json::to_string(&message)?)
}

/// Split one server message into events.
///
/// Order within a message: user transcript, model transcript, turn complete,
/// tool calls, audio, interruption.
pub fn decode_server(text: &str) -> Result<Vec<InboundEvent>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(InboundEvent::Opened);
    }

    if let Some(go_away) = &message.go_away {
        warn!("Server is going away: {}", go_away);
    }

    let content = message.server_content.unwrap_or_default();

    if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
        events.push(InboundEvent::InputTranscript(t.text));
    }
    if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
        events.push(InboundEvent::OutputTranscript(t.text));
    }
    if content.turn_complete {
        events.push(InboundEvent::TurnComplete);
    }

    if let Some(payload) = message.tool_call {
        for call in payload.function_calls {
            let id = call
                .id
                .unwrap_or_else(|| format!("tc-{}", Uuid::new_v4()));
            events.push(InboundEvent::ToolCall(ToolCall {
                id,
                name: call.name,
                args: call.args,
            }));
        }
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            match part.inline_data {
                Some(blob) if blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/") => {
                    events.push(InboundEvent::Audio(blob.data));
                }
                Some(blob) => debug!("Ignoring inline data of type {}", blob.mime_type),
                None => {}
            }
        }
    }

    if content.interrupted {
        events.push(InboundEvent::Interrupted);
    }

    Ok(events)
}
