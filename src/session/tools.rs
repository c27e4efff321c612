//! Function tools offered to the remote model and their dispatch onto the
//! memory store.

use crate::memory::MemoryStore;
use crate::transport::{ToolCall, ToolResult};
use crate::{Result, VoiceError};
use serde_json::{json, Value};

pub const SAVE_MEMORY: &str = "save_memory";
pub const GET_MOOD_SNAPSHOT: &str = "get_mood_snapshot";

pub const PROFILE_SYNCHRONIZED: &str = "Profile synchronized.";
pub const NO_MOOD_HISTORY: &str = "No mood history recorded yet.";

/// Query used to pull the user's profile into the system instruction
pub const PROFILE_QUERY: &str = "User name age location bio";

const NEW_USER_MARKER: &str = "New user detected. Initiation protocol active.";

pub fn declarations() -> Vec<Value> {
    vec![
        json!({
            "name": SAVE_MEMORY,
            "description": "Saves emotional patterns, personal milestones, or life goals to long-term memory. For user profile details always use entity \"User\" with relation \"name\", \"age\", \"location\" or \"bio\".",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "entity": {
                        "type": "STRING",
                        "description": "The subject of the memory. Use \"User\" for core profile details."
                    },
                    "relation": {
                        "type": "STRING",
                        "description": "The attribute or connection (e.g. \"name\", \"age\", \"feels\", \"enjoys\", \"struggles with\")."
                    },
                    "value": {
                        "type": "STRING",
                        "description": "The specific factual or emotional detail to remember."
                    }
                },
                "required": ["entity", "relation", "value"]
            }
        }),
        json!({
            "name": GET_MOOD_SNAPSHOT,
            "description": "Retrieves a summary of the user's documented emotional trends to provide reflective feedback.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "period": {
                        "type": "STRING",
                        "description": "Time range (e.g. \"last week\", \"today\")"
                    }
                }
            }
        }),
    ]
}

/// Profile lines for the system instruction, possibly empty
pub fn identity_memory(store: &dyn MemoryStore) -> Result<String> {
    store
        .retrieve_context(PROFILE_QUERY)
        .map_err(|e| VoiceError::ToolDispatchError(format!("Failed to load identity memory: {}", e)))
}

/// Persona prompt with what is known about the user
pub fn system_instruction(voice: &str, identity: &str) -> String {
    let identity = if identity.trim().is_empty() {
        NEW_USER_MARKER
    } else {
        identity
    };

    format!(
        r#"You are Thursday, a world-class AI companion and emotional mentor.
Your voice ({voice}) is warm, expressive, and profoundly human.

MISSION AT STARTUP:
If the user's name is not in your memory, your first priority is to introduce yourself warmly and ask for their name, age, location, and a little about themselves.

PROFILE BUILDING:
- Once the user provides info, use the '{SAVE_MEMORY}' tool to store it.
- Entity: "User", Relation: "name" | "age" | "location" | "bio", Value: what they said

COACHING STYLE:
- Be empathetic, encouraging, and highly intelligent.
- Listen deeply to their bio and validate their experiences.
- Once you have their profile, continue as their assistant and motivator.

IDENTITY MEMORY:
{identity}"#
    )
}

/// Run one tool call. Always yields exactly one result for `call.id`.
pub fn dispatch(call: &ToolCall, store: &dyn MemoryStore) -> ToolResult {
    match run(call, store) {
        Ok(result) => ToolResult::success(call, result),
        Err(e) => ToolResult::failure(call, e),
    }
}

fn run(call: &ToolCall, store: &dyn MemoryStore) -> Result<Value> {
    match call.name.as_str() {
        SAVE_MEMORY => {
            let entity = required_arg(call, "entity")?;
            let relation = required_arg(call, "relation")?;
            let value = required_arg(call, "value")?;
            store
                .add_memory(entity, relation, value)
                .map_err(|e| VoiceError::ToolDispatchError(e.to_string()))?;
            Ok(Value::from(PROFILE_SYNCHRONIZED))
        }
        GET_MOOD_SNAPSHOT => {
            let query = match call.arg_str("period") {
                Some(period) => format!("mood feels {}", period),
                None => "mood feels".to_string(),
            };
            let context = store
                .retrieve_context(&query)
                .map_err(|e| VoiceError::ToolDispatchError(e.to_string()))?;
            if context.trim().is_empty() {
                Ok(Value::from(NO_MOOD_HISTORY))
            } else {
                Ok(Value::from(context))
            }
        }
        other => Err(VoiceError::ToolDispatchError(format!("Unknown tool: {}", other))),
    }
}

fn required_arg<'a>(call: &'a ToolCall, name: &str) -> Result<&'a str> {
    call.arg_str(name).ok_or_else(|| {
        VoiceError::ToolDispatchError(format!("{} is missing string argument '{}'", call.name, name))
    })
}
