//! Tool registry and built-in tools.
//!
//! The model may request function calls mid-conversation. Handlers are
//! registered by name; the controller resolves the call-id to name mapping
//! from output-item announcements and dispatches here once arguments are
//! complete. Handler output is sent back as a `function_call_output` item.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::info;

use crate::core::error::ToolError;
use crate::core::events::ToolDef;

/// Boxed async tool handler. Takes parsed JSON arguments, returns the output
/// string sent back to the model.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> + Send + Sync>;

/// Registry of callable tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, (ToolDef, ToolHandler)>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F, Fut>(&mut self, def: ToolDef, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let name = def.name.clone();
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(name, (def, handler));
    }

    /// Wire definitions for `session.update`.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.handlers.values().map(|(def, _)| def.clone()).collect()
    }

    /// Dispatch a completed call. `arguments` is the raw JSON string from
    /// the wire; malformed JSON is an invalid-arguments error, not a panic.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let (_, handler) = self
            .handlers
            .get(name)
            .ok_or_else(|| ToolError::Unregistered(name.to_string()))?;
        let args: Value = serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        handler(args).await
    }

    /// Whether a handler exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

// =============================================================================
// Built-in tools
// =============================================================================

/// Contact details collected from the visitor during a conversation.
/// Last write wins for each field.
#[derive(Clone, Default)]
pub struct VisitorProfile {
    fields: Arc<DashMap<String, String>>,
}

impl VisitorProfile {
    /// Empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, key: &str, value: String) {
        self.fields.insert(key.to_string(), value);
    }

    /// Read a collected field.
    pub fn get(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(|v| v.clone())
    }
}

fn string_arg(args: &Value, key: &str, tool: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            name: tool.to_string(),
            reason: format!("missing or empty '{key}'"),
        })
}

fn profile_tool_def(name: &str, description: &str, field: &str) -> ToolDef {
    ToolDef {
        tool_type: "function".to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        parameters: Some(json!({
            "type": "object",
            "properties": {
                field: { "type": "string" }
            },
            "required": [field]
        })),
    }
}

/// Register the built-in tool set: current time plus visitor contact capture.
pub fn register_builtins(registry: &mut ToolRegistry, profile: VisitorProfile) {
    registry.register(
        ToolDef {
            tool_type: "function".to_string(),
            name: "get_current_time".to_string(),
            description: Some("Get the current date and time".to_string()),
            parameters: Some(json!({ "type": "object", "properties": {} })),
        },
        |_args| async {
            let now = Utc::now();
            Ok(json!({ "time": now.to_rfc3339() }).to_string())
        },
    );

    let p = profile.clone();
    registry.register(
        profile_tool_def(
            "save_visitor_name",
            "Save the visitor's name when they introduce themselves",
            "name",
        ),
        move |args| {
            let p = p.clone();
            async move {
                let name = string_arg(&args, "name", "save_visitor_name")?;
                info!(visitor_name = %name, "visitor name captured");
                p.set("name", name);
                Ok(json!({ "saved": true }).to_string())
            }
        },
    );

    let p = profile.clone();
    registry.register(
        profile_tool_def(
            "save_visitor_email",
            "Save the visitor's email address when they share it",
            "email",
        ),
        move |args| {
            let p = p.clone();
            async move {
                let email = string_arg(&args, "email", "save_visitor_email")?;
                if !email.contains('@') {
                    return Err(ToolError::InvalidArguments {
                        name: "save_visitor_email".to_string(),
                        reason: "not an email address".to_string(),
                    });
                }
                p.set("email", email);
                Ok(json!({ "saved": true }).to_string())
            }
        },
    );

    let p = profile;
    registry.register(
        profile_tool_def(
            "save_visitor_phone",
            "Save the visitor's phone number when they share it",
            "phone",
        ),
        move |args| {
            let p = p.clone();
            async move {
                let phone = string_arg(&args, "phone", "save_visitor_phone")?;
                p.set("phone", phone);
                Ok(json!({ "saved": true }).to_string())
            }
        },
    );
}
