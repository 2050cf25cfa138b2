//! The JSON body of a task message: `[args, kwargs, embed]`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Workflow fields reserved by the protocol; always null here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedOptions {
    #[serde(default)]
    pub callbacks: Option<Value>,
    #[serde(default)]
    pub chain: Option<Value>,
    #[serde(default)]
    pub chord: Option<Value>,
    #[serde(default)]
    pub errbacks: Option<Value>,
}

/// Serialized as a 3-element JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload(pub Vec<Value>, pub Map<String, Value>, pub EmbedOptions);

impl TaskPayload {
    pub fn new(args: Vec<Value>) -> Self {
        Self(args, Map::new(), EmbedOptions::default())
    }

    pub fn args(&self) -> &[Value] {
        &self.0
    }

    pub fn into_args(self) -> Vec<Value> {
        self.0
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.1
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// `(a, b, c)` rendering of the positional args, used in the `argsrepr` header.
    pub fn args_repr(&self) -> String {
        let rendered: Vec<String> = self.0.iter().map(Value::to_string).collect();
        format!("({})", rendered.join(", "))
    }
}
