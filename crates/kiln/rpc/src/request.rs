use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON-RPC request object, a method call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMethodCall {
    /// The version of the protocol
    pub jsonrpc: Version,
    /// The name of the method to execute
    pub method: String,
    /// An array or object containing the parameters to be passed to the function.
    #[serde(default = "no_params")]
    pub params: serde_json::Value,
    /// The identifier for this request issued by the client,
    pub id: Id,
}

impl RpcMethodCall {
    pub fn new(id: Id, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { jsonrpc: Version::V2, method: method.into(), params, id }
    }

    pub fn id(&self) -> Id {
        self.id.clone()
    }

    /// Returns the `{"method": .., "params": ..}` object the node dispatches on.
    pub fn to_dispatch_value(&self) -> serde_json::Value {
        serde_json::json!({ "method": self.method, "params": self.params })
    }
}

fn no_params() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

/// Represents the version of the RPC protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "2.0")]
    V2,
}

/// Request Id
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// numeric id
    Number(i64),
    /// String id
    String(String),
    /// null id
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(num) => write!(f, "{num}"),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}
