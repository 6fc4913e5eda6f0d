//! Typed payloads for catalogued packets.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Payload;

/// Decodes an untyped payload map into a typed packet body.
///
/// # Errors
///
/// Returns the `serde_json` error when required fields are missing or have
/// the wrong type.
pub fn decode_payload<T: DeserializeOwned>(data: Payload) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(data))
}

/// Account credentials, carried by `SignIn` and echoed back under `SignUp`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
