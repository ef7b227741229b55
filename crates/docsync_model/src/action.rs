//! Actions and their signing context.

use crate::error::ModelResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single signature over an action.
///
/// The five fields mirror what a signer commits to: when it signed, with
/// which key, over which action, on top of which state, and the resulting
/// signature bytes in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// UTC timestamp in milliseconds at signing time.
    pub timestamp_utc_ms: u64,
    /// Public key of the signer.
    pub signer_key: String,
    /// Hash of the signed action.
    pub action_hash: String,
    /// Hash of the document state the signer observed.
    pub prev_state_hash: String,
    /// Signature bytes, hex encoded.
    pub signature_hex: String,
}

/// Identity of the signer plus its signatures.
///
/// A signer context with an **empty** signature list is an explicit
/// verification failure, not "unsigned"; absence of the whole context is
/// what means unsigned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signer {
    /// User identity, if any.
    pub user: Option<String>,
    /// Application identity, if any.
    pub app: Option<String>,
    /// Signatures produced by this signer.
    pub signatures: Vec<Signature>,
}

/// Optional context attached to an action at submission time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionContext {
    /// Index of the operation the submitter observed last.
    pub prev_op_index: Option<u64>,
    /// Hash of the operation the submitter observed last.
    pub prev_op_hash: Option<String>,
    /// Submission nonce.
    pub nonce: Option<String>,
    /// Signing context.
    pub signer: Option<Signer>,
}

/// A submitted intent against a document scope.
///
/// Actions are immutable once created. The `input` payload is opaque to the
/// engine; only the reducer interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique action id.
    pub id: String,
    /// Action type, interpreted by the reducer.
    #[serde(rename = "type")]
    pub action_type: String,
    /// UTC timestamp in milliseconds at creation time.
    pub timestamp_utc_ms: u64,
    /// Opaque payload.
    pub input: serde_json::Value,
    /// Scope this action targets.
    pub scope: String,
    /// Attachment references, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Submission context, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ActionContext>,
}

impl Action {
    /// Creates a new action with a fresh id and the current timestamp.
    pub fn new(
        action_type: impl Into<String>,
        input: serde_json::Value,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            timestamp_utc_ms: now_utc_ms(),
            input,
            scope: scope.into(),
            attachments: Vec::new(),
            context: None,
        }
    }

    /// Sets the submission context.
    pub fn with_context(mut self, context: ActionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp_utc_ms: u64) -> Self {
        self.timestamp_utc_ms = timestamp_utc_ms;
        self
    }

    /// Computes the canonical hash of this action.
    ///
    /// The hash covers `(type, input, scope, timestamp)`. Serialization of
    /// JSON objects is key-ordered, so the hash is deterministic for equal
    /// payloads.
    pub fn hash(&self) -> ModelResult<String> {
        let canonical = serde_json::to_vec(&(
            &self.action_type,
            &self.input,
            &self.scope,
            self.timestamp_utc_ms,
        ))?;
        let digest = Sha256::digest(&canonical);
        Ok(hex::encode(digest))
    }

    /// Returns the signer context, if one was attached.
    pub fn signer(&self) -> Option<&Signer> {
        self.context.as_ref().and_then(|c| c.signer.as_ref())
    }
}

/// Current UTC time in milliseconds.
pub(crate) fn now_utc_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
