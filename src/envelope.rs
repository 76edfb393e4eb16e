// Envelope - the RPC wire message.
//
// Two discriminated kinds share a header. `arguments` / `Success` payloads
// are opaque to the codec: the bytes a stub hands in are placed verbatim in
// the envelope, never re-serialized as a nested string.

use crate::error::RuntimeError;
use crate::ids::{Aid, CallId, U128};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENVELOPE_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub call_id: CallId,
    pub sender: Option<Aid>,
    pub recipient: Aid,
}

impl Header {
    pub fn new(call_id: CallId, recipient: Aid, sender: Option<Aid>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            call_id,
            sender,
            recipient,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invocation {
    pub header: Header,
    pub target: String,
    #[serde(with = "serde_bytes")]
    pub arguments: Vec<u8>,
}

/// The three shapes a `remote_call` can resolve to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CallResult {
    Success(#[serde(with = "serde_bytes")] Vec<u8>),
    Void,
    Failure(RuntimeError),
}


#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub header: Header,
    pub result: CallResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Envelope {
    Invocation(Invocation),
    Response(Response),
}

impl Envelope {
    pub fn header(&self) -> &Header {
        match self {
            Envelope::Invocation(i) => &i.header,
            Envelope::Response(r) => &r.header,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.header().call_id
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl From<CodecError> for RuntimeError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnsupportedVersion(v) => {
                RuntimeError::DecodeFailed(format!("unsupported envelope version {v}"))
            }
            CodecError::Malformed(msg) => RuntimeError::DecodeFailed(msg),
        }
    }
}

/// Transport-neutral codec: any self-describing tagged encoding that
/// preserves the envelope's fields is acceptable. `postcard` is used here,
/// matching the rest of the wire formats in this crate's lineage.
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, RuntimeError> {
        postcard::to_allocvec(envelope)
            .map_err(|e| RuntimeError::EncodeFailed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Envelope, RuntimeError> {
        let envelope: Envelope = postcard::from_bytes(bytes)
            .map_err(|e| RuntimeError::DecodeFailed(e.to_string()))?;

        let version = envelope.header().version;
        if version != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedVersion(version).into());
        }

        Ok(envelope)
    }
}
