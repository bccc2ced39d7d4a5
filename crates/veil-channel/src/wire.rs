use serde::{Deserialize, Serialize};

use veil_core::errors::ExchangeError;
use veil_core::message::Message;

/// One unit of streamed ciphertext: a fresh nonce and the sealed bytes,
/// both hex-encoded, one JSON object per line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub nonce: String,
    pub ciphertext: String,
}

impl Frame {
    pub fn encode(nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        }
    }

    /// Parse a single non-blank line of the response stream.
    pub fn parse_line(line: &str) -> Result<Self, ExchangeError> {
        serde_json::from_str(line)
            .map_err(|_| ExchangeError::StreamCorruption("frame is not valid JSON".into()))
    }

    /// Decode the hex fields back into (nonce, ciphertext) bytes.
    pub fn decode(&self) -> Result<(Vec<u8>, Vec<u8>), ExchangeError> {
        let nonce = hex::decode(&self.nonce)
            .map_err(|_| ExchangeError::StreamCorruption("invalid hex in frame nonce".into()))?;
        let ciphertext = hex::decode(&self.ciphertext).map_err(|_| {
            ExchangeError::StreamCorruption("invalid hex in frame ciphertext".into())
        })?;
        Ok((nonce, ciphertext))
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The encrypted request sent to the service: the client's ephemeral public
/// key so the service can derive the matching symmetric key, plus one sealed
/// payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub client_pub: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl RequestEnvelope {
    pub fn new(client_public: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            client_pub: hex::encode(client_public),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        }
    }
}

/// Plaintext of an exchange request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangePayload {
    pub prompt: String,
    pub context: ContextPayload,
    pub params: GenerationParams,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextPayload {
    pub summary: String,
    pub recent: Vec<Message>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 256,
        }
    }
}

/// Plaintext of a summarization request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummarizePayload {
    pub summary: String,
    pub recent: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_encode_decode_roundtrip() {
        let frame = Frame::encode(&[0x00, 0x01, 0xff], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(frame.nonce, "0001ff");
        assert_eq!(frame.ciphertext, "deadbeef");
        let (nonce, ct) = frame.decode().unwrap();
        assert_eq!(nonce, vec![0x00, 0x01, 0xff]);
        assert_eq!(ct, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn frame_line_roundtrip() {
        let frame = Frame::encode(&[1, 2, 3], &[4, 5, 6]);
        let line = frame.to_line();
        let parsed = Frame::parse_line(&line).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn malformed_line_rejected() {
        let err = Frame::parse_line("not json").unwrap_err();
        assert!(err.is_frame_failure());
    }

    #[test]
    fn bad_hex_rejected() {
        let frame = Frame {
            nonce: "zz".into(),
            ciphertext: "00".into(),
        };
        let err = frame.decode().unwrap_err();
        assert!(err.is_frame_failure());
    }

    #[test]
    fn envelope_hex_encodes_all_fields() {
        let env = RequestEnvelope::new(&[0xab; 32], &[0x01; 12], &[0xcd, 0xef]);
        assert_eq!(env.client_pub.len(), 64);
        assert_eq!(env.nonce, "01".repeat(12));
        assert_eq!(env.ciphertext, "cdef");
    }

    #[test]
    fn exchange_payload_wire_shape() {
        let payload = ExchangePayload {
            prompt: "Hello".into(),
            context: ContextPayload {
                summary: String::new(),
                recent: vec![veil_core::Message::user("Hello")],
            },
            params: GenerationParams::default(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["prompt"], "Hello");
        assert_eq!(json["context"]["recent"][0]["role"], "user");
        assert_eq!(json["params"]["max_tokens"], 256);
    }

    #[test]
    fn default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 256);
    }
}
