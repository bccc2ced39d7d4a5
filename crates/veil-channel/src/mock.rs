//! In-process stand-in for the remote service. Holds a real curve key pair
//! and performs the genuine server-side derivation, so pipeline tests
//! exercise the actual cryptography with no network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use veil_core::errors::ExchangeError;

use crate::channel;
use crate::handshake::{self, SymmetricKey, KEY_LEN};
use crate::transport::{ByteStream, Transport};
use crate::wire::{Frame, RequestEnvelope};

/// The service side of the protocol: a static key pair plus the matching
/// key derivation, envelope opening, and frame sealing.
pub struct MockService {
    secret: StaticSecret,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(PublicKey::from(&self.secret).as_bytes())
    }

    /// Server-side half of the handshake: derive the per-exchange key from
    /// the client's ephemeral public key.
    pub fn derive_key(&self, client_pub_hex: &str) -> Result<SymmetricKey, ExchangeError> {
        let raw = hex::decode(client_pub_hex)
            .map_err(|_| ExchangeError::KeyAgreement("client key is not valid hex".into()))?;
        let point: [u8; KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ExchangeError::KeyAgreement(format!("client key must be {KEY_LEN} bytes")))?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(point));
        if !shared.was_contributory() {
            return Err(ExchangeError::KeyAgreement(
                "client key is a non-contributory point".into(),
            ));
        }
        handshake::expand(shared.as_bytes())
    }

    /// Decrypt a request envelope, returning the derived key (for sealing
    /// the response) and the plaintext payload bytes.
    pub fn open_envelope(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<(SymmetricKey, Vec<u8>), ExchangeError> {
        let key = self.derive_key(&envelope.client_pub)?;
        let nonce = hex::decode(&envelope.nonce).map_err(|_| ExchangeError::Decrypt)?;
        let ciphertext = hex::decode(&envelope.ciphertext).map_err(|_| ExchangeError::Decrypt)?;
        let plaintext = channel::open(&key, &nonce, &ciphertext)?;
        Ok((key, plaintext))
    }

    /// Seal one response fragment as a newline-terminated frame line.
    pub fn frame_line(&self, key: &SymmetricKey, fragment: &str) -> Result<String, ExchangeError> {
        let (nonce, ciphertext) = channel::seal(key, fragment.as_bytes())?;
        Ok(format!("{}\n", Frame::encode(&nonce, &ciphertext).to_line()))
    }

    /// Seal a summarization reply as a single frame.
    pub fn reply_frame(&self, key: &SymmetricKey, text: &str) -> Result<Frame, ExchangeError> {
        let (nonce, ciphertext) = channel::seal(key, text.as_bytes())?;
        Ok(Frame::encode(&nonce, &ciphertext))
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

/// What the mock returns for one scripted exchange call.
pub enum MockExchange {
    /// Stream these fragments back, each as its own frame.
    Reply(Vec<String>),
    /// Fail the call itself.
    Fail(ExchangeError),
}

/// Scriptable transport backed by a [`MockService`]. Responses are consumed
/// in order; decrypted request payloads are recorded for assertions.
pub struct MockTransport {
    service: MockService,
    exchanges: Mutex<VecDeque<MockExchange>>,
    summaries: Mutex<VecDeque<Result<String, ExchangeError>>>,
    key_fetch_error: Mutex<Option<ExchangeError>>,
    corrupt_frame_at: Mutex<Option<usize>>,
    insert_blank_lines: AtomicBool,
    chunk_size: AtomicUsize,
    exchange_payloads: Mutex<Vec<serde_json::Value>>,
    summarize_payloads: Mutex<Vec<serde_json::Value>>,
    exchange_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            service: MockService::new(),
            exchanges: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            key_fetch_error: Mutex::new(None),
            corrupt_frame_at: Mutex::new(None),
            insert_blank_lines: AtomicBool::new(false),
            chunk_size: AtomicUsize::new(0),
            exchange_payloads: Mutex::new(Vec::new()),
            summarize_payloads: Mutex::new(Vec::new()),
            exchange_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
        }
    }

    pub fn service(&self) -> &MockService {
        &self.service
    }

    pub fn script_exchange(&self, fragments: &[&str]) {
        self.exchanges.lock().push_back(MockExchange::Reply(
            fragments.iter().map(|f| f.to_string()).collect(),
        ));
    }

    pub fn script_exchange_failure(&self, error: ExchangeError) {
        self.exchanges.lock().push_back(MockExchange::Fail(error));
    }

    pub fn script_summary(&self, text: &str) {
        self.summaries.lock().push_back(Ok(text.to_string()));
    }

    pub fn script_summary_failure(&self, error: ExchangeError) {
        self.summaries.lock().push_back(Err(error));
    }

    pub fn fail_key_fetch(&self, error: ExchangeError) {
        *self.key_fetch_error.lock() = Some(error);
    }

    /// Tamper with the ciphertext of the frame at this index on the next
    /// scripted reply.
    pub fn corrupt_frame_at(&self, index: usize) {
        *self.corrupt_frame_at.lock() = Some(index);
    }

    /// Interleave blank lines between frames on scripted replies.
    pub fn insert_blank_lines(&self, enabled: bool) {
        self.insert_blank_lines.store(enabled, Ordering::Relaxed);
    }

    /// Deliver the response body in chunks of this many bytes (0 = one
    /// chunk), to exercise line reassembly across chunk boundaries.
    pub fn set_chunk_size(&self, bytes: usize) {
        self.chunk_size.store(bytes, Ordering::Relaxed);
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::Relaxed)
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::Relaxed)
    }

    /// Decrypted exchange request payloads, in call order.
    pub fn exchange_payloads(&self) -> Vec<serde_json::Value> {
        self.exchange_payloads.lock().clone()
    }

    /// Decrypted summarization request payloads, in call order.
    pub fn summarize_payloads(&self) -> Vec<serde_json::Value> {
        self.summarize_payloads.lock().clone()
    }

    fn record_payload(
        sink: &Mutex<Vec<serde_json::Value>>,
        plaintext: &[u8],
    ) -> Result<(), ExchangeError> {
        let value = serde_json::from_slice(plaintext)
            .map_err(|_| ExchangeError::Network("request payload is not valid JSON".into()))?;
        sink.lock().push(value);
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Flip one hex digit of the ciphertext field in a serialized frame line.
fn tamper_line(line: &mut String) {
    if let Some(quote) = line.rfind('"') {
        let at = quote - 1;
        let mut bytes = std::mem::take(line).into_bytes();
        bytes[at] = if bytes[at] == b'a' { b'b' } else { b'a' };
        *line = String::from_utf8(bytes).unwrap_or_default();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_service_key(&self) -> Result<String, ExchangeError> {
        if let Some(error) = self.key_fetch_error.lock().clone() {
            return Err(error);
        }
        Ok(self.service.public_key_hex())
    }

    async fn open_stream(&self, envelope: &RequestEnvelope) -> Result<ByteStream, ExchangeError> {
        let _ = self.exchange_calls.fetch_add(1, Ordering::Relaxed);

        let script = self
            .exchanges
            .lock()
            .pop_front()
            .ok_or_else(|| ExchangeError::Network("no scripted exchange response".into()))?;

        let fragments = match script {
            MockExchange::Fail(error) => return Err(error),
            MockExchange::Reply(fragments) => fragments,
        };

        let (key, plaintext) = self.service.open_envelope(envelope)?;
        Self::record_payload(&self.exchange_payloads, &plaintext)?;

        let corrupt_at = self.corrupt_frame_at.lock().take();
        let blank_lines = self.insert_blank_lines.load(Ordering::Relaxed);

        let mut raw = String::new();
        for (i, fragment) in fragments.iter().enumerate() {
            let mut line = self.service.frame_line(&key, fragment)?;
            if corrupt_at == Some(i) {
                tamper_line(&mut line);
            }
            raw.push_str(&line);
            if blank_lines {
                raw.push_str("   \n");
            }
        }

        let chunk_size = self.chunk_size.load(Ordering::Relaxed);
        let chunks: Vec<Result<Bytes, ExchangeError>> = if chunk_size == 0 {
            vec![Ok(Bytes::from(raw))]
        } else {
            raw.as_bytes()
                .chunks(chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect()
        };

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn summarize(&self, envelope: &RequestEnvelope) -> Result<Frame, ExchangeError> {
        let _ = self.summarize_calls.fetch_add(1, Ordering::Relaxed);

        let script = self
            .summaries
            .lock()
            .pop_front()
            .ok_or_else(|| ExchangeError::Network("no scripted summary response".into()))?;

        let text = script?;
        let (key, plaintext) = self.service.open_envelope(envelope)?;
        Self::record_payload(&self.summarize_payloads, &plaintext)?;
        self.service.reply_frame(&key, &text)
    }
}
