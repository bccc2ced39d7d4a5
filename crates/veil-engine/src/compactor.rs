//! Rolling-summary compaction. Long histories are folded into a summary on
//! the service side so the context payload stays bounded; the full plaintext
//! history never leaves the local store.

use tracing::{debug, instrument};

use veil_channel::wire::SummarizePayload;
use veil_channel::{channel, establish, RequestEnvelope, Transport};
use veil_core::{ExchangeError, SessionId};
use veil_store::SessionStore;

/// Compact whenever the message count reaches a multiple of this.
pub const COMPACTION_WINDOW: usize = 6;

pub fn should_compact(message_count: usize) -> bool {
    message_count > 0 && message_count % COMPACTION_WINDOW == 0
}

/// Fold the session's older history into its rolling summary if it is due.
/// Returns whether compaction ran.
///
/// The summary request rides its own handshake and encrypted envelope, same
/// as an exchange. The session is rewritten only after the reply decrypts
/// cleanly; any failure leaves it exactly as it was.
#[instrument(skip(transport, store), fields(session_id = %session_id))]
pub async fn maybe_compact<T: Transport + ?Sized>(
    transport: &T,
    store: &SessionStore,
    session_id: &SessionId,
) -> Result<bool, ExchangeError> {
    let session = store
        .get(session_id)
        .map_err(|e| ExchangeError::Persistence(e.to_string()))?;
    if !should_compact(session.message_count()) {
        return Ok(false);
    }

    let recent_from = session.messages.len().saturating_sub(COMPACTION_WINDOW);
    let payload = SummarizePayload {
        summary: session.summary.clone(),
        recent: session.messages[recent_from..].to_vec(),
    };
    let plaintext = serde_json::to_vec(&payload).map_err(|_| ExchangeError::Encrypt)?;

    let service_key = transport.fetch_service_key().await?;
    let handshake = establish(&service_key)?;
    let (nonce, ciphertext) = channel::seal(&handshake.key, &plaintext)?;
    let envelope = RequestEnvelope::new(&handshake.client_public, &nonce, &ciphertext);

    let frame = transport.summarize(&envelope).await?;
    let (nonce, ciphertext) = frame.decode()?;
    let reply = channel::open(&handshake.key, &nonce, &ciphertext)?;
    let summary = String::from_utf8(reply)
        .map_err(|_| ExchangeError::StreamCorruption("summary is not valid UTF-8".into()))?;

    store
        .update(session_id, |s| {
            s.summary = summary;
            let keep_from = s.messages.len().saturating_sub(COMPACTION_WINDOW);
            s.messages.drain(..keep_from);
        })
        .map_err(|e| ExchangeError::Persistence(e.to_string()))?;

    debug!(kept = COMPACTION_WINDOW, "compacted session history");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_channel::mock::MockTransport;
    use veil_core::Message;
    use veil_store::{SessionStore, STORE_FILE};

    fn seeded_store(message_pairs: usize) -> (tempfile::TempDir, SessionStore, SessionId) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join(STORE_FILE)).unwrap();
        let id = store.active_id();
        store
            .update(&id, |s| {
                for i in 0..message_pairs {
                    s.push(Message::user(format!("q{i}")));
                    s.push(Message::assistant(format!("a{i}")));
                }
            })
            .unwrap();
        (dir, store, id)
    }

    #[test]
    fn compaction_trigger_is_every_sixth_message() {
        for count in [6, 12, 18] {
            assert!(should_compact(count), "expected trigger at {count}");
        }
        for count in [0, 1, 5, 7, 11] {
            assert!(!should_compact(count), "unexpected trigger at {count}");
        }
    }

    #[tokio::test]
    async fn not_due_is_a_noop() {
        let (_dir, store, id) = seeded_store(2); // 4 messages
        let transport = MockTransport::new();

        let ran = maybe_compact(&transport, &store, &id).await.unwrap();
        assert!(!ran);
        assert_eq!(transport.summarize_calls(), 0);
    }

    #[tokio::test]
    async fn compaction_sets_summary_and_truncates() {
        let (_dir, store, id) = seeded_store(6); // 12 messages
        let transport = MockTransport::new();
        transport.script_summary("Greeting exchange");

        let ran = maybe_compact(&transport, &store, &id).await.unwrap();
        assert!(ran);

        let session = store.get(&id).unwrap();
        assert_eq!(session.summary, "Greeting exchange");
        assert_eq!(session.messages.len(), COMPACTION_WINDOW);
        // The newest six survive.
        assert_eq!(session.messages[0].content, "q3");
        assert_eq!(session.messages[5].content, "a5");
    }

    #[tokio::test]
    async fn summary_request_carries_prior_summary_and_recent_window() {
        let (_dir, store, id) = seeded_store(3); // 6 messages
        store.update(&id, |s| s.summary = "earlier".into()).unwrap();
        let transport = MockTransport::new();
        transport.script_summary("later");

        maybe_compact(&transport, &store, &id).await.unwrap();

        let payloads = transport.summarize_payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["summary"], "earlier");
        assert_eq!(payloads[0]["recent"].as_array().unwrap().len(), 6);
        assert_eq!(payloads[0]["recent"][0]["content"], "q0");
    }

    #[tokio::test]
    async fn failure_leaves_session_unchanged() {
        let (_dir, store, id) = seeded_store(3);
        let transport = MockTransport::new();
        transport.script_summary_failure(ExchangeError::Network("down".into()));

        let err = maybe_compact(&transport, &store, &id).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Network(_)));

        let session = store.get(&id).unwrap();
        assert!(session.summary.is_empty());
        assert_eq!(session.messages.len(), 6);
    }

    #[tokio::test]
    async fn key_fetch_failure_aborts_before_summarize() {
        let (_dir, store, id) = seeded_store(3);
        let transport = MockTransport::new();
        transport.fail_key_fetch(ExchangeError::KeyFetch("unreachable".into()));

        let err = maybe_compact(&transport, &store, &id).await.unwrap_err();
        assert!(err.is_handshake_failure());
        assert_eq!(transport.summarize_calls(), 0);
    }
}
