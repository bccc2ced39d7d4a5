//! The exchange pipeline: one prompt in, one streamed response out, with a
//! fresh key agreement and encrypted envelope per request.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use veil_channel::wire::{ContextPayload, ExchangePayload};
use veil_channel::{channel, establish, FrameStream, GenerationParams, RequestEnvelope, Transport};
use veil_core::{ExchangeError, ExchangeId, Message, SessionId, DEFAULT_TITLE};
use veil_store::{SessionStore, StoreError};

use crate::compactor;

/// How many recent messages ride along with the summary as context.
pub const CONTEXT_RECENT: usize = 4;

/// A session title is the first prompt, cut to this many characters.
const TITLE_MAX_CHARS: usize = 32;

fn persistence(e: StoreError) -> ExchangeError {
    ExchangeError::Persistence(e.to_string())
}

/// Runs confidential exchanges against a [`Transport`], committing every
/// fragment to the [`SessionStore`] as it arrives. One exchange per session
/// at a time; fragments already committed survive any later failure.
pub struct Exchanger<T: Transport> {
    transport: Arc<T>,
    store: Arc<SessionStore>,
    in_flight: Arc<DashMap<SessionId, ()>>,
}

impl<T: Transport> Exchanger<T> {
    pub fn new(transport: Arc<T>, store: Arc<SessionStore>) -> Self {
        Self {
            transport,
            store,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn mark_busy(&self, session_id: &SessionId) -> Result<BusyGuard, ExchangeError> {
        use dashmap::mapref::entry::Entry;
        match self.in_flight.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(ExchangeError::SessionBusy),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(BusyGuard {
                    map: Arc::clone(&self.in_flight),
                    id: session_id.clone(),
                })
            }
        }
    }

    /// Run one full exchange: commit the prompt, establish a per-exchange
    /// key, stream and decrypt the response into the session, then compact
    /// if the history is due.
    ///
    /// `on_fragment` fires for each decrypted fragment in arrival order,
    /// after the fragment is committed to the store.
    #[instrument(skip(self, prompt, params, cancel, on_fragment), fields(session_id = %session_id))]
    pub async fn exchange(
        &self,
        session_id: &SessionId,
        prompt: &str,
        params: GenerationParams,
        cancel: CancellationToken,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<String, ExchangeError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ExchangeError::EmptyPrompt);
        }
        let _busy = self.mark_busy(session_id)?;
        let exchange_id = ExchangeId::new();
        debug!(%exchange_id, "exchange started");

        // Commit the prompt and the streaming slot before touching the
        // network, so the user's side of the turn is never lost.
        let session = self
            .store
            .update(session_id, |s| {
                if s.title == DEFAULT_TITLE {
                    s.title = prompt.chars().take(TITLE_MAX_CHARS).collect();
                }
                s.push(Message::user(prompt));
                s.push(Message::assistant(""));
            })
            .map_err(persistence)?;

        // Context: the rolling summary plus the newest messages up to and
        // including the prompt just committed. The empty slot is skipped.
        let history = &session.messages[..session.messages.len() - 1];
        let recent_from = history.len().saturating_sub(CONTEXT_RECENT);
        let payload = ExchangePayload {
            prompt: prompt.to_string(),
            context: ContextPayload {
                summary: session.summary.clone(),
                recent: history[recent_from..].to_vec(),
            },
            params,
        };
        let plaintext = serde_json::to_vec(&payload).map_err(|_| ExchangeError::Encrypt)?;

        let service_key = self.transport.fetch_service_key().await?;
        let handshake = establish(&service_key)?;
        let (nonce, ciphertext) = channel::seal(&handshake.key, &plaintext)?;
        let envelope = RequestEnvelope::new(&handshake.client_public, &nonce, &ciphertext);

        let bytes = self.transport.open_stream(&envelope).await?;
        let mut frames = FrameStream::new(bytes, handshake.key);

        let mut response = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%exchange_id, committed = response.len(), "exchange cancelled");
                    return Err(ExchangeError::Cancelled);
                }
                item = frames.next() => {
                    let Some(item) = item else { break };
                    let fragment = item?;
                    self.store
                        .update(session_id, |s| s.append_to_last_assistant(&fragment))
                        .map_err(persistence)?;
                    on_fragment(&fragment);
                    response.push_str(&fragment);
                }
            }
        }

        if let Err(e) = compactor::maybe_compact(&*self.transport, &self.store, session_id).await {
            warn!(error = %e, kind = e.error_kind(), "compaction failed");
        }

        Ok(response)
    }
}

/// Releases the session's busy slot on drop, whatever path the exchange
/// takes out of `exchange`.
struct BusyGuard {
    map: Arc<DashMap<SessionId, ()>>,
    id: SessionId,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}
