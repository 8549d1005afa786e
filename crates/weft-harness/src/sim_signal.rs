//! In-memory signaling relay.
//!
//! Models exactly what the core assumes of the real relay: reliable,
//! ordered delivery of envelopes keyed by the receiver's public key. Each
//! simulated agent registers its key and gets back an outbox (its
//! [`weft_core::signal::SignalClient`]) plus the receive side of its inbox.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use weft_core::{error::CoreError, signal::SignalClient};
use weft_proto::SignalEnvelope;

/// The relay: routes envelopes to registered receivers.
#[derive(Clone, Default)]
pub struct SignalHub {
    routes: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalEnvelope>>>>,
}

impl SignalHub {
    /// An empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver key. Returns the outbox for sending and the
    /// inbox stream of envelopes addressed to `key`.
    ///
    /// Registering the same key twice replaces the previous inbox.
    #[must_use]
    pub fn register(&self, key: &str) -> (SignalOutbox, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().expect("SignalHub mutex poisoned").insert(key.to_string(), tx);
        (SignalOutbox { hub: self.clone() }, rx)
    }
}

/// Send half handed to each simulated agent.
#[derive(Clone)]
pub struct SignalOutbox {
    hub: SignalHub,
}

#[async_trait]
impl SignalClient for SignalOutbox {
    async fn send(&self, envelope: SignalEnvelope) -> Result<(), CoreError> {
        let sender = {
            let routes = self.hub.routes.lock().expect("SignalHub mutex poisoned");
            routes.get(&envelope.remote_key).cloned()
        };

        let sender = sender.ok_or_else(|| {
            CoreError::Internal(format!("no relay subscriber for {}", envelope.remote_key))
        })?;

        sender
            .send(envelope)
            .map_err(|_| CoreError::Internal("relay subscriber went away".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_remote_key() {
        let hub = SignalHub::new();
        let (alice_out, _alice_in) = hub.register("alice");
        let (_bob_out, mut bob_in) = hub.register("bob");

        let creds = weft_proto::IceCredentials { ufrag: "uf".to_string(), pwd: "pw".to_string() };
        alice_out.send(SignalEnvelope::offer("alice", "bob", &creds)).await.unwrap();

        let delivered = bob_in.recv().await.unwrap();
        assert_eq!(delivered.key, "alice");
        assert_eq!(delivered.remote_key, "bob");
    }

    #[tokio::test]
    async fn unknown_recipient_is_an_error() {
        let hub = SignalHub::new();
        let (alice_out, _alice_in) = hub.register("alice");

        let creds = weft_proto::IceCredentials { ufrag: "uf".to_string(), pwd: "pw".to_string() };
        let result = alice_out.send(SignalEnvelope::offer("alice", "nobody", &creds)).await;
        assert!(matches!(result, Err(CoreError::Internal(_))));
    }
}
