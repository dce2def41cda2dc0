//! Client entry point.
//!
//! The [`Client`] owns the transport, the session and the table of models.
//! Transport glue drives it through two methods: [`Client::dispatch_push`] for
//! inbound push calls and [`Client::handle_signal`] for connection lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use crate::config::ClientConfig;
use crate::error::{lock_err, MirrorResult, WireError};
use crate::live::Delivery;
use crate::model::Model;
use crate::reconnect::{ConnectionSignal, Session};
use crate::transport::Transport;
use crate::wire::{self, methods, PushEvent};

struct ClientInner {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    models: RwLock<HashMap<String, Model>>,
}

/// Live query client. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client with the default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Client with an explicit configuration.
    pub fn with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config: Arc::new(config),
                transport,
                session: Arc::new(Session::new()),
                models: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Configuration shared by every model of this client.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Authentication state shared with every model.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The model named `name`, created on first use.
    ///
    /// Creating a model exposes its push methods to the transport.
    pub fn model(&self, name: &str) -> MirrorResult<Model> {
        if let Some(model) = self
            .inner
            .models
            .read()
            .map_err(|_| lock_err("model table"))?
            .get(name)
        {
            return Ok(model.clone());
        }

        let mut models = self.inner.models.write().map_err(|_| lock_err("model table"))?;
        if let Some(model) = models.get(name) {
            return Ok(model.clone());
        }
        let model = Model::new(
            name,
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.transport),
            Arc::clone(&self.inner.session),
        );
        self.inner.transport.expose(&model.push_methods());
        models.insert(name.to_string(), model.clone());
        tracing::debug!(model = %name, "model created");
        Ok(model)
    }

    /// Several models at once, keyed by name. Repeated names resolve once.
    pub fn models(&self, names: &[&str]) -> MirrorResult<HashMap<String, Model>> {
        let mut resolved = HashMap::with_capacity(names.len());
        for name in names {
            if !resolved.contains_key(*name) {
                resolved.insert((*name).to_string(), self.model(name)?);
            }
        }
        Ok(resolved)
    }

    /// Model names known to the remote peer.
    pub async fn model_names(&self) -> MirrorResult<JsonValue> {
        let method = self.inner.config.client_method(methods::GET_MODELS);
        Ok(self.inner.transport.call(&method, Vec::new()).await?)
    }

    /// Authorize the session. Live queries executed afterwards replay on
    /// `authSuccess` instead of `reconnect`.
    pub async fn authorize(&self, args: JsonValue) -> MirrorResult<JsonValue> {
        let method = self.inner.config.client_method(methods::AUTHORIZE);
        let user = self.inner.transport.call(&method, vec![args]).await?;
        self.inner.session.set_user(user.clone());
        tracing::debug!("session authorized");
        Ok(user)
    }

    /// Return the session to anonymous.
    pub fn logout(&self) {
        self.inner.session.clear();
    }

    fn known_models(&self) -> MirrorResult<Vec<Model>> {
        Ok(self
            .inner
            .models
            .read()
            .map_err(|_| lock_err("model table"))?
            .values()
            .cloned()
            .collect())
    }

    /// Route one inbound push call, e.g. `MR.fighter.add(1, {...}, 0)`.
    ///
    /// Pushes for models or live queries that do not exist locally are
    /// dropped. Listener failures are returned.
    pub fn dispatch_push(&self, method: &str, args: &[JsonValue]) -> MirrorResult<Delivery> {
        let (model_name, event) = wire::split_push_method(method, &self.inner.config.namespace).ok_or_else(|| {
            WireError::UnknownMethod {
                method: method.to_string(),
            }
        })?;
        let push = PushEvent::decode(event, args)?;

        let found = self
            .inner
            .models
            .read()
            .map_err(|_| lock_err("model table"))?
            .get(model_name)
            .cloned();
        match found {
            Some(model) => model.handle_push(push),
            None => {
                tracing::warn!(model = %model_name, lq_id = %push.lq_id, "push for unknown model dropped");
                Ok(Delivery::Dropped)
            }
        }
    }

    /// Apply a connection lifecycle signal to every model.
    ///
    /// Returns how many live queries replayed.
    pub async fn handle_signal(&self, signal: ConnectionSignal) -> MirrorResult<usize> {
        let models = self.known_models()?;
        if signal == ConnectionSignal::Disconnect {
            for model in &models {
                model.on_disconnect()?;
            }
            return Ok(0);
        }

        let mut replayed = 0;
        for model in &models {
            replayed += model.replay_for(signal).await?;
        }
        tracing::debug!(?signal, replayed, "connection signal handled");
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn model_is_created_once_and_exposed() {
        let transport = Arc::new(MemoryTransport::new());
        let client = Client::new(transport.clone());
        let a = client.model("fighter").unwrap();
        let b = client.model("fighter").unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(transport.exposed().len(), 4);
    }

    #[test]
    fn models_batch_dedups_names() {
        let transport = Arc::new(MemoryTransport::new());
        let client = Client::new(transport.clone());
        let models = client.models(&["fighter", "event", "fighter"]).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(transport.exposed().len(), 8);
    }

    #[tokio::test]
    async fn authorize_marks_session() {
        let transport = Arc::new(MemoryTransport::new());
        transport.reply("MR.authorize", json!({"name": "capaj"}));
        let client = Client::new(transport.clone());

        client.authorize(json!({"nick": "capaj"})).await.unwrap();
        assert!(client.session().is_authenticated());
        client.logout();
        assert!(!client.session().is_authenticated());
    }

    #[test]
    fn push_for_unknown_model_is_dropped() {
        let client = Client::new(Arc::new(MemoryTransport::new()));
        let delivery = client.dispatch_push("MR.ghost.remove", &[json!(1), json!("x")]).unwrap();
        assert_eq!(delivery, Delivery::Dropped);
    }

    #[test]
    fn foreign_namespace_is_rejected() {
        let client = Client::new(Arc::new(MemoryTransport::new()));
        let err = client.dispatch_push("XX.fighter.remove", &[json!(1), json!("x")]).unwrap_err();
        assert!(matches!(err, crate::error::MirrorError::Wire(WireError::UnknownMethod { .. })));
    }

    #[test]
    fn custom_namespace_prefixes_calls() {
        let transport = Arc::new(MemoryTransport::new());
        let client = Client::with_config(transport.clone(), ClientConfig::default().with_namespace("APP"));
        client.model("fighter").unwrap();
        assert!(transport.exposed().contains(&"APP.fighter.add".to_string()));
    }
}
