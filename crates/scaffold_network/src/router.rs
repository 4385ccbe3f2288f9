//! Protocol router: dispatches SCF requests to registered handlers.
//!
//! Every failure a handler reports becomes a status-255 response carrying the
//! error text, so one bad request never tears down its connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::NetworkError;
use crate::protocol::{self, ProtocolSet};
use crate::registry::{PlayerIdentity, PlayerRegistry};
use crate::server::GameServerStatus;
use crate::wire::{ScfRequest, ScfResponse};

/// An async request handler.
pub type ProtocolHandler = Arc<
    dyn Fn(ScfRequest) -> Pin<Box<dyn Future<Output = Result<ScfResponse, NetworkError>> + Send>>
        + Send
        + Sync,
>;

/// Routes requests to handlers keyed by protocol id.
#[derive(Default)]
pub struct ProtocolRouter {
    handlers: RwLock<HashMap<String, ProtocolHandler>>,
}

impl ProtocolRouter {
    /// Create a router with no handlers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A router serving the five reserved `c:` protocols.
    pub fn standard(registry: Arc<PlayerRegistry>, game: Arc<GameServerStatus>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ProtocolRouter>| {
            let router = ProtocolRouter::new();
            let builtins = [
                (protocol::PING, ping_handler()),
                (protocol::PROTOCOLS, protocols_handler(weak.clone())),
                (protocol::SERVER_PORT, server_port_handler(game)),
                (protocol::PLAYER_PING, player_ping_handler(Arc::clone(&registry))),
                (protocol::PLAYER_PROFILES_LIST, player_profiles_handler(registry)),
            ];
            {
                let mut handlers = router.handlers.write();
                for (id, handler) in builtins {
                    handlers.insert(id.to_string(), handler);
                }
            }
            router
        })
    }

    /// Register (or replace) the handler for `id`.
    pub fn register(&self, id: &str, handler: ProtocolHandler) -> Result<(), NetworkError> {
        protocol::validate_protocol(id)?;
        debug!("Registering handler for protocol {id}");
        self.handlers.write().insert(id.to_string(), handler);
        Ok(())
    }

    /// Check if a handler is registered for `id`.
    pub fn has_handler(&self, id: &str) -> bool {
        self.handlers.read().contains_key(id)
    }

    /// Return the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Every protocol this router serves.
    pub fn protocols(&self) -> ProtocolSet {
        self.handlers.read().keys().collect()
    }

    /// Answer one request.
    pub async fn dispatch(&self, request: ScfRequest) -> ScfResponse {
        let id = request.protocol.clone();
        if !protocol::is_valid_protocol(&id) {
            warn!("Rejecting malformed protocol id {id:?}");
            return ScfResponse::invalid_protocol(&id);
        }

        // Clone the handler out so the lock is released before awaiting.
        let handler = self.handlers.read().get(&id).cloned();
        let Some(handler) = handler else {
            debug!("No handler for protocol {id}");
            return ScfResponse::unsupported_protocol(&id);
        };

        match handler(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Handler for {id} failed: {e}");
                ScfResponse::unknown_error(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in handler factories
// ---------------------------------------------------------------------------

/// `c:ping`: echo the body.
pub fn ping_handler() -> ProtocolHandler {
    Arc::new(|request: ScfRequest| Box::pin(async move { Ok(ScfResponse::ok(request.body)) }))
}

/// `c:protocols`: answer with the router's own protocol list.
pub fn protocols_handler(router: Weak<ProtocolRouter>) -> ProtocolHandler {
    Arc::new(move |request: ScfRequest| {
        let router = router.clone();
        Box::pin(async move {
            let claimed = ProtocolSet::decode(&request.body);
            debug!("Client claims protocols {claimed}");
            let router = router.upgrade().ok_or(NetworkError::NotRunning)?;
            Ok(ScfResponse::ok(router.protocols().encode()))
        })
    })
}

/// `c:server_port`: the game port, or status 32 while the game is down.
pub fn server_port_handler(game: Arc<GameServerStatus>) -> ProtocolHandler {
    Arc::new(move |_request: ScfRequest| {
        let game = Arc::clone(&game);
        Box::pin(async move {
            Ok(match game.port_if_running() {
                Some(port) => ScfResponse::ok(port.to_be_bytes().to_vec()),
                None => ScfResponse::server_not_ready(),
            })
        })
    })
}

/// `c:player_ping`: record a heartbeat.
pub fn player_ping_handler(registry: Arc<PlayerRegistry>) -> ProtocolHandler {
    Arc::new(move |request: ScfRequest| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            let identity: PlayerIdentity = serde_json::from_slice(&request.body)?;
            let name = identity.name.clone();
            let kind = registry.record_ping(identity, Utc::now())?;
            debug!("Heartbeat from {name} ({kind:?})");
            Ok(ScfResponse::ok_empty())
        })
    })
}

/// `c:player_profiles_list`: sweep expired guests, then list everyone.
pub fn player_profiles_handler(registry: Arc<PlayerRegistry>) -> ProtocolHandler {
    Arc::new(move |_request: ScfRequest| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            let profiles = registry.sweep_and_snapshot(Utc::now());
            Ok(ScfResponse::ok(serde_json::to_vec(&profiles)?))
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PlayerKind, PlayerProfile};
    use crate::wire::{STATUS_OK, STATUS_SERVER_NOT_READY, STATUS_UNKNOWN_ERROR};

    fn standard() -> (Arc<ProtocolRouter>, Arc<PlayerRegistry>, Arc<GameServerStatus>) {
        let registry = Arc::new(PlayerRegistry::new());
        let game = Arc::new(GameServerStatus::new(25565, false));
        let router = ProtocolRouter::standard(Arc::clone(&registry), Arc::clone(&game));
        (router, registry, game)
    }

    #[tokio::test]
    async fn test_ping_echoes() {
        let (router, _, _) = standard();
        let response = router
            .dispatch(ScfRequest::new("c:ping", b"ping_test".to_vec()))
            .await;
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.body, b"ping_test");
    }

    #[tokio::test]
    async fn test_protocols_lists_standard_set() {
        let (router, _, _) = standard();
        let response = router
            .dispatch(ScfRequest::new("c:protocols", b"c:ping\0x:y".to_vec()))
            .await;
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(ProtocolSet::decode(&response.body), ProtocolSet::standard());
    }

    #[tokio::test]
    async fn test_server_port_follows_game_status() {
        let (router, _, game) = standard();
        let response = router.dispatch(ScfRequest::empty("c:server_port")).await;
        assert_eq!(response.status, STATUS_SERVER_NOT_READY);
        assert!(response.body.is_empty());

        game.set_running(true);
        let response = router.dispatch(ScfRequest::empty("c:server_port")).await;
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.body, 25565u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_player_ping_and_list() {
        let (router, registry, _) = standard();
        registry.set_host("Alice", "host-id", "v", Utc::now());

        let body = serde_json::to_vec(&PlayerIdentity {
            name: "Bob".into(),
            machine_id: "bob-id".into(),
            vendor: "test".into(),
        })
        .unwrap();
        let response = router.dispatch(ScfRequest::new("c:player_ping", body)).await;
        assert_eq!(response.status, STATUS_OK);
        assert!(response.body.is_empty());

        let response = router.dispatch(ScfRequest::empty("c:player_profiles_list")).await;
        assert_eq!(response.status, STATUS_OK);
        let profiles: Vec<PlayerProfile> = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].kind, PlayerKind::Host);
        assert_eq!(profiles[1].name, "Bob");

        let raw: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(raw[1]["kind"], "GUEST");
        assert_eq!(raw[1]["machine_id"], "bob-id");
    }

    #[tokio::test]
    async fn test_player_ping_malformed_json() {
        let (router, registry, _) = standard();
        let response = router
            .dispatch(ScfRequest::new("c:player_ping", b"{not json".to_vec()))
            .await;
        assert_eq!(response.status, STATUS_UNKNOWN_ERROR);
        assert!(!response.body.is_empty());
        assert_eq!(registry.player_count(), 0);

        let body = br#"{"name":"x","machine_id":"","vendor":"v"}"#.to_vec();
        let response = router.dispatch(ScfRequest::new("c:player_ping", body)).await;
        assert_eq!(response.status, STATUS_UNKNOWN_ERROR);
    }

    #[tokio::test]
    async fn test_unsupported_and_malformed_ids() {
        let (router, _, _) = standard();
        let response = router.dispatch(ScfRequest::empty("x:bogus")).await;
        assert_eq!(response.status, STATUS_UNKNOWN_ERROR);
        assert_eq!(response.message(), "unsupported protocol: x:bogus");

        let response = router.dispatch(ScfRequest::empty("NotAProtocol")).await;
        assert_eq!(response.status, STATUS_UNKNOWN_ERROR);
        assert!(response.message().contains("NotAProtocol"));
    }

    #[tokio::test]
    async fn test_custom_handler_is_advertised() {
        let (router, _, _) = standard();
        let handler: ProtocolHandler = Arc::new(|request: ScfRequest| {
            Box::pin(async move {
                let mut body = request.body;
                body.reverse();
                Ok(ScfResponse::ok(body))
            })
        });
        router.register("m:reverse", handler.clone()).unwrap();
        assert!(router.register("Bad Id", handler).is_err());
        assert_eq!(router.handler_count(), 6);

        let response = router
            .dispatch(ScfRequest::new("m:reverse", b"abc".to_vec()))
            .await;
        assert_eq!(response.body, b"cba");

        let response = router.dispatch(ScfRequest::empty("c:protocols")).await;
        assert!(ProtocolSet::decode(&response.body).contains("m:reverse"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_status_255() {
        let router = ProtocolRouter::new();
        let failing: ProtocolHandler = Arc::new(|_request: ScfRequest| {
            Box::pin(async { Err(NetworkError::InvalidArgument("nope".into())) })
        });
        router.register("m:fail", failing).unwrap();
        let response = router.dispatch(ScfRequest::empty("m:fail")).await;
        assert_eq!(response.status, STATUS_UNKNOWN_ERROR);
        assert!(response.message().contains("nope"));
    }
}
