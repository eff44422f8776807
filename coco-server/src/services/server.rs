//! The HTTP server of the introspection API.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum_server::Handle;
use coco_log::Level;
use hyper_util::rt::TokioTimer;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnFailure, TraceLayer};

use crate::endpoints;
use crate::service::ServiceState;

/// Builds the axum application with all routes and middleware.
///
/// The timeout layer bounds the time spent in a handler. Reading the request head is bounded
/// separately by the server, see [`HttpServer::serve`].
pub fn make_app(state: ServiceState, timeout: Duration) -> axum::Router {
    // Layers added first are called first on requests.
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .layer(TimeoutLayer::new(timeout));

    endpoints::routes().layer(middleware).with_state(state)
}

/// HTTP server of the introspection API.
pub struct HttpServer {
    addr: SocketAddr,
    timeout: Duration,
    app: axum::Router,
    handle: Handle,
}

impl HttpServer {
    /// Creates the server. The socket is bound once [`serve`](Self::serve) is polled.
    pub fn new(addr: SocketAddr, timeout: Duration, state: ServiceState) -> Self {
        Self {
            addr,
            timeout,
            app: make_app(state, timeout),
            handle: Handle::new(),
        }
    }

    /// Returns a handle that reports the bound address through [`Handle::listening`].
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Serves requests until the process is stopped.
    ///
    /// Clients that do not send the complete request head within the timeout are disconnected.
    pub async fn serve(self) -> io::Result<()> {
        let mut server = axum_server::bind(self.addr).handle(self.handle);

        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.timeout);

        server.serve(self.app.into_make_service()).await
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use coco_protocol::Packet;
    use coco_telemetry::{Registry, Subsystem};
    use similar_asserts::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    use super::*;
    use crate::accounting::Accounting;
    use crate::services::filter::{Blacklist, FilterService};
    use crate::testutils::{MockDialer, MockUpstream};
    use crate::tier::{Target, Tier, Tiers};

    fn state() -> ServiceState {
        let registry = Arc::new(Registry::new());
        let tier1 = vec!["10.0.0.1:25826".to_owned(), "10.0.0.2:25826".to_owned()];
        let tier2 = vec!["10.0.0.3:25826".to_owned()];
        let config = [("tier1", tier1.as_slice()), ("tier2", tier2.as_slice())];

        let tiers = Arc::new(Tiers::build(config, &MockDialer::new(), &registry).unwrap());
        let accounting = Arc::new(Accounting::new(&tiers));
        ServiceState::new(tiers, accounting, registry)
    }

    async fn get(state: &ServiceState, uri: &str) -> (StatusCode, serde_json::Value) {
        let app = make_app(state.clone(), Duration::from_secs(5));
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

        (status, json)
    }

    #[tokio::test]
    async fn test_lookup() {
        let state = state();
        let (status, json) = get(&state, "/lookup?name=web-01").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tier2"], "10.0.0.3:25826");

        let expected = state.tiers().iter().next().unwrap().lookup("web-01").unwrap().addr();
        assert_eq!(json["tier1"], expected);
        assert_eq!(state.registry().get(Subsystem::Lookup, "tier1"), Some(1));
    }

    #[tokio::test]
    async fn test_lookup_skips_broken_tier() {
        let registry = Arc::new(Registry::new());
        let upstream = Arc::new(MockUpstream::new("10.0.0.3:25826".parse().unwrap()));
        let mut live = Tier::new("live");
        live.insert("0".to_owned(), Target::new("10.0.0.3:25826", upstream, &registry));

        let tiers: Tiers = [Tier::new("broken"), live].into_iter().collect();
        let tiers = Arc::new(tiers);
        let accounting = Arc::new(Accounting::new(&tiers));
        let state = ServiceState::new(tiers, accounting, Arc::clone(&registry));

        let (status, json) = get(&state, "/lookup?name=web-01").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"live": "10.0.0.3:25826"}));
        assert_eq!(registry.get(Subsystem::Errors, "lookup.hash.get"), Some(1));
        assert_eq!(registry.get(Subsystem::Lookup, "live"), Some(1));
    }

    #[tokio::test]
    async fn test_lookup_requires_name() {
        let state = state();

        let (status, _) = get(&state, "/lookup").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(&state, "/lookup?name=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_targets() {
        let state = state();
        let filter = FilterService::new(
            Blacklist::new(Some("^internal/")).unwrap(),
            state.accounting().filtered().clone(),
            Arc::new(Registry::new()),
        );
        filter.handle(&Packet {
            host: "internal".to_owned(),
            plugin: "cpu".to_owned(),
            ..Packet::default()
        });
        state
            .accounting()
            .target("10.0.0.3:25826")
            .unwrap()
            .record("web-01", "cpu/idle", 1_700_000_000);

        let (status, json) = get(&state, "/targets").await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["filtered"]["internal"]["cpu"].is_i64());
        assert_eq!(json["targets"]["10.0.0.3:25826"]["web-01"]["cpu/idle"], 1_700_000_000);
        assert_eq!(json["targets"]["10.0.0.1:25826"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_debug_vars() {
        let state = state();
        state.registry().add(Subsystem::Listen, "raw", 3);
        state
            .accounting()
            .target("10.0.0.3:25826")
            .unwrap()
            .record("web-01", "cpu/idle", 1);

        let (status, json) = get(&state, "/debug/vars").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["coco"]["listen"]["raw"], 3);
        assert_eq!(json["coco"]["send"]["10.0.0.3:25826"], 0);
        assert_eq!(json["coco"]["hash.ratios"]["tier2"]["95e"], 1);
        assert!(json["coco"]["hash.ratios"]["tier1"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get(&state(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_slow_request_head_is_cut_off() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let server = HttpServer::new(addr, Duration::from_millis(100), state());
        let handle = server.handle();
        tokio::spawn(server.serve());
        let addr = handle.listening().await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /debug/vars HTTP/1.1\r\n").await.unwrap();

        let mut buf = Vec::new();
        let closed =
            tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
        assert!(closed.is_ok(), "connection still open after the header timeout");
    }
}
