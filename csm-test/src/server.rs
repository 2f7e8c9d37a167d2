//! Exposes an in-process fake of the user state service for use in integration tests.
//!
//! ```
//! use csm_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let settings = server.settings();
//!    // point an `HttpUserStateClient` at the settings...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Basic;
use csm_client::{
    BlockState, ConnectionSettings, GetManyRequest, GetManyResponse, InMemoryClient,
    SetManyRequest, UserStateClient,
};

/// Database name served by the [`TestServer`].
pub const DATABASE: &str = "wwc";

#[derive(Debug, Default)]
struct ServerState {
    store: InMemoryClient,
    credentials: Option<(String, String)>,
    failing: AtomicBool,
    requests: AtomicUsize,
}

type SharedState = Arc<ServerState>;
type Credentials = Option<TypedHeader<Authorization<Basic>>>;

/// An in-process fake of the user state service.
///
/// State is kept in an [`InMemoryClient`], which can be inspected through [`TestServer::store`].
/// The server listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: SharedState,
}

impl TestServer {
    /// Starts a server that accepts all requests.
    pub async fn new() -> Self {
        Self::start(ServerState::default())
    }

    /// Starts a server that requires basic authentication with the given credentials.
    pub async fn with_credentials(user: &str, password: &str) -> Self {
        Self::start(ServerState {
            credentials: Some((user.to_owned(), password.to_owned())),
            ..Default::default()
        })
    }

    fn start(state: ServerState) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Arc::new(state);
        let router = Router::new()
            .route(
                "/{database}/users/{username}/state/get_many",
                routing::post(get_many),
            )
            .route(
                "/{database}/users/{username}/state/set_many",
                routing::post(set_many),
            )
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns connection settings pointing at this server, without credentials.
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            scheme: "http".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: self.socket.port(),
            name: DATABASE.to_owned(),
            ..Default::default()
        }
    }

    /// Returns the store backing this server.
    pub fn store(&self) -> &InMemoryClient {
        &self.state.store
    }

    /// Makes all subsequent requests fail with `503 Service Unavailable`, or stops doing so.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::Relaxed);
    }

    /// Returns the number of requests that reached a handler.
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::Relaxed)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn check_request(
    state: &ServerState,
    database: &str,
    credentials: Credentials,
) -> Result<(), StatusCode> {
    state.requests.fetch_add(1, Ordering::Relaxed);

    if state.failing.load(Ordering::Relaxed) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    if database != DATABASE {
        return Err(StatusCode::NOT_FOUND);
    }
    if let Some((user, password)) = &state.credentials {
        let Some(TypedHeader(Authorization(basic))) = credentials else {
            return Err(StatusCode::UNAUTHORIZED);
        };
        if basic.username() != user.as_str() || basic.password() != password.as_str() {
            return Err(StatusCode::FORBIDDEN);
        }
    }

    Ok(())
}

async fn get_many(
    State(state): State<SharedState>,
    Path((database, username)): Path<(String, String)>,
    credentials: Credentials,
    Json(request): Json<GetManyRequest>,
) -> Result<Json<GetManyResponse>, StatusCode> {
    check_request(&state, &database, credentials)?;

    let blocks = state
        .store
        .get_many(&username, &request.keys)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(GetManyResponse {
        blocks: blocks
            .into_iter()
            .map(|(usage_key, data)| BlockState {
                usage_key,
                state: data,
            })
            .collect(),
    }))
}

async fn set_many(
    State(state): State<SharedState>,
    Path((database, username)): Path<(String, String)>,
    credentials: Credentials,
    Json(request): Json<SetManyRequest>,
) -> Result<StatusCode, StatusCode> {
    check_request(&state, &database, credentials)?;

    state
        .store
        .set_many(&username, request.blocks)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}
