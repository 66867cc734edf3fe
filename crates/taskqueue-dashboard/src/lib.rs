//! GraphQL dashboard transport (§6): `async-graphql` schema served over
//! `axum`, with websocket subscriptions on the `graphql-ws` subprotocol.
//!
//! This crate never owns a `Scheduler` — it is handed a `SchedulerHandle`
//! by the binary that registered tasks and started the multiplex loop
//! (§4.6 step 6), the same way any outer transport is bolted onto an
//! already-running worker loop rather than owning it.

pub mod schema;
pub mod types;

use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use async_graphql_axum::{GraphQLProtocol, GraphQLRequest, GraphQLResponse, GraphQLWebSocket};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use schema::{build_schema, ClientId, DashboardSchema};
use taskqueue_core::{SchedulerConfig, SchedulerHandle};

/// Build the dashboard's axum router: `/graphql` for queries/mutations and
/// websocket subscriptions, `/graphql/playground` and `/graphql/voyager`
/// gated to `config.is_development()` (§6).
pub fn router(scheduler: SchedulerHandle, config: SchedulerConfig) -> Router {
    let schema = build_schema(scheduler, config.clone());

    Router::new()
        .route("/graphql", get(graphql_ws_handler).post(graphql_http_handler))
        .route("/graphql/playground", get(playground_handler))
        .route("/graphql/voyager", get(voyager_handler))
        .with_state(DashboardState { schema, config })
}

#[derive(Clone)]
struct DashboardState {
    schema: DashboardSchema,
    config: SchedulerConfig,
}

async fn graphql_http_handler(
    State(state): State<DashboardState>,
    request: GraphQLRequest,
) -> GraphQLResponse {
    state.schema.execute(request.into_inner()).await.into()
}

/// Upgrades to a websocket and derives the subscriber's `client_id` from
/// `Sec-WebSocket-Key`, exactly as the original `graphql_resolver.go` does.
async fn graphql_ws_handler(
    State(state): State<DashboardState>,
    protocol: GraphQLProtocol,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let client_id = headers
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    tracing::info!(client_id = %client_id, "dashboard client connected");

    ws.protocols(["graphql-ws", "graphql-transport-ws"])
        .on_upgrade(move |socket| {
            GraphQLWebSocket::new(socket, state.schema.clone(), protocol)
                .on_connection_init(move |_payload| {
                    let client_id = client_id.clone();
                    async move {
                        let mut data = async_graphql::Data::default();
                        data.insert(ClientId(client_id));
                        Ok(data)
                    }
                })
                .serve()
        })
}

async fn playground_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    if !state.config.is_development() {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    Html(playground_source(GraphQLPlaygroundConfig::new("/graphql").subscription_endpoint("/graphql"))).into_response()
}

async fn voyager_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    if !state.config.is_development() {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    Html(VOYAGER_HTML).into_response()
}

const VOYAGER_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>GraphQL Voyager</title>
    <style>body { margin: 0; height: 100vh; }</style>
    <script src="https://cdn.jsdelivr.net/npm/graphql-voyager/dist/voyager.standalone.js"></script>
  </head>
  <body>
    <div id="voyager" style="height: 100vh;"></div>
    <script>
      GraphQLVoyager.init(document.getElementById('voyager'), {
        introspection: { url: '/graphql', method: 'POST', headers: { 'content-type': 'application/json' } },
      });
    </script>
  </body>
</html>"#;
