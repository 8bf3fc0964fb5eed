//! Axum route wiring for the broker's endpoints.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use quay_core::{Ack, ProduceRequest, SubscribeRequest};
use quay_web::handlers::{upgrade_json, JsonSocket};
use serde_json::json;
use tokio::sync::Notify;

use crate::core::BrokerCore;
use crate::follower_session;
use crate::subscription::Subscription;

/// Build the broker's router over a shared [`BrokerCore`].
pub fn router(core: Arc<BrokerCore>) -> Router {
    Router::new()
        .route("/publish", get(publish))
        .route("/subscribe", get(subscribe))
        .route("/follow", get(follow))
        .route("/swap", get(swap))
        .route("/health", get(health))
        .with_state(core)
        .layer(quay_web::correlation_id_layer())
}

/// `GET /health` — this broker's role and the health of its link to the
/// registry, so a deployment can tell a leader whose registry link has
/// tripped open from one that's genuinely fine.
async fn health(State(core): State<Arc<BrokerCore>>) -> Json<serde_json::Value> {
    Json(json!({
        "role": core.role().await,
        "registry_link": format!("{:?}", core.registry_link_state().await),
    }))
}

async fn publish(ws: WebSocketUpgrade, State(core): State<Arc<BrokerCore>>) -> Response {
    upgrade_json(ws, move |mut socket: JsonSocket| async move {
        let Some(Ok(request)) = socket.recv_json::<ProduceRequest>().await else {
            return;
        };
        let ack = core.publish(&request.topic, &request.id, request.message).await;
        let _ = socket.send_json(&ack).await;
    })
}

async fn subscribe(ws: WebSocketUpgrade, State(core): State<Arc<BrokerCore>>) -> Response {
    upgrade_json(ws, move |socket: JsonSocket| async move {
        let (mut sink, mut stream) = socket.split();
        let Some(Ok(request)) = stream.recv_json::<SubscribeRequest>().await else {
            return;
        };

        let subscription = match Subscription::new(Arc::clone(&core), &request.topic, request.offset) {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(topic = %request.topic, error = %err, "failed to open subscription");
                return;
            }
        };

        let quit = Arc::new(Notify::new());
        core.subscription_started(&request.topic).await;

        let disconnect_quit = Arc::clone(&quit);
        let watcher = tokio::spawn(async move {
            // Any message, error, or close on the read half means the
            // consumer is gone; wake the writer so it can return.
            stream.recv_json::<serde_json::Value>().await;
            disconnect_quit.notify_waiters();
        });

        subscription.serve(&mut sink, quit).await;
        watcher.abort();
        core.subscription_ended(&request.topic).await;
    })
}

async fn follow(ws: WebSocketUpgrade, State(core): State<Arc<BrokerCore>>) -> Response {
    upgrade_json(ws, move |socket: JsonSocket| async move {
        follower_session::serve_follow(core, socket).await;
    })
}

async fn swap(ws: WebSocketUpgrade, State(core): State<Arc<BrokerCore>>) -> Response {
    upgrade_json(ws, move |mut socket: JsonSocket| async move {
        let Some(Ok(insync)) = socket.recv_json::<Vec<String>>().await else {
            return;
        };
        let ack = match core.handle_swap(&insync).await {
            Ok(()) => Ack::success(Vec::new()),
            Err(err) => {
                tracing::error!(error = %err, "swap handling failed");
                Ack::failure()
            }
        };
        let _ = socket.send_json(&ack).await;
    })
}
