//! Axum route wiring for the registry's endpoints.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use quay_core::{Ack, InsyncChange};
use quay_web::handlers::{health_check, upgrade_json, JsonSocket};

use crate::core::RegistryCore;

/// Build the registry's router over a shared [`RegistryCore`].
pub fn router(core: Arc<RegistryCore>) -> Router {
    Router::new()
        .route("/leader", get(leader))
        .route("/follow", get(redirector))
        .route("/publish", get(redirector))
        .route("/consumer", get(consumer))
        .route("/health", get(health_check))
        .with_state(core)
        .layer(quay_web::correlation_id_layer())
}

async fn leader(ws: WebSocketUpgrade, State(core): State<Arc<RegistryCore>>) -> Response {
    upgrade_json(ws, move |socket: JsonSocket| async move {
        let (mut sink, mut stream) = socket.split();

        let Some(Ok(hostport)) = stream.recv_json::<String>().await else {
            return;
        };

        if !core.register_leader(hostport.clone()).await {
            let _ = sink.send_json(&Ack::failure()).await;
            return;
        }
        if sink.send_json(&Ack::success(Vec::new())).await.is_err() {
            core.clear_leader(&hostport).await;
            return;
        }

        tracing::info!(%hostport, "leader registered");

        loop {
            match stream.recv_json::<InsyncChange>().await {
                Some(Ok(change)) => core.apply_insync_change(change).await,
                _ => break,
            }
        }

        tracing::warn!(%hostport, "leader disconnected");
        core.clear_leader(&hostport).await;
        let broadcaster = Arc::clone(&core);
        tokio::spawn(async move { broadcaster.run_swap_broadcast().await });
    })
}

async fn redirector(ws: WebSocketUpgrade, State(core): State<Arc<RegistryCore>>) -> Response {
    upgrade_json(ws, move |mut socket: JsonSocket| async move {
        // A redirector ignores the request body: any connection to this
        // endpoint just wants to know the current leader.
        let _ = socket.recv_json::<serde_json::Value>().await;
        let ack = match core.current_leader().await {
            Some(hostport) => Ack::redirect(&hostport),
            None => Ack::not_ready(),
        };
        let _ = socket.send_json(&ack).await;
    })
}

async fn consumer(ws: WebSocketUpgrade, State(core): State<Arc<RegistryCore>>) -> Response {
    upgrade_json(ws, move |mut socket: JsonSocket| async move {
        let insync = core.insync_set().await;
        let Ok(ack) = Ack::success_json(&insync) else {
            return;
        };
        let _ = socket.send_json(&ack).await;
    })
}
