// SPDX-License-Identifier: AGPL-3.0-only
//! WebSocket front end for the terminal relay.

use crate::api::{AppState, Peer};
use crate::metrics::metrics;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use warden_relay::{ClientFrame, ClientLink, RelayOutcome, RelayRequest, RelayState, ServerFrame};

const FRAME_BUFFER: usize = 64;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalQuery {
    pub token: Option<String>,
    pub device_id: Option<String>,
    pub protocol: Option<String>,
}

/// GET /api/terminal?token=..&deviceId=..&protocol=ssh
pub async fn terminal_handler(
    State(state): State<AppState>,
    Peer(peer): Peer,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let request = RelayRequest {
        token: query.token,
        device_id: query.device_id,
        protocol: query.protocol,
        peer,
    };
    ws.on_upgrade(move |socket| relay_socket(state, request, socket))
}

async fn relay_socket(state: AppState, request: RelayRequest, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(FRAME_BUFFER);

    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            let frame = match message {
                Message::Text(text) => ClientFrame::parse(text.as_str()),
                Message::Binary(bytes) => Ok(ClientFrame::binary(bytes.to_vec())),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            let malformed = frame.is_err();
            if inbound_tx.send(frame).await.is_err() || malformed {
                break;
            }
        }
        debug!("client stream ended");
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                ServerFrame::Data(bytes) => Message::Binary(bytes.into()),
                other => match other.to_json() {
                    Some(json) => Message::Text(json.into()),
                    None => continue,
                },
            };
            if sink.send(message).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let outcome = run_tracked(&state, request, ClientLink {
        inbound: inbound_rx,
        outbound: outbound_tx,
    })
    .await;
    reader.abort();
    let _ = writer.await;
    info!(
        session = ?outcome.session_id.map(|id| id.to_string()),
        state = ?outcome.final_state(),
        reason = ?outcome.close_reason,
        commands = outcome.commands,
        "terminal connection finished"
    );
}

/// Runs the relay while keeping the session gauges current.
pub(crate) async fn run_tracked(state: &AppState, request: RelayRequest, link: ClientLink) -> RelayOutcome {
    let m = metrics();
    m.relay_sessions_active.inc();
    let outcome = state.relay.run(request, link).await;
    m.relay_sessions_active.dec();

    let label = if outcome.states.contains(&RelayState::Streaming) {
        "streamed"
    } else if outcome.error.is_some() {
        "refused"
    } else {
        "closed"
    };
    m.relay_sessions_total.with_label_values(&[label]).inc();
    m.relay_commands_total.inc_by(outcome.commands as u64);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_app;

    // ==================== Tracking Tests ====================

    #[tokio::test]
    async fn refused_connection_is_counted() {
        let app = test_app();
        let before = metrics().relay_sessions_total.with_label_values(&["refused"]).get();
        let (_inbound_tx, inbound) = mpsc::channel(4);
        let (outbound, mut frames) = mpsc::channel(4);

        let outcome = run_tracked(&app.state, RelayRequest::default(), ClientLink { inbound, outbound }).await;
        assert!(outcome.error.is_some());
        assert_eq!(outcome.final_state(), Some(RelayState::Closed));
        match frames.recv().await {
            Some(ServerFrame::Error { message }) => assert_eq!(message, "Token or device id not provided"),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(metrics().relay_sessions_total.with_label_values(&["refused"]).get() > before);
    }

    #[test]
    fn query_uses_camel_case() {
        let query: TerminalQuery = serde_json::from_str(r#"{"token":"t","deviceId":"7"}"#).unwrap();
        assert_eq!(query.device_id.as_deref(), Some("7"));
        assert!(query.protocol.is_none());
    }
}
