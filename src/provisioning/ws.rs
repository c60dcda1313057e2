//! WebSocket transport for the login channel.
//!
//! The socket is split: the pairing controller owns the write half, and a
//! detached reader drains the read half purely to notice closure, which it
//! reports by cancelling the session's token.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::identity::LocalIdentity;
use crate::pairing::frames::ServerFrame;
use crate::pairing::session::{FrameSink, PairingController, PairingRequest, SessionOutcome};

/// How long to wait for the client to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

const CHANNEL_NAME: &str = "login";

/// Write half of the login socket.
pub struct WsFrameSink {
    sender: SplitSink<WebSocket, Message>,
}

impl WsFrameSink {
    async fn close(&mut self) {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        };
        if let Err(e) = self.sender.send(Message::Close(Some(frame))).await {
            tracing::debug!("Error closing login websocket: {}", e);
        }
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ChannelError> {
        let text = serde_json::to_string(frame).map_err(|e| ChannelError::SendFailed {
            name: CHANNEL_NAME.to_string(),
            reason: format!("failed to encode frame: {e}"),
        })?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Run one pairing session over an upgraded socket.
pub async fn handle_login_socket(
    socket: WebSocket,
    controller: PairingController,
    request: PairingRequest,
) -> SessionOutcome {
    let (sender, receiver) = socket.split();
    let cancel = CancellationToken::new();
    let mut reader = tokio::spawn(watch_for_close(
        receiver,
        cancel.clone(),
        request.identity.clone(),
    ));

    let mut sink = WsFrameSink { sender };
    let outcome = controller.run(request, &mut sink, cancel.clone()).await;

    if !cancel.is_cancelled() {
        sink.close().await;
        if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    } else {
        reader.abort();
    }
    outcome
}

/// Drain inbound frames until the client goes away, then cancel.
///
/// Client messages carry no meaning on this channel and are dropped.
async fn watch_for_close(
    mut receiver: SplitStream<WebSocket>,
    cancel: CancellationToken,
    identity: LocalIdentity,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                tracing::debug!(
                    identity = %identity,
                    close_code = ?frame.map(|f| f.code),
                    "Login websocket closed, cancelling login"
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(identity = %identity, "Login websocket read failed: {}", e);
                break;
            }
        }
    }
    cancel.cancel();
}
