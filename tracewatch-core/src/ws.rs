//! WebSocket connector
//!
//! Bridges a real WebSocket to the [`crate::channel`] frame queues: one pump
//! task per direction. The outbound pump closes the socket with a normal
//! closure code once the channel driver drops its sender, so a caller-
//! initiated disconnect looks like a clean close to the producer.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::channel::{BoxFuture, Connection, Connector, Incoming};
use crate::error::{Error, Result};

/// Connector for one WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    subprotocol: Option<String>,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            subprotocol: None,
        }
    }

    /// Request a subprotocol during the handshake.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<Result<Connection>> {
        let url = self.url.clone();
        let subprotocol = self.subprotocol.clone();

        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| Error::Transport(e.to_string()))?;
            if let Some(subprotocol) = &subprotocol {
                let value = HeaderValue::from_str(subprotocol)
                    .map_err(|e| Error::Transport(e.to_string()))?;
                request
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }

            let (socket, _response) = connect_async(request)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            let (mut sink, mut stream) = socket.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<Incoming>();

            // Outbound pump; a dropped sender means caller-intent close.
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if sink.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    })))
                    .await;
            });

            // Inbound pump; only text frames carry protocol messages.
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(Incoming::Text(text)).is_err() {
                                return;
                            }
                        }
                        Ok(Message::Close(_)) => return,
                        Ok(_) => {}
                        Err(e) => {
                            let _ = in_tx.send(Incoming::Error(e.to_string()));
                            return;
                        }
                    }
                }
            });

            Ok(Connection {
                tx: out_tx,
                rx: in_rx,
            })
        })
    }
}
