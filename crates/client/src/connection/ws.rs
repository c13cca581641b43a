// WebSocket transport over tokio-tungstenite.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{ConnectionError, Connector, Frame, TransportEvent, TransportLink};

/// Production transport: one WebSocket, split into a writer and a reader task.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<TransportLink, ConnectionError>> + Send {
        let url = url.to_owned();
        async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|error| ConnectionError::Connect(error.to_string()))?;
            let (mut sink, mut source) = stream.split();

            let (outgoing, mut out_rx) = mpsc::unbounded_channel::<Frame>();
            let (in_tx, incoming) = mpsc::unbounded_channel::<TransportEvent>();

            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    let message = match frame {
                        Frame::Text(text) => Message::Text(text.into()),
                        Frame::Binary(bytes) => Message::Binary(bytes.into()),
                    };
                    if let Err(error) = sink.send(message).await {
                        debug!(%error, "websocket write failed");
                        return;
                    }
                }
                // Sender dropped: the manager is done with this link.
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    let event = match message {
                        Ok(Message::Text(text)) => TransportEvent::Frame(Frame::Text(text.as_str().to_owned())),
                        Ok(Message::Binary(bytes)) => TransportEvent::Frame(Frame::Binary(bytes.to_vec())),
                        Ok(Message::Close(frame)) => {
                            let reason = frame.map(|f| f.reason.as_str().to_owned());
                            let _ = in_tx.send(TransportEvent::Closed(reason));
                            return;
                        }
                        Ok(_) => continue,
                        Err(error) => {
                            let _ = in_tx.send(TransportEvent::Error(error.to_string()));
                            return;
                        }
                    };
                    if in_tx.send(event).is_err() {
                        return;
                    }
                }
                let _ = in_tx.send(TransportEvent::Closed(None));
            });

            Ok(TransportLink { outgoing, incoming })
        }
    }
}
