use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::messages::ServerMessage;
use crate::{Error, Result};

/// Write half of a client connection.
#[async_trait]
pub trait ClientSender: Send {
    /// # Errors
    /// Returns `Error::Transport` when the message cannot be written.
    async fn send(&mut self, message: ServerMessage) -> Result<()>;

    /// Best-effort close; failures are ignored.
    async fn close(&mut self);
}

/// Read half of a client connection.
#[async_trait]
pub trait ClientReceiver: Send + 'static {
    /// Next text message. `None` once the client has gone away.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// An accepted end-user connection that can be split into independent halves.
pub trait ClientConnection: Send {
    type Sender: ClientSender;
    type Receiver: ClientReceiver;

    fn into_split(self) -> (Self::Sender, Self::Receiver);
}

pub struct WsClientSender(SplitSink<WebSocket, Message>);

pub struct WsClientReceiver(SplitStream<WebSocket>);

impl ClientConnection for WebSocket {
    type Sender = WsClientSender;
    type Receiver = WsClientReceiver;

    fn into_split(self) -> (Self::Sender, Self::Receiver) {
        let (write, read) = StreamExt::split(self);
        (WsClientSender(write), WsClientReceiver(read))
    }
}

#[async_trait]
impl ClientSender for WsClientSender {
    async fn send(&mut self, message: ServerMessage) -> Result<()> {
        let json = message.to_json()?;
        self.0
            .send(Message::Text(json))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
        let _ = SinkExt::close(&mut self.0).await;
    }
}

#[async_trait]
impl ClientReceiver for WsClientReceiver {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Binary(bytes)) => {
                    tracing::debug!(len = bytes.len(), "Ignoring binary frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(err) => return Some(Err(Error::Transport(err.to_string()))),
            }
        }
    }
}
