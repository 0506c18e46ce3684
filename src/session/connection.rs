//! Websocket connection to the realtime endpoint

use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on the closing handshake once the outbound queue is drained
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Queue for outbound messages; sends never wait on the network
pub type Outbound = mpsc::UnboundedSender<ClientMessage>;

/// An open, set-up realtime connection
pub struct Connection {
    outbound: Outbound,
    inbound: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Connect, send the setup, and wait for the server to accept it
    ///
    /// The whole handshake is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeFailed` on connection, auth, or protocol failure, or
    /// when `timeout` elapses
    pub async fn open(
        endpoint: &Url,
        api_key: &SecretString,
        setup: ClientMessage,
        timeout: Duration,
    ) -> Result<Self> {
        tracing::info!(endpoint = %endpoint, "connecting to realtime endpoint");

        match tokio::time::timeout(timeout, Self::handshake(endpoint, api_key, setup)).await {
            Ok(result) => result,
            Err(_) => Err(Error::HandshakeFailed(format!(
                "no response within {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn handshake(endpoint: &Url, api_key: &SecretString, setup: ClientMessage) -> Result<Self> {
        let mut url = endpoint.clone();
        url.query_pairs_mut().append_pair("key", api_key.expose_secret());

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;
        let (mut sink, mut inbound) = ws.split();

        let setup = setup.to_json()?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

        loop {
            let frame = inbound
                .next()
                .await
                .ok_or_else(|| Error::HandshakeFailed("connection closed during setup".to_string()))?
                .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

            for message in classify(frame)? {
                match message {
                    ServerMessage::SetupComplete => {
                        tracing::info!("realtime session established");
                        let (outbound, rx) = mpsc::unbounded_channel();
                        let writer = tokio::spawn(write_loop(sink, rx));
                        return Ok(Self {
                            outbound,
                            inbound,
                            writer,
                        });
                    }
                    ServerMessage::Closed { code, reason } => {
                        return Err(Error::HandshakeFailed(match code {
                            Some(code) => format!("closed by server ({code}): {reason}"),
                            None => "closed by server".to_string(),
                        }));
                    }
                    ServerMessage::Error(message) => return Err(Error::HandshakeFailed(message)),
                    other => tracing::debug!(?other, "ignoring message before setup complete"),
                }
            }
        }
    }

    /// Sender for outbound messages
    #[must_use]
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Wait for the next inbound frame and classify it
    ///
    /// End of stream is reported as [`ServerMessage::Closed`].
    ///
    /// # Errors
    ///
    /// Returns `Decode` for a malformed frame (the connection is still
    /// usable) and `Remote` for transport failures
    pub async fn recv(&mut self) -> Result<Vec<ServerMessage>> {
        match self.inbound.next().await {
            Some(Ok(frame)) => classify(frame),
            Some(Err(e)) => Err(Error::Remote(e.to_string())),
            None => Ok(vec![ServerMessage::Closed {
                code: None,
                reason: "stream ended".to_string(),
            }]),
        }
    }

    /// Release the connection without waiting for the peer
    ///
    /// The writer flushes what is queued and sends a close frame in the
    /// background, giving up after a short timeout if the peer stalls.
    pub fn close(self) {
        let Self {
            outbound, writer, ..
        } = self;
        drop(outbound);
        drop(writer);
        tracing::debug!("realtime connection released");
    }
}

/// Drain the outbound queue into the socket, in order
async fn write_loop(
    mut sink: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<ClientMessage>,
) {
    while let Some(message) = rx.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize outbound message");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::warn!(error = %e, "failed to send websocket message");
            return;
        }
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None)))
        .await
        .is_err()
    {
        tracing::warn!("peer did not accept close frame, dropping socket");
    }
    tracing::debug!("websocket writer finished");
}

/// Turn a websocket frame into protocol messages
fn classify(frame: Message) -> Result<Vec<ServerMessage>> {
    match frame {
        Message::Text(text) => ServerMessage::parse(text.as_bytes()),
        Message::Binary(data) => ServerMessage::parse(&data),
        Message::Close(frame) => Ok(vec![match frame {
            Some(frame) => ServerMessage::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.to_string(),
            },
            None => ServerMessage::Closed {
                code: None,
                reason: String::new(),
            },
        }]),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Vec::new()),
    }
}

/// Whether a close code means an orderly shutdown
#[must_use]
pub fn is_normal_close(code: Option<u16>) -> bool {
    code.is_none_or(|code| {
        code == u16::from(CloseCode::Normal) || code == u16::from(CloseCode::Away)
    })
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    use super::*;
    use crate::tools::ToolResult;

    type ServerWs = WebSocketStream<TcpStream>;

    /// Accept one websocket client on a local port and hand it to `handler`
    async fn serve_once<F, Fut>(handler: F) -> Url
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            handler(ws).await;
        });

        Url::parse(&format!("ws://{addr}/live")).unwrap()
    }

    /// Read the client's setup frame
    async fn expect_setup(ws: &mut ServerWs) {
        let frame = ws.next().await.unwrap().unwrap();
        let text = frame.into_text().unwrap();
        assert!(text.as_str().starts_with(r#"{"setup""#));
    }

    /// Keep reading until the client goes away
    async fn drain(mut ws: ServerWs) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    fn key() -> SecretString {
        SecretString::from("test-key")
    }

    fn reply(id: &str) -> ClientMessage {
        ClientMessage::tool_response(ToolResult {
            id: id.to_string(),
            name: "getTasks".to_string(),
            result: "The task list is empty.".to_string(),
        })
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let url = serve_once(|mut ws| async move {
            expect_setup(&mut ws).await;
            drain(ws).await;
        })
        .await;

        let started = tokio::time::Instant::now();
        let result = Connection::open(&url, &key(), ClientMessage::setup(), Duration::from_millis(200)).await;

        assert!(matches!(result, Err(Error::HandshakeFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn setup_complete_opens_and_writes_in_order() {
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let url = serve_once(move |mut ws| async move {
            expect_setup(&mut ws).await;
            ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
                .await
                .unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                let closing = frame.is_close();
                seen_tx.send(frame).unwrap();
                if closing {
                    break;
                }
            }
        })
        .await;

        let connection = tokio_test::assert_ok!(
            Connection::open(&url, &key(), ClientMessage::setup(), Duration::from_secs(5)).await
        );
        connection.outbound().send(reply("fc-1")).unwrap();
        connection.outbound().send(reply("fc-2")).unwrap();
        connection.close();

        let mut ids = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), seen.recv())
                .await
                .unwrap()
                .unwrap();
            match frame {
                Message::Text(text) => {
                    let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    ids.push(json["toolResponse"]["functionResponses"][0]["id"].clone());
                }
                Message::Close(_) => break,
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(ids, vec!["fc-1", "fc-2"]);
    }

    #[tokio::test]
    async fn policy_close_during_setup_fails_handshake() {
        let url = serve_once(|mut ws| async move {
            expect_setup(&mut ws).await;
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "API key not valid".into(),
            }))
            .await
            .unwrap();
            drain(ws).await;
        })
        .await;

        let result = Connection::open(&url, &key(), ClientMessage::setup(), Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(Error::HandshakeFailed(reason)) if reason.contains("1008") && reason.contains("API key not valid")
        ));
    }

    #[tokio::test]
    async fn server_error_during_setup_fails_handshake() {
        let url = serve_once(|mut ws| async move {
            expect_setup(&mut ws).await;
            ws.send(Message::Text(r#"{"error":{"message":"quota exceeded"}}"#.into()))
                .await
                .unwrap();
            drain(ws).await;
        })
        .await;

        let result = Connection::open(&url, &key(), ClientMessage::setup(), Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(Error::HandshakeFailed(reason)) if reason == "quota exceeded"
        ));
    }

    #[tokio::test]
    async fn dropped_socket_during_setup_fails_handshake() {
        let url = serve_once(|mut ws| async move {
            expect_setup(&mut ws).await;
            drop(ws);
        })
        .await;

        let result = Connection::open(&url, &key(), ClientMessage::setup(), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::HandshakeFailed(_))));
    }

    #[test]
    fn binary_frames_carry_json() {
        let frame = Message::Binary(br#"{"setupComplete":{}}"#.to_vec().into());
        assert_eq!(classify(frame).unwrap(), vec![ServerMessage::SetupComplete]);
    }

    #[test]
    fn close_frame_becomes_closed_message() {
        let frame = Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "API key not valid".into(),
        }));
        assert_eq!(
            classify(frame).unwrap(),
            vec![ServerMessage::Closed {
                code: Some(1008),
                reason: "API key not valid".to_string()
            }]
        );
    }

    #[test]
    fn control_frames_are_ignored() {
        assert!(classify(Message::Ping(vec![1].into())).unwrap().is_empty());
    }

    #[test]
    fn normal_close_codes() {
        assert!(is_normal_close(None));
        assert!(is_normal_close(Some(1000)));
        assert!(is_normal_close(Some(1001)));
        assert!(!is_normal_close(Some(1008)));
        assert!(!is_normal_close(Some(1011)));
    }
}
