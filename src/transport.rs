use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, info};

use crate::config::ConnectConfig;
use crate::{Result, USER_AGENT, WsctlError};

// Bidirectional byte connection with per-operation deadlines. One operation
// at a time; callers own the connection exclusively.
#[trait_variant::make(Connection: Send)]
pub trait LocalConnection {
    async fn send(&mut self, data: &[u8], deadline: Duration) -> Result<()>;

    // Returns the next message payload, cut to at most `max_bytes`
    async fn receive(&mut self, max_bytes: usize, deadline: Duration) -> Result<Vec<u8>>;
}

// WebSocket client connection
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsConnection {
    pub async fn dial(config: &ConnectConfig, deadline: Duration) -> Result<Self> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| WsctlError::Config(format!("invalid url '{}': {}", config.url, e)))?;

        let headers = request.headers_mut();
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, header_value(&config.subprotocol)?);
        headers.insert(header::ORIGIN, header_value(&config.origin.origin().ascii_serialization())?);
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        let connector = if config.url.scheme() == "wss" {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(config.insecure)
                .danger_accept_invalid_hostnames(config.insecure)
                .build()
                .map_err(|e| WsctlError::Transport(format!("TLS setup failed: {}", e)))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        debug!("Dialing {} (subprotocol {})", config.url, config.subprotocol);
        let (stream, _) = timeout(deadline, connect_async_tls_with_config(request, None, false, connector))
            .await
            .map_err(|_| WsctlError::Timeout {
                operation: "connect",
                timeout: deadline,
            })?
            .map_err(|e| WsctlError::Transport(format!("failed to connect to {}: {}", config.url, e)))?;

        info!("Connected to {}", config.url);
        Ok(WsConnection { stream })
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| WsctlError::Transport(format!("close failed: {}", e)))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| WsctlError::Config(format!("invalid header value '{}'", value)))
}

impl Connection for WsConnection {
    async fn send(&mut self, data: &[u8], deadline: Duration) -> Result<()> {
        // Text frames for text payloads, as SIP over WebSocket expects
        let message = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::binary(data.to_vec()),
        };

        timeout(deadline, self.stream.send(message))
            .await
            .map_err(|_| WsctlError::Timeout {
                operation: "send",
                timeout: deadline,
            })?
            .map_err(|e| WsctlError::Transport(format!("write failed: {}", e)))?;

        debug!("Sent {} bytes", data.len());
        Ok(())
    }

    async fn receive(&mut self, max_bytes: usize, deadline: Duration) -> Result<Vec<u8>> {
        let read = async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                    Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                    Some(Ok(Message::Close(_))) | None => return Err(WsctlError::ConnectionClosed),
                    // Control frames are answered by the stream itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(WsctlError::Transport(format!("read failed: {}", e))),
                }
            }
        };

        let mut data = timeout(deadline, read).await.map_err(|_| WsctlError::Timeout {
            operation: "receive",
            timeout: deadline,
        })??;

        if data.len() > max_bytes {
            debug!("Truncating {} byte message to {} bytes", data.len(), max_bytes);
            data.truncate(max_bytes);
        }
        debug!("Received {} bytes", data.len());
        Ok(data)
    }
}
