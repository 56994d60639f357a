//! Bidirectional channel to the live model.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::Result;
use tungstenite::Message;

use super::messages::{ClientMessage, LiveSetup};
use crate::error::LiveError;

type Socket = tungstenite::WebSocket<native_tls::TlsStream<TcpStream>>;

/// One read from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A text payload (binary frames holding UTF-8 are converted)
    Frame(String),
    /// Nothing arrived within the poll timeout
    Idle,
    /// The remote side closed the channel
    Closed(Option<String>),
}

pub trait LiveChannel: Send {
    fn send(&mut self, message: &ClientMessage) -> Result<(), LiveError>;
    fn recv(&mut self) -> Result<Inbound, LiveError>;
    fn close(&mut self);
}

pub trait LiveConnector: Send + Sync {
    /// Open a channel and send the setup message on it.
    fn connect(&self, setup: &LiveSetup) -> Result<Box<dyn LiveChannel>, LiveError>;
}

/// TLS WebSocket to the BidiGenerateContent endpoint.
pub struct GeminiLiveConnector {
    url: String,
    api_key: String,
    poll_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            poll_timeout: Duration::from_millis(50),
        }
    }

    pub fn from_config(config: &crate::config::NexusConfig) -> Result<Self, crate::error::ConfigError> {
        Ok(Self::new(config.live_url.clone(), config.api_key()?))
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn connect_websocket(&self) -> Result<Socket> {
        let ws_url = format!("{}?key={}", self.url, self.api_key);
        let url = url::Url::parse(&ws_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("No host in URL"))?;
        let port = url.port_or_known_default().unwrap_or(443);

        let addr = format!("{}:{}", host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to resolve hostname: {}", host))?;
        tracing::debug!(target: "nexus::live", %addr, "Resolved {}", host);

        let tcp_stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))?;
        // Long timeouts while the handshake runs
        tcp_stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        tcp_stream.set_write_timeout(Some(Duration::from_secs(30)))?;
        tcp_stream.set_nodelay(true)?;

        let connector = native_tls::TlsConnector::new()?;
        let tls_stream = connector.connect(host, tcp_stream)?;
        let (socket, _response) = tungstenite::client::client(ws_url.as_str(), tls_stream)?;
        Ok(socket)
    }
}

impl LiveConnector for GeminiLiveConnector {
    fn connect(&self, setup: &LiveSetup) -> Result<Box<dyn LiveChannel>, LiveError> {
        tracing::info!(target: "nexus::live", model = %setup.model, "Connecting live channel");
        let socket = self
            .connect_websocket()
            .map_err(|e| LiveError::Connect(e.to_string()))?;

        let mut channel = WebSocketChannel { socket };
        channel.send(&ClientMessage::Setup(setup.clone()))?;
        channel
            .set_poll_timeout(self.poll_timeout)
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        Ok(Box::new(channel))
    }
}

pub struct WebSocketChannel {
    socket: Socket,
}

impl WebSocketChannel {
    /// Short read timeout so `recv` can poll alongside outbound traffic.
    fn set_poll_timeout(&mut self, timeout: Duration) -> Result<()> {
        let tcp_stream = self.socket.get_mut().get_mut();
        tcp_stream.set_read_timeout(Some(timeout))?;
        Ok(())
    }
}

impl LiveChannel for WebSocketChannel {
    fn send(&mut self, message: &ClientMessage) -> Result<(), LiveError> {
        let text = message.to_json().to_string();
        self.socket
            .send(Message::Text(text.into()))
            .map_err(|e| LiveError::Transport(e.to_string()))
    }

    fn recv(&mut self) -> Result<Inbound, LiveError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Inbound::Frame(text.as_str().to_string())),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Ok(Inbound::Frame(text)),
                Err(_) => {
                    tracing::warn!(target: "nexus::live", len = data.len(), "Ignoring non-UTF-8 binary frame");
                    Ok(Inbound::Idle)
                }
            },
            Ok(Message::Close(frame)) => Ok(Inbound::Closed(
                frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str())),
            )),
            Ok(_) => Ok(Inbound::Idle),
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(Inbound::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(Inbound::Closed(None))
            }
            Err(e) => Err(LiveError::Transport(e.to_string())),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}
