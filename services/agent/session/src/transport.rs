//! TCP and TLS transport for hub sessions.

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::channel::ChannelError;

/// Connect to a `host:port` address, resolving names as needed
pub async fn connect_tcp(addr: &str) -> tokio::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Run the client side of a TLS handshake over an established TCP stream
pub async fn connect_tls(
    config: Arc<ClientConfig>,
    tcp_stream: TcpStream,
    sni: &str,
) -> Result<TlsStream<TcpStream>, ChannelError> {
    debug!("Connecting via TLS (SNI: {})", sni);

    let server_name = ServerName::try_from(sni.to_owned())
        .map_err(|_| ChannelError::InvalidAddress(sni.to_string()))?;

    let connector = TlsConnector::from(config);
    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| ChannelError::Tls(format!("handshake with {} failed: {}", sni, e)))?;

    debug!("TLS connection established (SNI: {})", sni);
    Ok(tls_stream)
}

/// Host part of a `host:port` address, used as the TLS server name
pub fn server_name(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
