//! Client-side transport setup
//!
//! The relay address is dialed over plain TCP or, when a [`ClientTls`] is
//! supplied, TLS with the client certificate presented for mutual
//! authentication. Both the control connection and every answering bridge
//! transport go through the same path.

use std::sync::Arc;

use rendez_proto::BoxedTransport;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::ClientError;

/// TLS material for connecting to the relay.
#[derive(Clone)]
pub struct ClientTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl ClientTls {
    /// Build from a rustls client config and the name the relay's
    /// certificate is expected to carry.
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: &str) -> Result<ClientTls, ClientError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::InvalidServerName(server_name.to_string()))?;
        Ok(ClientTls {
            connector: TlsConnector::from(config),
            server_name,
        })
    }
}

/// Open a transport to the relay, completing the TLS handshake when
/// configured.
pub(crate) async fn connect_transport(
    addr: &str,
    tls: Option<&ClientTls>,
) -> Result<BoxedTransport, ClientError> {
    let socket = TcpStream::connect(addr).await?;
    socket.set_nodelay(true).ok();
    match tls {
        Some(tls) => {
            let stream = tls
                .connector
                .connect(tls.server_name.clone(), socket)
                .await?;
            Ok(Box::new(stream))
        }
        None => Ok(Box::new(socket)),
    }
}
