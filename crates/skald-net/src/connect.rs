use crate::codec::IrcCodec;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tokio_util::{codec::Framed, either::Either};

pub const PLAIN_PORT: u16 = 6667;
pub const TLS_PORT: u16 = 6697;

/// Inbound line-length cap: 512 bytes of message plus an 8191-byte tag
/// section (the line ending is not counted by the framer).
pub const MAX_INBOUND_LINE: usize = 512 + 8191;

pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

pub type Connection = Either<TcpStream, TlsStream>;

/// The connection as a stream & sink of framed IRC lines.
pub type IrcChannel = Framed<Connection, IrcCodec>;

/// Open a TCP connection to `host:port` and frame it into lines.  With
/// `tls`, the stream is first wrapped in rustls, verified against the
/// system certificate store.
pub async fn connect(host: &str, port: u16, tls: bool) -> Result<IrcChannel, ConnectError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|source| ConnectError::Unreachable {
            host: host.to_owned(),
            port,
            source,
        })?;
    tracing::debug!(host, port, tls, "Transport established");
    let conn = if tls {
        let connector = tls_connector()?;
        let name = server_name(host)?;
        let stream =
            connector
                .connect(name, stream)
                .await
                .map_err(|source| ConnectError::Handshake {
                    host: host.to_owned(),
                    source,
                })?;
        tracing::debug!(host, "TLS handshake complete");
        Either::Right(stream)
    } else {
        Either::Left(stream)
    };
    Ok(Framed::new(conn, IrcCodec::new(MAX_INBOUND_LINE)))
}

/// Build a TLS connector trusting the system roots.  Certificates the
/// platform store cannot hand over cleanly are skipped with a warning;
/// only an empty store is fatal, since then no server could ever verify.
fn tls_connector() -> Result<TlsConnector, ConnectError> {
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        tracing::warn!(%error, "Skipping unreadable system certificate");
    }
    let mut roots = RootCertStore::empty();
    let (added, _) = roots.add_parsable_certificates(loaded.certs);
    if added == 0 {
        return Err(ConnectError::NoRoots);
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

fn server_name(host: &str) -> Result<ServerName<'static>, ConnectError> {
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| ConnectError::BadServerName {
            host: host.to_owned(),
        })
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not reach {host}:{port}")]
    Unreachable {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable root certificates on this system")]
    NoRoots,
    #[error("{host:?} is not a valid TLS server name")]
    BadServerName { host: String },
    #[error("TLS handshake with {host} failed")]
    Handshake {
        host: String,
        #[source]
        source: std::io::Error,
    },
}
