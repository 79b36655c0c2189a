use pin_project::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{self, AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

#[cfg(feature = "tls")]
use crate::types::error::Result;
#[cfg(feature = "native-tls")]
pub use native_tls_crate::{Error as TlsError, TlsConnector as TlsConfig};
#[cfg(feature = "native-tls")]
use tokio_native_tls::{TlsConnector, TlsStream};
#[cfg(feature = "rustls-tls")]
pub use rustls::{ClientConfig as TlsConfig, Error as TlsError};
#[cfg(feature = "rustls-tls")]
use tokio_rustls::{client::TlsStream, TlsConnector};

/// The transport under a connection
///
/// Every connection starts out as plain TCP because the server greeting arrives in the clear.
/// If the server or the client demands TLS, the transport is upgraded in place and the rest of
/// the handshake continues over the encrypted stream.
#[pin_project(project = TransportProj)]
#[derive(Debug)]
pub enum TlsOrTcpStream {
    Tcp(#[pin] TcpStream),
    #[cfg(feature = "tls")]
    Tls(#[pin] TlsStream<TcpStream>),
}

impl TlsOrTcpStream {
    pub fn new(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    #[cfg(feature = "tls")]
    pub async fn upgrade(self, tls_config: TlsConfig, domain: &str) -> Result<Self> {
        match self {
            Self::Tcp(stream) => Ok(Self::Tls(handshake(tls_config, domain, stream).await?)),
            // Already upgraded
            upgraded @ Self::Tls(_) => Ok(upgraded),
        }
    }
}

#[cfg(feature = "native-tls")]
async fn handshake(
    tls_config: TlsConfig,
    domain: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(tls_config);
    Ok(connector.connect(domain, stream).await?)
}

#[cfg(feature = "rustls-tls")]
async fn handshake(
    tls_config: TlsConfig,
    domain: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    use crate::types::error::Error;
    use rustls::ServerName;
    use std::{convert::TryFrom, sync::Arc};

    let connector = TlsConnector::from(Arc::new(tls_config));
    let name = ServerName::try_from(domain)
        .map_err(|_| Error::InvalidDnsName(String::from(domain)))?;
    Ok(connector.connect(name, stream).await?)
}

macro_rules! delegate {
    ($self:ident, $stream:ident => $call:expr) => {
        match $self.project() {
            TransportProj::Tcp($stream) => $call,
            #[cfg(feature = "tls")]
            TransportProj::Tls($stream) => $call,
        }
    };
}

impl AsyncRead for TlsOrTcpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<io::Result<()>> {
        delegate!(self, stream => stream.poll_read(cx, buf))
    }
}

impl AsyncWrite for TlsOrTcpStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        delegate!(self, stream => stream.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        delegate!(self, stream => stream.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        delegate!(self, stream => stream.poll_shutdown(cx))
    }
}
