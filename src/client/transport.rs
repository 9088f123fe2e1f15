use super::settings::ClientSettings;
use super::tls::server_name;
use crate::pool::{Connection, Destination};
use crate::utils::error::Result;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::trace;

/// Blocking socket held by the plain and TLS-trusting flavors.
#[derive(Debug)]
pub enum BlockingTransport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl BlockingTransport {
    pub fn tcp(&self) -> &TcpStream {
        match self {
            BlockingTransport::Plain(stream) => stream,
            BlockingTransport::Tls(tls) => tls.get_ref(),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, BlockingTransport::Tls(_))
    }
}

impl Read for BlockingTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockingTransport::Plain(stream) => stream.read(buf),
            BlockingTransport::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for BlockingTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockingTransport::Plain(stream) => stream.write(buf),
            BlockingTransport::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockingTransport::Plain(stream) => stream.flush(),
            BlockingTransport::Tls(tls) => tls.flush(),
        }
    }
}

impl Connection for BlockingTransport {
    fn close(self) -> io::Result<()> {
        match self {
            BlockingTransport::Plain(stream) => stream.shutdown(Shutdown::Both),
            BlockingTransport::Tls(mut tls) => {
                tls.conn.send_close_notify();
                // Best effort; the peer may already be gone
                let _ = tls.conn.complete_io(&mut tls.sock);
                tls.sock.shutdown(Shutdown::Both)
            }
        }
    }
}

/// Non-blocking socket held by the async flavor.
#[derive(Debug)]
pub enum AsyncTransport {
    Plain(tokio::net::TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>),
}

impl AsyncTransport {
    pub fn tcp(&self) -> &tokio::net::TcpStream {
        match self {
            AsyncTransport::Plain(stream) => stream,
            AsyncTransport::Tls(tls) => tls.get_ref().0,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, AsyncTransport::Tls(_))
    }
}

impl AsyncRead for AsyncTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncTransport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            AsyncTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AsyncTransport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            AsyncTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncTransport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            AsyncTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncTransport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            AsyncTransport::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

impl Connection for AsyncTransport {
    fn close(self) -> io::Result<()> {
        // Closing happens outside any runtime, so shut the socket down directly
        SockRef::from(self.tcp()).shutdown(Shutdown::Both)
    }
}

fn configure_blocking_socket(stream: &TcpStream, settings: &ClientSettings) -> io::Result<()> {
    let socket = SockRef::from(stream);
    socket.set_nodelay(settings.tcp_nodelay)?;
    socket.set_read_timeout(Some(settings.timeouts.socket))?;
    socket.set_write_timeout(Some(settings.timeouts.socket))?;
    Ok(())
}

/// Open a blocking transport to `destination`, performing the TLS handshake for `https`.
pub fn connect_blocking(
    destination: &Destination,
    settings: &ClientSettings,
    tls: &Arc<ClientConfig>,
) -> Result<BlockingTransport> {
    let connect_timeout = settings.timeouts.connect;
    let mut last_error = None;
    let mut connected = None;

    for addr in destination.authority().to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(stream) => {
                connected = Some(stream);
                break;
            }
            Err(e) => {
                trace!("Connect to {} ({}) failed: {}", destination, addr, e);
                last_error = Some(e);
            }
        }
    }

    let stream = match connected {
        Some(stream) => stream,
        None => {
            return Err(last_error
                .unwrap_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("No addresses resolved for {}", destination),
                    )
                })
                .into())
        }
    };
    configure_blocking_socket(&stream, settings)?;

    if !destination.scheme().is_secure() {
        return Ok(BlockingTransport::Plain(stream));
    }

    let connection = ClientConnection::new(Arc::clone(tls), server_name(destination.host())?)?;
    let mut tls_stream = StreamOwned::new(connection, stream);
    while tls_stream.conn.is_handshaking() {
        tls_stream.conn.complete_io(&mut tls_stream.sock)?;
    }
    trace!("TLS handshake with {} complete", destination);

    Ok(BlockingTransport::Tls(Box::new(tls_stream)))
}

/// Open an async transport to `destination`. Connect and handshake share the connect timeout.
pub async fn connect_async(
    destination: Destination,
    settings: Arc<ClientSettings>,
    tls: TlsConnector,
) -> Result<AsyncTransport> {
    let connect_timeout = settings.timeouts.connect;
    let timed_out = || {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!(
                "Connection to {} timed out after {:?}",
                destination, connect_timeout
            ),
        )
    };

    let stream = match timeout(
        connect_timeout,
        tokio::net::TcpStream::connect(destination.authority()),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(timed_out().into()),
    };
    stream.set_nodelay(settings.tcp_nodelay)?;

    if !destination.scheme().is_secure() {
        return Ok(AsyncTransport::Plain(stream));
    }

    let name = server_name(destination.host())?;
    match timeout(connect_timeout, tls.connect(name, stream)).await {
        Ok(Ok(tls_stream)) => {
            trace!("TLS handshake with {} complete", destination);
            Ok(AsyncTransport::Tls(Box::new(tls_stream)))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(timed_out().into()),
    }
}
