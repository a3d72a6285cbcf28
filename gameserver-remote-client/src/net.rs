use crate::ErrorKind;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};

/// Runs an I/O future under a deadline, labelling any failure with `context`.
pub(crate) async fn timed<T, F>(
    timeout: Duration,
    context: &'static str,
    future: F,
) -> crate::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ErrorKind::Io { context, source }.into()),
        Err(_) => Err(ErrorKind::Timeout { context }.into()),
    }
}

/// Binds an ephemeral UDP socket of the right address family and connects it to `addr`.
pub(crate) async fn connect_udp<A: ToSocketAddrs>(
    addr: A,
    timeout: Duration,
) -> crate::Result<UdpSocket> {
    let target = timed(timeout, "resolve address", lookup_host(addr))
        .await?
        .next()
        .ok_or(ErrorKind::Io {
            context: "resolve address",
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        })?;

    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|source| ErrorKind::Io { context: "bind udp socket", source })?;
    socket
        .connect(target)
        .await
        .map_err(|source| ErrorKind::Io { context: "connect udp socket", source })?;

    Ok(socket)
}
