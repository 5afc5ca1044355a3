//! Minimal SOCKS5 CONNECT client (RFC 1928) for the overlay daemon's local
//! proxy. Only what the dialer needs: no authentication, domain-name
//! addressing, and a single CONNECT per stream.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Open a stream to `host:port` through the SOCKS proxy at `proxy_addr`.
///
/// The returned stream is positioned past the handshake; bytes written and
/// read afterwards flow end-to-end.
pub(crate) async fn connect(proxy_addr: SocketAddr, host: &str, port: u16) -> Result<TcpStream> {
    if host.len() > 255 {
        bail!("hostname too long for socks addressing: {host}");
    }

    let mut stream = TcpStream::connect(proxy_addr)
        .await
        .with_context(|| format!("failed to connect to overlay proxy at {proxy_addr}"))?;

    // Greeting: offer exactly one method, no authentication.
    stream
        .write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])
        .await
        .context("failed to send socks greeting")?;

    let mut method = [0u8; 2];
    stream
        .read_exact(&mut method)
        .await
        .context("failed to read socks method selection")?;
    if method[0] != SOCKS_VERSION || method[1] != METHOD_NO_AUTH {
        bail!(
            "proxy rejected authentication methods (version {}, method {:#04x})",
            method[0],
            method[1]
        );
    }

    // CONNECT request with the workspace name as a domain address.
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .context("failed to send socks connect request")?;

    let mut head = [0u8; 4];
    stream
        .read_exact(&mut head)
        .await
        .context("failed to read socks connect reply")?;
    if head[0] != SOCKS_VERSION {
        bail!("bad socks version in reply: {}", head[0]);
    }
    if head[1] != 0x00 {
        bail!("proxy connect to {host}:{port} failed: {}", reply_error(head[1]));
    }

    // Drain the bound address so the stream starts at the payload.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .context("failed to read socks bound address length")?;
            len[0] as usize
        }
        other => bail!("unsupported address type in socks reply: {other:#04x}"),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut bound)
        .await
        .context("failed to read socks bound address")?;

    Ok(stream)
}

fn reply_error(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "ttl expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
