//! Listener resolution.
//!
//! The public address names the port clients reach through a fronting
//! proxy; the server itself listens one port below it.

use tokio::net::TcpListener;

use crate::error::ServerError;

/// Host used when the address leaves it empty.
const ANY_HOST: &str = "0.0.0.0";

/// Use `listener` if given, otherwise bind the port below `address`'s.
///
/// # Errors
/// Returns an error if `address` is malformed or the bind fails.
pub async fn resolve_listener(
    listener: Option<TcpListener>,
    address: &str,
) -> Result<TcpListener, ServerError> {
    if let Some(listener) = listener {
        return Ok(listener);
    }
    let bind = derived_bind_address(address)?;
    TcpListener::bind(&bind)
        .await
        .map_err(|source| ServerError::Bind {
            address: bind,
            source,
        })
}

/// The `host:port-1` address the server binds for `address`.
///
/// # Errors
/// Returns an error if `address` has no port, the port is not a number, or
/// the port is zero.
pub fn derived_bind_address(address: &str) -> Result<String, ServerError> {
    let (host, port) = split_host_port(address)?;
    let invalid_port = || ServerError::InvalidPort {
        address: address.to_string(),
        port: port.to_string(),
    };
    // The public port may sit one past the bindable range.
    let parsed: u32 = port.parse().map_err(|_| invalid_port())?;
    let port = parsed.checked_sub(1).ok_or_else(|| ServerError::PortUnderflow {
        address: address.to_string(),
    })?;
    let port = u16::try_from(port).map_err(|_| invalid_port())?;

    let host = if host.is_empty() { ANY_HOST } else { host };
    Ok(if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    })
}

/// Split `host:port` or `[ipv6]:port`.
fn split_host_port(address: &str) -> Result<(&str, &str), ServerError> {
    let invalid = |reason| ServerError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        let port = tail.strip_prefix(':').ok_or_else(|| invalid("missing port"))?;
        return Ok((host, port));
    }

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;
    if host.contains(':') {
        return Err(invalid("too many colons"));
    }
    Ok((host, port))
}
