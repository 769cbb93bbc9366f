/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Apribuste, a POP3 mail retrieval library.
 *
 * Apribuste is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Apribuste is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Apribuste.  If not, see <http://www.gnu.org/licenses/>.
 */

//! TCP and TLS connection helpers.
//!
//! Implicit TLS handshakes immediately on connect; STARTTLS connects plain
//! and upgrades the same stream once the server has agreed (STLS). Both
//! produce a [`BoxedStream`] so the transport does not care which it got.

use std::sync::{Arc, OnceLock};

use tokio::net::TcpStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;

use crate::config::Security;
use crate::protocol::pop3::{BoxedStream, Pop3Error};

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        tracing::debug!("no native root certificates, using webpki roots");
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

/// Default TLS client config (native + Mozilla roots, no client auth).
fn default_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    Arc::new(config)
}

static DEFAULT_CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

pub fn default_connector() -> &'static TlsConnector {
    DEFAULT_CONNECTOR.get_or_init(|| TlsConnector::from(default_client_config()))
}

/// Open a TCP connection to `host:port`, with an immediate TLS handshake for
/// [`Security::Tls`]. STARTTLS connections start plain.
pub async fn connect(host: &str, port: u16, security: Security) -> Result<BoxedStream, Pop3Error> {
    let tcp = TcpStream::connect((host, port)).await?;
    let _ = tcp.set_nodelay(true);
    tracing::debug!(host, port, security = security.name(), "connected");
    match security {
        Security::Tls => upgrade_to_tls(Box::new(tcp), host).await,
        Security::None | Security::StartTls => Ok(Box::new(tcp)),
    }
}

/// TLS handshake over an existing stream with the default connector.
pub async fn upgrade_to_tls(stream: BoxedStream, host: &str) -> Result<BoxedStream, Pop3Error> {
    upgrade_to_tls_with(default_connector(), stream, host).await
}

/// TLS handshake over an existing stream, verifying the certificate for `host`.
pub async fn upgrade_to_tls_with(
    connector: &TlsConnector,
    stream: BoxedStream,
    host: &str,
) -> Result<BoxedStream, Pop3Error> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Pop3Error::Tls(format!("invalid host name: {}", host)))?;
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Pop3Error::Tls(e.to_string()))?;
    Ok(Box::new(tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_store_is_never_empty() {
        assert!(!build_root_store().is_empty());
    }

    #[tokio::test]
    async fn invalid_host_name_is_a_tls_error() {
        let (client, _server) = tokio::io::duplex(64);
        let r = upgrade_to_tls(Box::new(client), "not a host name").await;
        assert!(matches!(r, Err(Pop3Error::Tls(_))));
    }

    #[tokio::test]
    async fn handshake_failure_is_a_tls_error() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let r = upgrade_to_tls(Box::new(client), "mail.example.com").await;
        assert!(matches!(r, Err(Pop3Error::Tls(_))));
    }
}
