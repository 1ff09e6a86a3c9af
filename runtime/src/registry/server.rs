//! Minimal read-only distribution API over HTTP(S).
//!
//! Only what a `pull` needs is implemented: the `/v2/` ping, the manifest
//! and the blobs it references. Every response closes the connection.

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use layerload_core::error::{LoadError, Result};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use super::manifest::{BlobEntry, ServedImage, MANIFEST_MEDIA_TYPE};

/// Upper bound on a request head.
const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Serves one [`ServedImage`] on an ephemeral loopback port.
pub struct RegistryServer {
    listener: TcpListener,
    image: Arc<ServedImage>,
    tls: Option<TlsAcceptor>,
}

impl RegistryServer {
    /// Bind `127.0.0.1:0`, optionally behind a self-signed TLS certificate.
    pub async fn bind(image: ServedImage, tls: bool) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let tls = if tls { Some(tls_acceptor()?) } else { None };
        Ok(Self {
            listener,
            image: Arc::new(image),
            tls,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Pullable reference: `127.0.0.1:<port>/<repo>@<digest>`.
    pub fn reference(&self) -> Result<String> {
        Ok(format!("{}/{}", self.local_addr()?, self.image.image_ref()))
    }

    /// Accept connections until the process is killed.
    pub async fn serve(self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            tls = self.tls.is_some(),
            image = %self.image.image_ref(),
            "Registry listening"
        );

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let image = self.image.clone();
            let tls = self.tls.clone();
            tokio::spawn(async move {
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => handle_connection(stream, &image).await,
                        Err(e) => Err(e),
                    },
                    None => handle_connection(stream, &image).await,
                };
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, error = %e, "Registry connection failed");
                }
            });
        }
    }
}

/// Append the handshake line to `output`.
pub fn announce(output: &Path, reference: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)?;
    file.write_all(format!("{reference}\n").as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// How a request is answered.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route<'a> {
    Ping,
    Manifest,
    Blob(&'a str, &'a BlobEntry),
    NotFound,
    MethodNotAllowed,
}

pub(crate) fn route<'a>(image: &'a ServedImage, method: &str, path: &'a str) -> Route<'a> {
    if method != "GET" && method != "HEAD" {
        return Route::MethodNotAllowed;
    }

    let path = path.split_once('?').map_or(path, |(p, _)| p);
    if path == "/v2/" || path == "/v2" {
        return Route::Ping;
    }

    let Some(rest) = path
        .strip_prefix("/v2/")
        .and_then(|p| p.strip_prefix(image.repo()))
    else {
        return Route::NotFound;
    };

    if let Some(reference) = rest.strip_prefix("/manifests/") {
        if image.is_manifest_reference(reference) {
            return Route::Manifest;
        }
    } else if let Some(digest) = rest.strip_prefix("/blobs/") {
        if let Some(blob) = image.blob(digest) {
            return Route::Blob(digest, blob);
        }
    }
    Route::NotFound
}

async fn handle_connection<S>(mut stream: S, image: &ServedImage) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(head) = read_request_head(&mut stream).await? else {
        return Ok(());
    };

    let mut parts = head.lines().next().unwrap_or("").split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        write_head(&mut stream, "400 Bad Request", &[("Content-Length", "0".to_string())]).await?;
        return finish(stream).await;
    };
    let head_only = method == "HEAD";

    tracing::debug!(method, path, "Registry request");

    match route(image, method, path) {
        Route::Ping => {
            write_head(&mut stream, "200 OK", &[("Content-Length", "0".to_string())]).await?;
        }
        Route::Manifest => {
            let manifest = image.manifest();
            write_head(
                &mut stream,
                "200 OK",
                &[
                    ("Content-Type", MANIFEST_MEDIA_TYPE.to_string()),
                    ("Content-Length", manifest.len().to_string()),
                    ("Docker-Content-Digest", image.manifest_digest().to_string()),
                ],
            )
            .await?;
            if !head_only {
                stream.write_all(manifest).await?;
            }
        }
        Route::Blob(digest, blob) => {
            write_head(
                &mut stream,
                "200 OK",
                &[
                    ("Content-Type", blob.media_type.to_string()),
                    ("Content-Length", blob.size.to_string()),
                    ("Docker-Content-Digest", digest.to_string()),
                ],
            )
            .await?;
            if !head_only {
                let mut file = tokio::fs::File::open(&blob.path).await?;
                tokio::io::copy(&mut file, &mut stream).await?;
            }
        }
        Route::NotFound => {
            write_head(&mut stream, "404 Not Found", &[("Content-Length", "0".to_string())]).await?;
        }
        Route::MethodNotAllowed => {
            write_head(
                &mut stream,
                "405 Method Not Allowed",
                &[("Allow", "GET, HEAD".to_string()), ("Content-Length", "0".to_string())],
            )
            .await?;
        }
    }

    finish(stream).await
}

async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((!buf.is_empty()).then(|| String::from_utf8_lossy(&buf).into_owned()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            return Ok(Some(String::from_utf8_lossy(&buf[..end]).into_owned()));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_head<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: &str,
    headers: &[(&str, String)],
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {status}\r\nDocker-Distribution-API-Version: registry/2.0\r\nConnection: close\r\n"
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await
}

async fn finish<S: AsyncWrite + Unpin>(mut stream: S) -> std::io::Result<()> {
    stream.flush().await?;
    stream.shutdown().await
}

fn tls_acceptor() -> Result<TlsAcceptor> {
    let tls_err = |e: &dyn std::fmt::Display| {
        LoadError::Other(format!("Failed to set up registry TLS: {}", e))
    };

    let key_pair = rcgen::KeyPair::generate().map_err(|e| tls_err(&e))?;
    let params =
        rcgen::CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .map_err(|e| tls_err(&e))?;
    let cert = params.self_signed(&key_pair).map_err(|e| tls_err(&e))?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| tls_err(&e))?
    .with_no_client_auth()
    .with_single_cert(vec![cert.der().clone()], key)
    .map_err(|e| tls_err(&e))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
