//! Integration tests: the registry server over a real loopback socket.

use std::net::SocketAddr;
use std::path::Path;

use layerload_runtime::registry::{RegistryServer, ServedImage};
use layerload_runtime::Digest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CONFIG: &[u8] = b"{\"architecture\":\"amd64\",\"os\":\"linux\"}";
const LAYER: &[u8] = b"not really a tarball";

fn image(dir: &Path) -> ServedImage {
    let config = dir.join("config.json");
    let layer = dir.join("layer.tar");
    std::fs::write(&config, CONFIG).unwrap();
    std::fs::write(&layer, LAYER).unwrap();
    std::fs::write(dir.join("layer.tar.sha256"), Digest::sha256_of(LAYER).hex()).unwrap();
    ServedImage::build(
        "layerload-test",
        &config,
        &dir.join("config.json.sha256"),
        &[(dir.join("layer.tar.sha256"), layer)],
    )
    .unwrap()
}

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn request(addr: SocketAddr, method: &str, path: &str) -> Response {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();

    // The server closes every connection after one response.
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let head = String::from_utf8(raw[..split].to_vec()).unwrap();
    let body = raw[split + 4..].to_vec();

    let mut lines = head.lines();
    let status = lines.next().unwrap().split_whitespace().nth(1).unwrap();
    let headers = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    Response {
        status: status.parse().unwrap(),
        headers,
        body,
    }
}

async fn start(image: ServedImage) -> (SocketAddr, String) {
    let server = RegistryServer::bind(image, false).await.unwrap();
    let addr = server.local_addr().unwrap();
    let reference = server.reference().unwrap();
    tokio::spawn(server.serve());
    (addr, reference)
}

#[tokio::test]
async fn test_ping() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _) = start(image(dir.path())).await;

    let resp = request(addr, "GET", "/v2/").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("Docker-Distribution-API-Version"), Some("registry/2.0"));
}

#[tokio::test]
async fn test_manifest_by_reference() {
    let dir = tempfile::tempdir().unwrap();
    let image = image(dir.path());
    let manifest = image.manifest().to_vec();
    let digest = image.manifest_digest().to_string();
    let (addr, reference) = start(image).await;

    assert_eq!(reference, format!("{addr}/layerload-test@{digest}"));

    let resp = request(addr, "GET", &format!("/v2/layerload-test/manifests/{digest}")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, manifest);
    assert_eq!(resp.header("Docker-Content-Digest"), Some(digest.as_str()));
    assert_eq!(
        resp.header("Content-Type"),
        Some("application/vnd.docker.distribution.manifest.v2+json")
    );

    let latest = request(addr, "GET", "/v2/layerload-test/manifests/latest").await;
    assert_eq!(latest.body, manifest);
}

#[tokio::test]
async fn test_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _) = start(image(dir.path())).await;

    let layer = Digest::sha256_of(LAYER).to_string();
    let resp = request(addr, "GET", &format!("/v2/layerload-test/blobs/{layer}")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, LAYER);
    assert_eq!(resp.header("Content-Length"), Some(LAYER.len().to_string().as_str()));

    let config = Digest::sha256_of(CONFIG).to_string();
    let resp = request(addr, "GET", &format!("/v2/layerload-test/blobs/{config}")).await;
    assert_eq!(resp.body, CONFIG);

    let head = request(addr, "HEAD", &format!("/v2/layerload-test/blobs/{layer}")).await;
    assert_eq!(head.status, 200);
    assert!(head.body.is_empty());
    assert_eq!(head.header("Content-Length"), Some(LAYER.len().to_string().as_str()));
}

#[tokio::test]
async fn test_unknown_paths() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _) = start(image(dir.path())).await;

    assert_eq!(request(addr, "GET", "/v2/other/manifests/latest").await.status, 404);
    assert_eq!(request(addr, "GET", "/v2/layerload-test/manifests/v9").await.status, 404);
    assert_eq!(
        request(addr, "GET", "/v2/layerload-test/blobs/sha256:0000").await.status,
        404
    );
    assert_eq!(request(addr, "DELETE", "/v2/").await.status, 405);
}
