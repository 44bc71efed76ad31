//! Shared helpers for unit tests: tiny HTTP servers, tarballs and fake
//! sandbox executables.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// A local HTTP server answering every request from a closure.
pub(crate) struct TestServer {
    pub port: u16,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    /// Number of requests answered so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Serves `respond(request_index) -> (status, body)` on an ephemeral port.
pub(crate) async fn serve<F>(respond: F) -> TestServer
where
    F: Fn(usize) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    serve_on(listener, respond)
}

/// Like [`serve`] but on an already bound listener.
pub(crate) fn serve_on<F>(listener: TcpListener, respond: F) -> TestServer
where
    F: Fn(usize) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = respond(index);
            tokio::spawn(answer(stream, status, body));
        }
    });

    TestServer { port, hits }
}

async fn answer(stream: TcpStream, status: u16, body: Vec<u8>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" => break,
            Ok(_) => {
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
    }
    let mut request_body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut request_body).await;

    let head = format!(
        "HTTP/1.1 {status} Test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = write.write_all(head.as_bytes()).await;
    let _ = write.write_all(&body).await;
    let _ = write.shutdown().await;
}

/// A port nothing is listening on.
pub(crate) fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Builds a gzip tarball of executable files.
pub(crate) fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Writes an executable shell script named `name` into `dir`.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stand-in for the sandbox executable.
///
/// - `--home DIR init`: writes a fresh `validator_key.json`, a small
///   `config.json` and appends to `DIR/init.count`
/// - `--home DIR run ...`: records its arguments in `DIR/run.args`, prints
///   a ready marker to stderr and sleeps
#[cfg(unix)]
pub(crate) fn fake_sandbox(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "near-sandbox",
        r#"home="$2"
cmd="$3"
case "$cmd" in
  init)
    mkdir -p "$home"
    echo "{\"secret_key\": \"ed25519:$$-$(date +%s%N)\"}" > "$home/validator_key.json"
    echo '{"rpc":{"addr":"0.0.0.0:3030","limits_config":{"json_payload_max_size":10}},"store":{"path":"data"}}' > "$home/config.json"
    echo x >> "$home/init.count"
    ;;
  run)
    mkdir -p "$home"
    echo "$@" > "$home/run.args"
    echo "INFO stats: #0 Server listening at ed25519:abc" >&2
    exec sleep 30
    ;;
  *)
    exit 2
    ;;
esac"#,
    )
}
