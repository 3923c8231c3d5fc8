//! Shared fixtures for the integration suites.
//!
//! - [`FixtureServer`]: a minimal local HTTP server with canned
//!   responses and per-path request counters, so ingestion runs against
//!   byte-exact images with zero external network.
//! - [`ScriptedEncoder`]: a deterministic stand-in for the CLIP encoder.
//!   It maps a solid-color image to a unit vector whose cosine against
//!   the (fixed) text query is controlled by the red channel, so tests
//!   can script exact similarity scores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use artmatch::{Embedding, ImageEncoder, Result, EMBEDDING_DIM};
use image::{ImageFormat, Rgb, RgbImage};

// ---------------------------------------------------------------------------
// Image fixtures
// ---------------------------------------------------------------------------

/// PNG bytes of a small solid-color image.
pub fn solid_png(r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut image = RgbImage::new(8, 8);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encode");
    bytes
}

/// PNG bytes whose red channel scripts a similarity score of
/// `score_x100 / 100` against any text query (see [`ScriptedEncoder`]).
pub fn scored_png(score_x100: u8) -> Vec<u8> {
    solid_png(score_x100, 0, 0)
}

// ---------------------------------------------------------------------------
// HTTP fixture server
// ---------------------------------------------------------------------------

/// Canned response for one path.
pub enum Route {
    /// 200 with `image/png` body.
    Png(Vec<u8>),
    /// Plain status code with an empty text body.
    Status(u16),
    /// 200 with a non-image content type.
    Html(Vec<u8>),
    /// 200, `image/png` content type, but undecodable bytes.
    GarbagePng,
    /// 200 `image/png` after a delay (for deadline tests).
    SlowPng(Vec<u8>, Duration),
}

/// Minimal blocking HTTP/1.1 server bound to a loopback port.
pub struct FixtureServer {
    addr: SocketAddr,
    counts: Arc<Mutex<HashMap<String, usize>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FixtureServer {
    /// Starts the server with a path → response table.
    pub fn start(routes: HashMap<String, Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        let addr = listener.local_addr().expect("local addr");

        let counts: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let routes = Arc::new(routes);

        let handle = {
            let counts = Arc::clone(&counts);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    let counts = Arc::clone(&counts);
                    let routes = Arc::clone(&routes);
                    std::thread::spawn(move || serve_connection(stream, &routes, &counts));
                }
            })
        };

        Self {
            addr,
            counts,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Absolute URL for a fixture path (leading slash included).
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// How many requests hit a path.
    pub fn request_count(&self, path: &str) -> usize {
        self.counts
            .lock()
            .expect("counts lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Total requests across all paths.
    pub fn total_requests(&self) -> usize {
        self.counts.lock().expect("counts lock").values().sum()
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    routes: &HashMap<String, Route>,
    counts: &Mutex<HashMap<String, usize>>,
) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let path = match request_line.split_whitespace().nth(1) {
        Some(path) => path.to_string(),
        None => return,
    };

    // Drain the header block.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => continue,
            Err(_) => return,
        }
    }

    *counts.lock().expect("counts lock").entry(path.clone()).or_insert(0) += 1;

    let mut stream = reader.into_inner();
    let (status, content_type, body) = match routes.get(&path) {
        Some(Route::Png(bytes)) => (200, "image/png", bytes.clone()),
        Some(Route::Status(code)) => (*code, "text/plain", Vec::new()),
        Some(Route::Html(bytes)) => (200, "text/html", bytes.clone()),
        Some(Route::GarbagePng) => (200, "image/png", b"definitely not a png".to_vec()),
        Some(Route::SlowPng(bytes, delay)) => {
            std::thread::sleep(*delay);
            (200, "image/png", bytes.clone())
        }
        None => (404, "text/plain", Vec::new()),
    };

    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        reason(status),
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Fixture",
    }
}

/// A loopback URL that refuses connections (nothing listens there).
pub fn refused_url(path: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/{path}")
}

// ---------------------------------------------------------------------------
// Scripted encoder
// ---------------------------------------------------------------------------

/// Deterministic encoder over the 512-dim space.
///
/// - `encode_text` always returns the first basis vector `e₀`.
/// - `encode_images` reads the top-left pixel of each image and maps
///   the red channel to a unit vector at cosine `2·(r/100) − 1` from
///   `e₀`, so an image produced by [`scored_png`]`(s)` scores exactly
///   `s / 100` after the engine's `(cos + 1) / 2` mapping.
pub struct ScriptedEncoder {
    model_name: String,
    fail_images: AtomicBool,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self::with_model("test-clip-512")
    }

    pub fn with_model(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            fail_images: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent `encode_images` call fail.
    pub fn fail_images(&self, fail: bool) {
        self.fail_images.store(fail, Ordering::SeqCst);
    }
}

impl ImageEncoder for ScriptedEncoder {
    fn encode_images(&self, images: &[RgbImage]) -> Result<Vec<Embedding>> {
        if self.fail_images.load(Ordering::SeqCst) {
            return Err(artmatch::ArtMatchError::Encode(
                "scripted encoder failure".into(),
            ));
        }

        Ok(images
            .iter()
            .map(|image| {
                let red = image.get_pixel(0, 0)[0] as f32;
                let target = (red / 100.0).clamp(0.0, 1.0);
                let cosine = 2.0 * target - 1.0;

                let mut v = vec![0.0f32; EMBEDDING_DIM];
                v[0] = cosine;
                v[1] = (1.0 - cosine * cosine).max(0.0).sqrt();
                v
            })
            .collect())
    }

    fn encode_text(&self, _text: &str) -> Result<Embedding> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        Ok(v)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------------
// Shared reader for the fixture body
// ---------------------------------------------------------------------------

/// Reads a fixture response body fully (helper for ad-hoc assertions).
pub fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut bytes = Vec::new();
    let _ = reader.read_to_end(&mut bytes);
    bytes
}
