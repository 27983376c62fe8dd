#![forbid(unsafe_code)]

//! Axum backend for media info lookups, tracked downloads and direct streams.
//!
//! All heavy lifting is delegated to yt-dlp. Handlers validate input, hand
//! work to the library and shape the JSON the web client expects:
//! `{success: true, data}` on success and `{success: false, error}` otherwise.

use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mediagrab::{
    cleanup::spawn_sweeper,
    config::{ConfigOverrides, ServiceConfig, resolve_service_config},
    download::{DownloadRequest, Downloader},
    error::MediaError,
    format::sanitize_filename,
    info::{VideoInfo, fetch_info},
    jobs::{DownloadJob, JobStatus, JobStore},
    platform::Platform,
    tool::{Quality, ToolLocator, muxer_available},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader},
    signal,
};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "mediagrab=info,backend=info";
const STREAM_FALLBACK_FILENAME: &str = "video.mp4";
const INSTAGRAM_AUTH_MESSAGE: &str =
    "Instagram user downloads require authentication. Please paste a direct post/reel URL instead.";

#[derive(Debug, Parser)]
#[command(name = "backend", about = "HTTP API for media info, downloads and streaming")]
struct BackendArgs {
    /// Directory downloads are written to.
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Listen address.
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Explicit yt-dlp executable; skips probing the usual locations.
    #[arg(long = "tool")]
    tool_path: Option<PathBuf>,
    /// Netscape cookie file handed to yt-dlp when it exists.
    #[arg(long)]
    cookies: Option<PathBuf>,
    /// Run at most this many downloads at once; extra jobs wait as `queued`.
    #[arg(long)]
    max_concurrent: Option<usize>,
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            download_dir: self.download_dir,
            host: self.host,
            port: self.port,
            tool_path: self.tool_path,
            cookies_file: self.cookies,
            max_concurrent: self.max_concurrent,
            env_path: self.env_file,
        }
    }
}

/// Shared handler state. Clones are cheap: the job map sits behind an `Arc`.
#[derive(Clone)]
struct AppState {
    downloader: Downloader,
    locator: ToolLocator,
}

impl AppState {
    fn new(config: &ServiceConfig) -> Self {
        let locator = ToolLocator::new(config.tool_path.clone(), config.cookies_file.clone());
        let downloader = Downloader::new(
            JobStore::new(),
            locator.clone(),
            config.download_dir.clone(),
            config.max_concurrent,
        );
        Self {
            downloader,
            locator,
        }
    }

    fn jobs(&self) -> &JobStore {
        self.downloader.jobs()
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match &err {
            MediaError::NotFound(_) => Self::not_found(err.to_string()),
            _ if err.is_client_error() => Self::bad_request(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct DataResponse<T> {
    success: bool,
    data: T,
}

impl<T> DataResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    tool_available: bool,
    tool_path: Option<PathBuf>,
    tool_version: Option<String>,
    muxer_available: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadStarted {
    success: bool,
    download_id: String,
}

#[derive(Deserialize)]
struct InfoRequest {
    #[serde(default)]
    url: String,
    platform: Option<String>,
}

/// `quality` arrives as `"best"`, `"1080"` or `1080`.
#[derive(Deserialize)]
#[serde(untagged)]
enum QualityField {
    Number(u64),
    Text(String),
}

impl QualityField {
    fn to_quality(&self) -> Quality {
        match self {
            Self::Number(height) => Quality::parse(&height.to_string()),
            Self::Text(value) => Quality::parse(value),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaRequest {
    #[serde(default)]
    url: String,
    quality: Option<QualityField>,
    include_audio: Option<bool>,
}

impl MediaRequest {
    fn into_download_request(self) -> ApiResult<DownloadRequest> {
        let url = required_url(&self.url)?;
        Ok(DownloadRequest {
            url,
            quality: self
                .quality
                .as_ref()
                .map_or(Quality::Best, QualityField::to_quality),
            include_audio: self.include_audio.unwrap_or(true),
        })
    }
}

fn required_url(raw: &str) -> ApiResult<String> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(MediaError::InvalidRequest("URL is required".to_string()).into());
    }
    Ok(url.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = BackendArgs::parse();
    let config = resolve_service_config(args.into_overrides())?;

    std::fs::create_dir_all(&config.download_dir)
        .with_context(|| format!("creating {}", config.download_dir.display()))?;

    let state = AppState::new(&config);
    log_startup(&state, &config).await;

    spawn_sweeper(
        config.download_dir.clone(),
        config.sweep_interval,
        config.retention,
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding to {}:{}", config.host, config.port))?;
    let addr = listener.local_addr().context("reading listen address")?;
    info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn log_startup(state: &AppState, config: &ServiceConfig) {
    info!(
        download_dir = %config.download_dir.display(),
        retention_secs = config.retention.as_secs(),
        max_concurrent = ?config.max_concurrent,
        "starting mediagrab backend"
    );
    match state.locator.locate().await {
        Ok(tool) => info!(path = %tool.program().display(), version = tool.version(), "yt-dlp found"),
        Err(_) => warn!("yt-dlp not found; install it with `pip install yt-dlp`"),
    }
    if muxer_available().await {
        info!("ffmpeg found");
    } else {
        warn!("ffmpeg not found; merging audio and video will fail");
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", post(video_info))
        .route("/api/download", post(start_download))
        .route("/api/download/{id}/status", get(download_status))
        .route("/api/download/{id}/file", get(download_file))
        .route("/api/stream", post(stream_download))
        .route("/api/instagram/user/{username}", get(instagram_user))
        .fallback(api_fallback)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

/// Open CORS for the API; preflights are answered here without routing.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        preflight_response()
    } else {
        next.run(request).await
    };
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn preflight_response() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Range"),
    );
    response
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let tool = state.locator.locate().await.ok();
    Json(HealthResponse {
        status: "ok",
        tool_available: tool.is_some(),
        tool_path: tool.as_ref().map(|tool| tool.program().to_path_buf()),
        tool_version: tool.as_ref().map(|tool| tool.version().to_string()),
        muxer_available: muxer_available().await,
    })
}

async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<DataResponse<VideoInfo>>> {
    let Json(payload) = payload?;
    let url = required_url(&payload.url)?;
    let platform = payload
        .platform
        .as_deref()
        .and_then(Platform::from_hint)
        .unwrap_or_else(|| Platform::detect(&url));
    info!(%url, platform = platform.as_str(), media_id = ?platform.media_id(&url), "info requested");

    let tool = state
        .locator
        .locate()
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let info = fetch_info(&tool, &url).await.map_err(|err| {
        warn!(%url, error = %err, "info lookup failed");
        ApiError::bad_request(err.to_string())
    })?;
    Ok(DataResponse::ok(info))
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<MediaRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadStarted>> {
    let Json(payload) = payload?;
    let request = payload.into_download_request()?;
    let download_id = state.downloader.start(request);
    Ok(Json(DownloadStarted {
        success: true,
        download_id,
    }))
}

async fn download_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<DataResponse<DownloadJob>>> {
    let job = state
        .jobs()
        .get(&id)
        .ok_or_else(|| MediaError::NotFound("Download not found".to_string()))?;
    Ok(DataResponse::ok(job))
}

async fn download_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let job = state
        .jobs()
        .get(&id)
        .ok_or_else(|| MediaError::NotFound("Download not found".to_string()))?;
    if job.status != JobStatus::Complete {
        return Err(MediaError::InvalidRequest("Download not complete".to_string()).into());
    }
    let path = job
        .output_path
        .filter(|path| path.is_file())
        .ok_or_else(|| MediaError::NotFound("File not found".to_string()))?;

    let filename = path
        .file_name()
        .map(|name| sanitize_filename(&name.to_string_lossy()))
        .unwrap_or_else(|| STREAM_FALLBACK_FILENAME.to_string());
    let mut response = stream_file(path, &headers).await?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, attachment_header(&filename));
    Ok(response)
}

/// Pipes yt-dlp's stdout straight into the response body. No job is
/// recorded and failures after the first byte can only be logged.
async fn stream_download(
    State(state): State<AppState>,
    payload: Result<Json<MediaRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let request = payload.into_download_request()?;
    let tool = state.locator.locate().await?;

    let filename = match fetch_info(&tool, &request.url).await {
        Ok(info) => format!("{}.mp4", sanitize_filename(&info.title)),
        Err(err) => {
            warn!(url = %request.url, error = %err, "falling back to default stream filename");
            STREAM_FALLBACK_FILENAME.to_string()
        }
    };

    let mut child = tool
        .stream_command(&request.url, request.quality, request.include_audio)
        .spawn()
        .map_err(MediaError::from)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::internal("yt-dlp stdout unavailable"))?;
    let stderr = child.stderr.take();

    let url = request.url.clone();
    tokio::spawn(async move {
        let last_error = match stderr {
            Some(stderr) => drain_stream_errors(stderr).await,
            None => None,
        };
        match child.wait().await {
            Ok(status) if status.success() => info!(%url, "stream finished"),
            Ok(status) => warn!(
                %url,
                %status,
                error = last_error.as_deref().unwrap_or(""),
                "stream exited with failure"
            ),
            Err(err) => error!(%url, error = %err, "failed to reap stream process"),
        }
    });

    let mut response = Body::from_stream(ReaderStream::new(stdout)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_DISPOSITION, attachment_header(&filename));
    Ok(response)
}

/// Reads stderr of a streaming yt-dlp to the end, one line at a time. With
/// `-o -` yt-dlp reports progress there for the whole transfer, so only
/// `ERROR:` lines are logged and the last one is kept.
async fn drain_stream_errors<R: AsyncRead + Unpin>(stderr: R) -> Option<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut last_error = None;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.starts_with("ERROR:") {
                    warn!(line, "stream reported an error");
                    last_error = Some(line.to_string());
                }
            }
            Err(err) => {
                warn!(error = %err, "could not read stream stderr");
                break;
            }
        }
    }
    last_error
}

async fn instagram_user(AxumPath(username): AxumPath<String>) -> Response {
    info!(%username, "instagram profile lookup rejected");
    let body = json!({
        "success": false,
        "error": INSTAGRAM_AUTH_MESSAGE,
        "requiresAuth": true,
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn attachment_header(filename: &str) -> HeaderValue {
    HeaderValue::from_bytes(format!("attachment; filename=\"{filename}\"").as_bytes())
        .unwrap_or_else(|_| {
            HeaderValue::from_static("attachment; filename=\"video.mp4\"")
        })
}

async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let size = metadata.len();

    let guessed = MimeGuess::from_path(&path).first();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = if let Some((start, end)) = range {
        if start >= size {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        } else {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("File not found"))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
    } else {
        let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        response
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    let range = range.trim();
    if range.is_empty() {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: "-N" means last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        if suffix_len >= size {
            return Some((0, size.saturating_sub(1)));
        }
        return Some((size - suffix_len, size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
