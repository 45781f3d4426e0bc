use crate::config::Config;
use crate::engine::{ImageInfo, ScanEngine, ScanOutcome, ScanRequest};
use crate::error::ScanError;
use crate::omr::aggregate::MultiMarkedChoices;
use crate::omr::{AnswerKey, DetectionResult, MarkingScheme, ScoreResult};
use crate::preprocessing::{Preset, StepTiming};
use crate::template::registry::{TemplateInfo, DEFAULT_TEMPLATE_ID};
use crate::template::{Template, TemplateConfig, TemplateRegistry};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

const SUPPORTED_FORMATS: [&str; 6] = [
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/webp",
    "image/tiff",
];

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ScanEngine>,
    pub templates: Arc<TemplateRegistry>,
    pub config: Arc<Config>,
}

/// Scan response
#[derive(Serialize)]
pub struct ScanResponse<'a> {
    pub template_id: &'a str,
    pub detected_answers: &'a DetectionResult,
    pub multi_marked_choices: MultiMarkedChoices<'a>,
    #[serde(flatten)]
    pub score: &'a ScoreResult,
    pub calibration: Calibration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image_base64: Option<String>,
    pub image: &'a ImageInfo,
    pub preset: &'static str,
    pub processing_time_ms: u64,
    pub steps: &'a [StepTiming],
    pub student_name: Option<String>,
    pub class_id: Option<String>,
}

/// Per-sheet thresholds the classifier settled on
#[derive(Serialize)]
pub struct Calibration {
    pub threshold: f32,
    pub empty_baseline: f32,
    pub ink_level: f32,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub supported_formats: Vec<String>,
    pub presets: Vec<String>,
    pub default_preset: String,
    pub max_file_size_bytes: usize,
    pub max_dimension: u32,
    pub scan_timeout_secs: u64,
    pub annotate: bool,
    pub default_template: String,
    pub templates: Vec<String>,
    pub cached_grids: usize,
}

#[derive(Serialize)]
pub struct TemplatesResponse {
    pub default: String,
    pub templates: Vec<TemplateInfo>,
}

/// Camera frame upload
#[derive(Debug, Deserialize)]
pub struct CameraRequest {
    pub image_base64: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_config: Option<TemplateConfig>,
    #[serde(default)]
    pub answer_key: Option<AnswerKey>,
    #[serde(default)]
    pub marking_scheme: Option<MarkingScheme>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
}

/// Everything a scan request carries besides the image
#[derive(Debug, Default)]
struct ScanFields {
    template_id: Option<String>,
    template_config: Option<TemplateConfig>,
    answer_key: Option<AnswerKey>,
    marking_scheme: Option<MarkingScheme>,
    preset: Option<String>,
    student_name: Option<String>,
    class_id: Option<String>,
}

const INLINE_TEMPLATE_ID: &str = "inline";

/// Build the application router
pub fn router(state: AppState) -> Router {
    let limit = body_limit(state.config.max_file_size);
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/api/scan", post(handle_scan))
        .route("/api/scan/camera", post(handle_camera_scan))
        .route("/api/templates", get(handle_templates))
        .route("/api/templates/:id", get(handle_template))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter(|o| !o.trim().is_empty())
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let templates = TemplateRegistry::load(config.templates_dir.as_deref())?;
    tracing::info!("Templates available: {:?}", templates.list());

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        engine: Arc::new(ScanEngine::new(config.engine.clone())),
        templates: Arc::new(templates),
        config: Arc::new(config),
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Handle multipart sheet uploads
async fn handle_scan(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ScanError> {
    let start = Instant::now();

    let mut file_data: Option<Bytes> = None;
    let mut fields = ScanFields::default();

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ScanError::InvalidRequest(format!("Failed to parse multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            if let Some(content_type) = field.content_type() {
                if !content_type.starts_with("image/") {
                    tracing::warn!("Received file with content type: {}", content_type);
                }
            }
            file_data = Some(field.bytes().await.map_err(|e| {
                ScanError::InvalidRequest(format!("Failed to read file data: {}", e))
            })?);
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| ScanError::InvalidRequest(format!("Invalid {} field: {}", name, e)))?;
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        match name.as_str() {
            "template_id" => fields.template_id = Some(text.to_string()),
            "template_config" => {
                fields.template_config = Some(serde_json::from_str(text).map_err(|e| {
                    ScanError::InvalidTemplate(format!("template_config is not valid: {}", e))
                })?)
            }
            "answer_key" => fields.answer_key = Some(parse_json_field(&name, text)?),
            "marking_scheme" => fields.marking_scheme = Some(parse_json_field(&name, text)?),
            "preset" => fields.preset = Some(text.to_string()),
            "student_name" => fields.student_name = Some(text.to_string()),
            "class_id" => fields.class_id = Some(text.to_string()),
            _ => {
                // Ignore unknown fields
            }
        }
    }

    // Validate file was provided
    let data = file_data.ok_or(ScanError::MissingFile)?;
    if data.is_empty() {
        return Err(ScanError::MissingFile);
    }

    scan_and_respond(state, data.to_vec(), fields, start).await
}

/// Handle base64 camera frames
async fn handle_camera_scan(
    State(state): State<AppState>,
    payload: Result<Json<CameraRequest>, JsonRejection>,
) -> Result<Response, ScanError> {
    let start = Instant::now();
    let Json(request) =
        payload.map_err(|e| ScanError::InvalidRequest(format!("Invalid JSON body: {}", e)))?;

    let data = decode_base64_image(&request.image_base64)?;
    let fields = ScanFields {
        template_id: request.template_id,
        template_config: request.template_config,
        answer_key: request.answer_key,
        marking_scheme: request.marking_scheme,
        preset: request.preset,
        student_name: request.student_name,
        class_id: request.class_id,
    };

    scan_and_respond(state, data, fields, start).await
}

async fn scan_and_respond(
    state: AppState,
    data: Vec<u8>,
    fields: ScanFields,
    start: Instant,
) -> Result<Response, ScanError> {
    // Check file size
    if data.len() > state.config.max_file_size {
        return Err(ScanError::ImageTooLarge {
            size: data.len(),
            max: state.config.max_file_size,
        });
    }

    // Inline templates are one-off, so their grids are not kept
    let cache_grid = fields.template_config.is_none();
    let template = resolve_template(
        &state.templates,
        fields.template_id.as_deref(),
        fields.template_config.as_ref(),
    )?;
    let preset = fields
        .preset
        .as_deref()
        .map(|p| {
            Preset::from_str(p)
                .ok_or_else(|| ScanError::InvalidRequest(format!("Unknown preset: {}", p)))
        })
        .transpose()?;

    let outcome = run_scan(
        &state,
        data,
        template,
        fields.answer_key,
        fields.marking_scheme,
        preset,
        cache_grid,
    )
    .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "Scan request for template {} completed in {}ms",
        outcome.template_id,
        processing_time_ms
    );

    let response = ScanResponse {
        template_id: &outcome.template_id,
        detected_answers: &outcome.detection,
        multi_marked_choices: outcome.detection.multi_marked_choices(),
        score: &outcome.score,
        calibration: Calibration {
            threshold: outcome.classification.threshold,
            empty_baseline: outcome.classification.empty_baseline,
            ink_level: outcome.classification.ink_level,
        },
        annotated_image_base64: outcome.annotated_png.as_ref().map(|png| STANDARD.encode(png)),
        image: &outcome.image,
        preset: outcome.preset.as_str(),
        processing_time_ms,
        steps: &outcome.steps,
        student_name: fields.student_name,
        class_id: fields.class_id,
    };

    Ok(Json(response).into_response())
}

/// Run the blocking scan on the blocking pool, bounded by the scan timeout
async fn run_scan(
    state: &AppState,
    data: Vec<u8>,
    template: Arc<Template>,
    answer_key: Option<AnswerKey>,
    marking_scheme: Option<MarkingScheme>,
    preset: Option<Preset>,
    cache_grid: bool,
) -> Result<ScanOutcome, ScanError> {
    let engine = Arc::clone(&state.engine);
    let timeout = state.config.scan_timeout;

    let task = tokio::task::spawn_blocking(move || {
        engine.scan(ScanRequest {
            image: &data,
            template: &template,
            answer_key: answer_key.as_ref(),
            marking_scheme: marking_scheme.as_ref(),
            preset,
            cache_grid,
        })
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ScanError::Internal(format!("Scan task failed: {}", e))),
        Err(_) => Err(ScanError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

/// Request body cap; base64 inflates camera frames by a third
fn body_limit(max_file_size: usize) -> usize {
    max_file_size.saturating_mul(3) / 2
}

/// Inline config wins over an id; neither means the default sheet
fn resolve_template(
    registry: &TemplateRegistry,
    template_id: Option<&str>,
    inline: Option<&TemplateConfig>,
) -> Result<Arc<Template>, ScanError> {
    if let Some(config) = inline {
        return Ok(Arc::new(Template::from_config(INLINE_TEMPLATE_ID, config)?));
    }
    match template_id {
        Some(id) => registry.require(id),
        None => registry
            .default()
            .ok_or_else(|| ScanError::TemplateNotFound(DEFAULT_TEMPLATE_ID.to_string())),
    }
}

fn parse_json_field<T: serde::de::DeserializeOwned>(name: &str, text: &str) -> Result<T, ScanError> {
    serde_json::from_str(text)
        .map_err(|e| ScanError::InvalidRequest(format!("{} is not valid: {}", name, e)))
}

/// Decode a base64 frame, with or without a `data:image/...;base64,` prefix
fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, ScanError> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err(ScanError::MissingFile);
    }
    STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ScanError::ImageDecode(format!("image_base64 is not valid base64: {}", e)))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.engine.settings();
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_formats: SUPPORTED_FORMATS.iter().map(|s| s.to_string()).collect(),
        presets: Preset::all().iter().map(|p| p.as_str().to_string()).collect(),
        default_preset: settings.default_preset.as_str().to_string(),
        max_file_size_bytes: state.config.max_file_size,
        max_dimension: settings.max_dimension,
        scan_timeout_secs: state.config.scan_timeout.as_secs(),
        annotate: settings.annotate,
        default_template: DEFAULT_TEMPLATE_ID.to_string(),
        templates: state.templates.list().iter().map(|s| s.to_string()).collect(),
        cached_grids: state.engine.cached_grids(),
    })
}

async fn handle_templates(State(state): State<AppState>) -> impl IntoResponse {
    Json(TemplatesResponse {
        default: DEFAULT_TEMPLATE_ID.to_string(),
        templates: state.templates.info(),
    })
}

async fn handle_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Template>, ScanError> {
    let template = state.templates.require(&id)?;
    Ok(Json(template.as_ref().clone()))
}
