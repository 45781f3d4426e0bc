use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::rect::Rect;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Cursor;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

// Use atomic counter to give each test a unique port
static PORT_COUNTER: AtomicU16 = AtomicU16::new(9400);

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct InfoResponse {
    version: String,
    presets: Vec<String>,
    default_preset: String,
    max_file_size_bytes: usize,
    default_template: String,
    templates: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
    hint: String,
}

struct TestServer {
    child: Child,
    port: u16,
}

impl TestServer {
    async fn start(extra_args: &[&str]) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);

        let child = Command::new(env!("CARGO_BIN_EXE_omr-scan-server"))
            .args(["--host", "127.0.0.1", "--port", &port.to_string()])
            .args(extra_args)
            .spawn()
            .expect("Failed to start server");

        let server = Self { child, port };

        // Wait for server to be ready
        let client = reqwest::Client::new();
        for _ in 0..100 {
            if client
                .get(format!("{}/health", server.base_url()))
                .send()
                .await
                .is_ok()
            {
                return server;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("server did not come up on port {}", port);
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

/// The built-in 100-question sheet as printed: a 100px white border around
/// the 1700x2600 page, a 100px marker centered on each page corner, then
/// photographed at half resolution
fn default_sheet_png(marks: &[(usize, &[usize])]) -> Vec<u8> {
    let margin = 100i32;
    let mut sheet = GrayImage::from_pixel(1900, 2800, Luma([245]));

    for (cx, cy) in [(0, 0), (1699, 0), (1699, 2599), (0, 2599)] {
        let rect = Rect::at(cx + margin - 50, cy + margin - 50).of_size(100, 100);
        draw_filled_rect_mut(&mut sheet, rect, Luma([15]));
    }

    let columns = [90.0, 530.0, 970.0, 1410.0];
    for question in 1..=100usize {
        let column = columns[(question - 1) / 25];
        let row = ((question - 1) % 25) as f64;
        let filled: &[usize] = marks
            .iter()
            .find(|(q, _)| *q == question)
            .map(|(_, choices)| *choices)
            .unwrap_or(&[]);
        for choice in 0..5usize {
            let x = (column + choice as f64 * 57.0).round() as i32;
            let y = (680.0 + row * 75.6).round() as i32;
            let center = (x + 21 + margin, y + 21 + margin);
            draw_hollow_circle_mut(&mut sheet, center, 18, Luma([150]));
            if filled.contains(&choice) {
                draw_filled_circle_mut(&mut sheet, center, 16, Luma([25]));
            }
        }
    }

    let photo = image::imageops::resize(&sheet, 950, 1400, FilterType::Triangle);
    png(&photo)
}

fn png(img: &GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// q1 = A, q2 blank, q3 = B and C, every later question D
fn scenario_sheet() -> Vec<u8> {
    const A: &[usize] = &[0];
    const B_AND_C: &[usize] = &[1, 2];
    const D: &[usize] = &[3];
    let mut marks = vec![(1, A), (3, B_AND_C)];
    marks.extend((4..=100).map(|q| (q, D)));
    default_sheet_png(&marks)
}

async fn post_scan(client: &reqwest::Client, base_url: &str, form: Form) -> reqwest::Response {
    client
        .post(format!("{}/api/scan", base_url))
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request")
}

fn file_part(bytes: Vec<u8>) -> Part {
    Part::bytes(bytes)
        .file_name("sheet.png")
        .mime_str("image/png")
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start(&[]).await;
    let client = reqwest::Client::new();

    let response: HealthResponse = client
        .get(format!("{}/health", server.base_url()))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");

    assert_eq!(response.status, "ok");
}

#[tokio::test]
async fn test_info_endpoint() {
    let server = TestServer::start(&["--preset", "aggressive"]).await;
    let client = reqwest::Client::new();

    let response: InfoResponse = client
        .get(format!("{}/info", server.base_url()))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");

    assert_eq!(response.default_preset, "aggressive");
    assert_eq!(response.default_template, "default");
    assert!(response.templates.contains(&"default".to_string()));
    assert_eq!(response.max_file_size_bytes, 20 * 1024 * 1024);
}

#[tokio::test]
async fn test_hundred_question_scan_with_key() {
    let server = TestServer::start(&[]).await;
    let client = reqwest::Client::new();

    let key: Value = (1..=100)
        .map(|i| (format!("q{}", i), json!("A")))
        .collect::<serde_json::Map<_, _>>()
        .into();
    let form = Form::new()
        .part("file", file_part(scenario_sheet()))
        .text("answer_key", key.to_string())
        .text("student_name", "Grace");

    let response = post_scan(&client, &server.base_url(), form).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");

    assert_eq!(body["detected_answers"]["q1"], "A");
    assert_eq!(body["detected_answers"]["q2"], "unmarked");
    assert_eq!(body["detected_answers"]["q3"], "multi-marked");
    assert_eq!(body["detected_answers"]["q100"], "D");
    assert_eq!(body["multi_marked_choices"]["q3"], json!(["B", "C"]));
    assert_eq!(body["score"], 1.0);
    assert_eq!(body["total"], 100);
    assert_eq!(body["percentage"], 1.0);
    assert_eq!(body["multi_marked_count"], 1);
    assert_eq!(body["unmarked_count"], 1);
    assert_eq!(body["student_name"], "Grace");
    assert_eq!(body["bubble_details"].as_array().unwrap().len(), 100);

    let annotated = STANDARD
        .decode(body["annotated_image_base64"].as_str().unwrap())
        .unwrap();
    let overlay = image::load_from_memory(&annotated).unwrap();
    assert_eq!((overlay.width(), overlay.height()), (1700, 2600));
}

#[tokio::test]
async fn test_camera_scan_without_key() {
    let server = TestServer::start(&[]).await;
    let client = reqwest::Client::new();

    let payload = json!({
        "image_base64": format!("data:image/png;base64,{}", STANDARD.encode(scenario_sheet())),
        "template_id": "default"
    });
    let response = client
        .post(format!("{}/api/scan/camera", server.base_url()))
        .json(&payload)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["score"], Value::Null);
    assert_eq!(body["total"], Value::Null);
    assert_eq!(body["percentage"], Value::Null);
    assert_eq!(body["detected_answers"]["q1"], "A");
    assert_eq!(body["unmarked_count"], 1);
    assert_eq!(body["bubble_details"][0]["status"], "unscored");
}

#[tokio::test]
async fn test_blank_photo_reports_missing_markers() {
    let server = TestServer::start(&[]).await;
    let client = reqwest::Client::new();

    let blank = png(&GrayImage::from_pixel(600, 800, Luma([240])));
    let form = Form::new().part("file", file_part(blank));
    let response = post_scan(&client, &server.base_url(), form).await;
    assert_eq!(response.status(), 422);

    let error: ErrorResponse = response.json().await.expect("Failed to parse response");
    assert_eq!(error.code, "MARKER_NOT_FOUND");
    assert!(error.error.contains("bottom-right"));
    assert!(error.hint.contains("corner markers"));
}

#[tokio::test]
async fn test_missing_file_returns_400() {
    let server = TestServer::start(&[]).await;
    let client = reqwest::Client::new();

    let form = Form::new().text("template_id", "default");
    let response = post_scan(&client, &server.base_url(), form).await;
    assert_eq!(response.status(), 400);

    let error: ErrorResponse = response.json().await.expect("Failed to parse response");
    assert_eq!(error.code, "MISSING_FILE");
}

#[tokio::test]
async fn test_garbage_upload_returns_decode_error() {
    let server = TestServer::start(&[]).await;
    let client = reqwest::Client::new();

    let form = Form::new().part("file", file_part(b"this is not an image".to_vec()));
    let response = post_scan(&client, &server.base_url(), form).await;
    assert_eq!(response.status(), 400);

    let error: ErrorResponse = response.json().await.expect("Failed to parse response");
    assert_eq!(error.code, "IMAGE_DECODE_ERROR");
}

#[tokio::test]
async fn test_templates_directory_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let quiz = json!({
        "pageDimensions": [600, 800],
        "bubbleDimensions": [30, 30],
        "sheetToMarkerWidthRatio": 12,
        "fieldBlocks": {
            "Quiz": {
                "fieldType": "QTYPE_MCQ4",
                "fieldLabels": ["q1", "q2", "q3", "q4", "q5"],
                "origin": [100, 150],
                "bubblesGap": 45,
                "labelsGap": 50
            }
        }
    });
    std::fs::write(dir.path().join("quiz.json"), quiz.to_string()).unwrap();

    let server = TestServer::start(&["--templates-dir", dir.path().to_str().unwrap()]).await;
    let client = reqwest::Client::new();

    let listing: Value = client
        .get(format!("{}/api/templates", server.base_url()))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let ids: Vec<&str> = listing["templates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["default", "quiz"]);

    let template: Value = client
        .get(format!("{}/api/templates/quiz", server.base_url()))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(template["questions"].as_array().unwrap().len(), 5);
    assert_eq!(template["blocks"][0]["direction"], "horizontal");
}
