use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use actix_web::{test, web, App};
use image::{ImageFormat, Rgb, RgbImage};
use panel_server::models::NewPanel;
use panel_server::repo::{PanelRepo, SqliteRepo};
use panel_server::storage::FsRenditionStore;
use panel_server::{configure, AppState};
use serde_json::Value;
use tempfile::TempDir;

const BASE: &str = "http://panels.test";
const BOUNDARY: &str = "PANELBOUNDARY42";

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(configure),
        )
        .await
    };
}

struct Harness {
    tmp: TempDir,
    state: AppState,
}

impl Harness {
    async fn new() -> Self {
        Self::with_limit(5 * 1024 * 1024).await
    }

    async fn with_limit(max_upload_bytes: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsRenditionStore::open(tmp.path().join("uploads"), tmp.path().join("thumbs"))
            .await
            .unwrap();
        let state = AppState {
            repo: Arc::new(SqliteRepo::in_memory().await.unwrap()),
            store: Arc::new(store),
            max_upload_bytes,
            base_url: BASE.into(),
        };
        Self { tmp, state }
    }

    fn files(&self, dir: &str) -> usize {
        count_files(&self.tmp.path().join(dir))
    }

    fn assert_nothing_written(&self) {
        assert_eq!(self.files("uploads"), 0, "no full rendition expected");
        assert_eq!(self.files("thumbs"), 0, "no thumbnail expected");
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}

enum Part<'a> {
    File { name: &'a str, content_type: &'a str, bytes: &'a [u8] },
    Text { name: &'a str, value: &'a str },
}

fn multipart(parts: &[Part]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        match part {
            Part::File { name, content_type, bytes } => {
                let head = format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"{name}\"; filename=\"upload.bin\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                );
                body.extend_from_slice(head.as_bytes());
                body.extend_from_slice(bytes);
            }
            Part::Text { name, value } => {
                let head = format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                );
                body.extend_from_slice(head.as_bytes());
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

fn upload_request(parts: &[Part]) -> test::TestRequest {
    let (ct, body) = multipart(parts);
    test::TestRequest::post()
        .uri("/upload")
        .insert_header(("Content-Type", ct))
        .set_payload(body)
}

// Busy gradient so the encoded sizes reflect pixel count.
fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x ^ y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn png_part(bytes: &[u8]) -> Part<'_> {
    Part::File { name: "panel", content_type: "image/png", bytes }
}

async fn json<B: actix_web::body::MessageBody>(resp: actix_web::dev::ServiceResponse<B>) -> Value {
    let body = test::read_body(resp).await;
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> test::TestRequest {
    test::TestRequest::get().uri(uri)
}

#[actix_web::test]
async fn wide_png_yields_bounded_renditions_and_listed_row() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let png = sample_png(2000, 1000);

    let req = upload_request(&[
        Part::Text { name: "chainId", value: "abc" },
        Part::Text { name: "authorId", value: "u1" },
        png_part(&png),
    ])
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v = json(resp).await;
    let id = v["id"].as_str().unwrap().to_string();
    assert_eq!(v["imageUrl"], format!("{BASE}/uploads/{id}.jpg"));
    assert_eq!(v["thumbUrl"], format!("{BASE}/thumbs/{id}_thumb.jpg"));

    let mut fetched = Vec::new();
    for url in [v["imageUrl"].as_str().unwrap(), v["thumbUrl"].as_str().unwrap()] {
        let req = test::TestRequest::get().uri(url.strip_prefix(BASE).unwrap()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("content-type").unwrap(), "image/jpeg");
        fetched.push(test::read_body(resp).await);
    }
    let full = image::load_from_memory(&fetched[0]).unwrap();
    let thumb = image::load_from_memory(&fetched[1]).unwrap();
    assert_eq!(full.width(), 1080);
    assert!(full.height().abs_diff(540) <= 1);
    assert_eq!(thumb.width(), 400);
    assert!(thumb.height().abs_diff(200) <= 1);
    assert!(!fetched[1].is_empty() && fetched[1].len() < fetched[0].len());

    let req = test::TestRequest::get().uri("/panels").to_request();
    let rows = json(test::call_service(&app, req).await).await;
    let row = rows.as_array().unwrap().iter().find(|r| r["id"] == id.as_str()).unwrap();
    assert_eq!(row["imagePath"], format!("/uploads/{id}.jpg"));
    assert_eq!(row["thumbPath"], format!("/thumbs/{id}_thumb.jpg"));
    assert!(row["createdAt"].as_i64().unwrap() > 0);

    let req = test::TestRequest::get().uri("/panels?chainId=abc").to_request();
    let rows = json(test::call_service(&app, req).await).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["authorId"], "u1");

    let req = test::TestRequest::get().uri("/panels?chainId=other").to_request();
    let rows = json(test::call_service(&app, req).await).await;
    assert!(rows.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn omitted_ids_get_defaults() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let png = sample_png(64, 48);

    let req = upload_request(&[png_part(&png)]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/panels").to_request();
    let rows = json(test::call_service(&app, req).await).await;
    assert_eq!(rows[0]["chainId"], "unknown");
    assert_eq!(rows[0]["authorId"], "anonymous");

    // small sources are stored at their own size
    let path = rows[0]["imagePath"].as_str().unwrap().to_string();
    let resp = test::call_service(&app, test::TestRequest::get().uri(&path).to_request()).await;
    let full = image::load_from_memory(&test::read_body(resp).await).unwrap();
    assert_eq!((full.width(), full.height()), (64, 48));
}

#[actix_web::test]
async fn missing_file_is_rejected_without_side_effects() {
    let h = Harness::new().await;
    let app = app!(h.state);

    let req = upload_request(&[Part::Text { name: "chainId", value: "abc" }]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json(resp).await, serde_json::json!({ "error": "No file" }));

    let req = test::TestRequest::post()
        .uri("/upload")
        .set_json(serde_json::json!({ "panel": "nope" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json(resp).await["error"], "No file");

    h.assert_nothing_written();
    assert!(h.state.repo.recent_panels(None, 50).await.unwrap().is_empty());
}

#[actix_web::test]
async fn non_image_content_type_is_rejected() {
    let h = Harness::new().await;
    let app = app!(h.state);

    let text = Part::File { name: "panel", content_type: "text/plain", bytes: b"hello world" };
    let req = upload_request(&[text]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 415);
    assert!(json(resp).await["error"].is_string());

    // declared as an image but sniffed as a PDF
    let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF";
    let req = upload_request(&[png_part(pdf)]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 415);

    h.assert_nothing_written();
    assert!(h.state.repo.recent_panels(None, 50).await.unwrap().is_empty());
}

#[actix_web::test]
async fn oversized_body_is_rejected() {
    let h = Harness::with_limit(64 * 1024).await;
    let app = app!(h.state);
    let mut big = sample_png(16, 16);
    big.resize(200 * 1024, 0xAA);

    let req = upload_request(&[png_part(&big)]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);
    assert!(json(resp).await["error"].is_string());

    h.assert_nothing_written();
    assert!(h.state.repo.recent_panels(None, 50).await.unwrap().is_empty());
}

#[actix_web::test]
async fn corrupt_image_fails_as_processing_error() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let mut corrupt = sample_png(32, 32);
    corrupt.truncate(40);

    let req = upload_request(&[png_part(&corrupt)]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    let v = json(resp).await;
    assert_eq!(v["error"], "Upload failed");
    assert_eq!(v["details"], "The file could not be read as an image");

    h.assert_nothing_written();
    assert!(h.state.repo.recent_panels(None, 50).await.unwrap().is_empty());
}

#[actix_web::test]
async fn second_panel_field_is_rejected() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let png = sample_png(8, 8);

    let req = upload_request(&[png_part(&png), png_part(&png)]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    h.assert_nothing_written();
}

#[actix_web::test]
async fn concurrent_uploads_get_distinct_files() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let a = sample_png(300, 200);
    let b = sample_png(500, 700);

    let jpeg_declared = Part::File { name: "panel", content_type: "image/jpeg", bytes: &b };
    let (ra, rb) = futures_util::future::join(
        test::call_service(&app, upload_request(&[png_part(&a)]).to_request()),
        test::call_service(&app, upload_request(&[jpeg_declared]).to_request()),
    )
    .await;
    assert_eq!(ra.status(), 200);
    assert_eq!(rb.status(), 200);
    let (va, vb) = (json(ra).await, json(rb).await);
    assert_ne!(va["id"], vb["id"]);
    assert_ne!(va["imageUrl"], vb["imageUrl"]);

    let rows = json(test::call_service(&app, get("/panels").to_request()).await).await;
    let ids: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&va["id"].as_str().unwrap()));
    assert!(ids.contains(&vb["id"].as_str().unwrap()));
    assert_eq!(h.files("uploads"), 2);
    assert_eq!(h.files("thumbs"), 2);
}

#[actix_web::test]
async fn listing_is_capped_newest_first_and_stable() {
    let h = Harness::new().await;
    let app = app!(h.state);
    for i in 0..55 {
        let id = uuid::Uuid::new_v4();
        let chain = if i % 5 == 0 { "five" } else { "rest" };
        h.state
            .repo
            .insert_panel(NewPanel::new(
                id.to_string(),
                Some(chain.into()),
                None,
                format!("/uploads/{id}.jpg"),
                format!("/thumbs/{id}_thumb.jpg"),
            ))
            .await
            .unwrap();
    }

    let first = json(test::call_service(&app, get("/panels").to_request()).await).await;
    let second = json(test::call_service(&app, get("/panels").to_request()).await).await;
    assert_eq!(first, second);
    let rows = first.as_array().unwrap();
    assert_eq!(rows.len(), 50);
    let stamps: Vec<i64> = rows.iter().map(|r| r["createdAt"].as_i64().unwrap()).collect();
    assert!(stamps.windows(2).all(|w| w[0] >= w[1]));

    let rows = json(test::call_service(&app, get("/panels?chainId=five").to_request()).await).await;
    assert_eq!(rows.as_array().unwrap().len(), 11);

    // empty filter value means no filter
    let rows = json(test::call_service(&app, get("/panels?chainId=").to_request()).await).await;
    assert_eq!(rows.as_array().unwrap().len(), 50);
}

#[actix_web::test]
async fn static_mounts_only_resolve_exact_names() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let png = sample_png(40, 40);
    let resp = test::call_service(&app, upload_request(&[png_part(&png)]).to_request()).await;
    let id = json(resp).await["id"].as_str().unwrap().to_string();

    for uri in [
        "/uploads".to_string(),
        "/uploads/".to_string(),
        "/thumbs/".to_string(),
        format!("/thumbs/{id}.jpg"),
        format!("/uploads/{id}_thumb.jpg"),
        format!("/uploads/{}.jpg", uuid::Uuid::new_v4()),
        "/uploads/..%2Fthumbs".to_string(),
        "/uploads/.hidden.part".to_string(),
    ] {
        let resp = test::call_service(&app, get(&uri).to_request()).await;
        assert_eq!(resp.status(), 404, "{uri}");
    }

    let resp = test::call_service(&app, get(&format!("/thumbs/{id}_thumb.jpg")).to_request()).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn text_field_named_panel_is_not_a_file() {
    let h = Harness::new().await;
    let app = app!(h.state);

    let req = upload_request(&[Part::Text { name: "panel", value: "hello" }]).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json(resp).await, serde_json::json!({ "error": "No file" }));

    h.assert_nothing_written();
    assert!(h.state.repo.recent_panels(None, 50).await.unwrap().is_empty());
}

#[actix_web::test]
async fn correlation_ids_are_kept_verbatim() {
    let h = Harness::new().await;
    let app = app!(h.state);
    let png = sample_png(16, 16);

    let req = upload_request(&[
        Part::Text { name: "chainId", value: " abc" },
        Part::Text { name: "authorId", value: "u1 " },
        png_part(&png),
    ])
    .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let resp = test::call_service(&app, get("/panels?chainId=%20abc").to_request()).await;
    let rows = json(resp).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["chainId"], " abc");
    assert_eq!(rows[0]["authorId"], "u1 ");

    let rows = json(test::call_service(&app, get("/panels?chainId=abc").to_request()).await).await;
    assert!(rows.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn framework_rejections_use_the_json_error_shape() {
    let h = Harness::new().await;
    let app = app!(h.state);

    let resp = test::call_service(&app, get("/panels?chainId=a&chainId=b").to_request()).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
    assert_eq!(json(resp).await, serde_json::json!({ "error": "Invalid query string" }));

    for req in [
        get("/upload"),
        test::TestRequest::delete().uri("/panels"),
        test::TestRequest::post().uri("/panels"),
    ] {
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), 405);
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
        assert_eq!(json(resp).await, serde_json::json!({ "error": "method not allowed" }));
    }
}
