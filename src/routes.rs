use std::sync::Arc;

use actix_multipart::{Field, Multipart};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use uuid::Uuid;

use crate::error::{ApiError, UploadStage};
use crate::models::*;
use crate::pipeline::{self, PipelineError, Renditions};
use crate::repo::{PanelRepo, RECENT_LIMIT};
use crate::storage::{RenditionKind, RenditionStore};

const PANEL_FIELD: &str = "panel";
const CHAIN_FIELD: &str = "chainId";
const AUTHOR_FIELD: &str = "authorId";
const MAX_TEXT_FIELD: usize = 1024;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(|err, req| {
        log::info!("rejecting query {:?}: {err}", req.query_string());
        ApiError::BadRequest("Invalid query string".into()).into()
    }))
    .service(
        web::resource("/upload")
            .route(web::post().to(upload_panel))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/panels")
            .route(web::get().to(list_panels))
            .default_service(web::to(method_not_allowed)),
    )
    // exact file names only; there is no route for the bare directories
    .route("/uploads/{filename}", web::get().to(get_upload))
    .route("/thumbs/{filename}", web::get().to(get_thumb));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn PanelRepo>,
    pub store: Arc<dyn RenditionStore>,
    pub max_upload_bytes: usize,
    pub base_url: String,
}

impl AppState {
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Default)]
struct UploadForm {
    panel: Option<Vec<u8>>,
    chain_id: Option<String>,
    author_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(
        content = Vec<u8>,
        content_type = "multipart/form-data",
        description = "`panel` image file, optional `chainId` and `authorId` text fields"
    ),
    responses(
        (status = 200, description = "Panel stored", body = UploadResponse),
        (status = 400, description = "No file or malformed body"),
        (status = 405, description = "Wrong method"),
        (status = 413, description = "Body exceeds MAX_UPLOAD_MB"),
        (status = 415, description = "Not an image"),
        (status = 500, description = "Processing or storage failure")
    )
)]
pub async fn upload_panel(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);
    if !is_multipart {
        return Err(ApiError::NoFile);
    }

    let form = read_form(payload, data.max_upload_bytes).await?;
    let bytes = form.panel.ok_or(ApiError::NoFile)?;
    if let Some(kind) = infer::get(&bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            log::info!("rejecting upload sniffed as {}", kind.mime_type());
            return Err(ApiError::UnsupportedMediaType);
        }
    }

    let id = Uuid::new_v4();
    let source_len = bytes.len();
    let Renditions { full, thumb } = web::block(move || pipeline::process(&bytes))
        .await
        .map_err(|e| {
            log::error!("panel={id} stage=encode blocking task failed: {e}");
            ApiError::UploadFailed(UploadStage::Encode)
        })?
        .map_err(|e| {
            let stage = match e {
                PipelineError::Decode(_) => UploadStage::Decode,
                PipelineError::Encode(_) => UploadStage::Encode,
            };
            log::warn!("panel={id} stage={} {e}", stage.as_str());
            ApiError::UploadFailed(stage)
        })?;

    let full_name = RenditionKind::Full.file_name(&id);
    let thumb_name = RenditionKind::Thumb.file_name(&id);

    if let Err(e) = data.store.save(RenditionKind::Full, &full_name, &full.bytes).await {
        log::error!("panel={id} stage=write_full {e}");
        return Err(ApiError::UploadFailed(UploadStage::WriteFull));
    }
    if let Err(e) = data.store.save(RenditionKind::Thumb, &thumb_name, &thumb.bytes).await {
        log::error!("panel={id} stage=write_thumb {e}");
        discard(&data, &[(RenditionKind::Full, full_name.as_str())]).await;
        return Err(ApiError::UploadFailed(UploadStage::WriteThumb));
    }

    let new = NewPanel::new(
        id.to_string(),
        form.chain_id,
        form.author_id,
        RenditionKind::Full.public_path(&id),
        RenditionKind::Thumb.public_path(&id),
    );
    let panel = match data.repo.insert_panel(new).await {
        Ok(p) => p,
        Err(e) => {
            log::error!("panel={id} stage=insert {e}");
            let written = [
                (RenditionKind::Full, full_name.as_str()),
                (RenditionKind::Thumb, thumb_name.as_str()),
            ];
            discard(&data, &written).await;
            return Err(ApiError::UploadFailed(UploadStage::Insert));
        }
    };

    log::info!(
        "panel={} chain={} author={} source_bytes={} full={}x{} ({}B) thumb={}x{} ({}B)",
        panel.id,
        panel.chain_id,
        panel.author_id,
        source_len,
        full.width,
        full.height,
        full.bytes.len(),
        thumb.width,
        thumb.height,
        thumb.bytes.len()
    );
    Ok(HttpResponse::Ok().json(UploadResponse {
        image_url: data.public_url(&panel.image_path),
        thumb_url: data.public_url(&panel.thumb_path),
        id: panel.id,
    }))
}

async fn read_form(mut payload: Multipart, limit: usize) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    let mut total = 0usize;
    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let name = field.content_disposition().get_name().map(str::to_owned);
        match name.as_deref() {
            Some(PANEL_FIELD) => {
                if form.panel.is_some() {
                    return Err(ApiError::BadRequest("Only one panel file is allowed".into()));
                }
                // a plain text field under the file's name carries no file
                if field.content_disposition().get_filename().is_none() {
                    drain_field(&mut field, None, &mut total, limit).await?;
                    continue;
                }
                // declared type is checked before any of the file is buffered
                let declared_image = field
                    .content_type()
                    .map(|m| m.type_().as_str().eq_ignore_ascii_case("image"))
                    .unwrap_or(false);
                if !declared_image {
                    let declared = field.content_type().map(|m| m.to_string());
                    log::info!("rejecting upload declared as {declared:?}");
                    return Err(ApiError::UnsupportedMediaType);
                }
                let mut buf = Vec::new();
                drain_field(&mut field, Some(&mut buf), &mut total, limit).await?;
                form.panel = Some(buf);
            }
            Some(key @ (CHAIN_FIELD | AUTHOR_FIELD)) => {
                let mut buf = Vec::new();
                drain_field(&mut field, Some(&mut buf), &mut total, limit).await?;
                if buf.len() > MAX_TEXT_FIELD {
                    return Err(ApiError::BadRequest(format!("{key} is too long")));
                }
                let value = Some(String::from_utf8_lossy(&buf).into_owned());
                if key == CHAIN_FIELD {
                    form.chain_id = value;
                } else {
                    form.author_id = value;
                }
            }
            _ => drain_field(&mut field, None, &mut total, limit).await?,
        }
    }
    Ok(form)
}

// Every byte of every field counts toward the body cap, kept or not.
async fn drain_field(
    field: &mut Field,
    mut sink: Option<&mut Vec<u8>>,
    total: &mut usize,
    limit: usize,
) -> Result<(), ApiError> {
    while let Some(chunk) = field.try_next().await.map_err(malformed)? {
        *total += chunk.len();
        if *total > limit {
            return Err(ApiError::PayloadTooLarge);
        }
        if let Some(buf) = sink.as_deref_mut() {
            buf.extend_from_slice(&chunk);
        }
    }
    Ok(())
}

fn malformed(e: actix_multipart::MultipartError) -> ApiError {
    log::warn!("multipart error: {e}");
    ApiError::BadRequest("Malformed multipart body".into())
}

async fn discard(data: &AppState, files: &[(RenditionKind, &str)]) {
    for (kind, name) in files {
        if let Err(e) = data.store.delete(*kind, name).await {
            log::warn!("failed to remove {}/{name} after aborted upload: {e}", kind.mount());
        }
    }
}

#[utoipa::path(
    get,
    path = "/panels",
    params(PanelQuery),
    responses(
        (status = 200, description = "Up to 50 panels, newest first", body = [Panel]),
        (status = 500, description = "Query failed")
    )
)]
pub async fn list_panels(
    data: web::Data<AppState>,
    query: web::Query<PanelQuery>,
) -> Result<HttpResponse, ApiError> {
    let panels = data.repo.recent_panels(query.chain_filter(), RECENT_LIMIT).await?;
    Ok(HttpResponse::Ok().json(panels))
}

#[utoipa::path(
    get,
    path = "/uploads/{filename}",
    params(("filename" = String, Path, description = "`{id}.jpg`")),
    responses(
        (status = 200, description = "Full-size rendition", content_type = "image/jpeg"),
        (status = 404, description = "Unknown file")
    )
)]
pub async fn get_upload(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    serve(&data, RenditionKind::Full, &path.into_inner()).await
}

#[utoipa::path(
    get,
    path = "/thumbs/{filename}",
    params(("filename" = String, Path, description = "`{id}_thumb.jpg`")),
    responses(
        (status = 200, description = "Thumbnail rendition", content_type = "image/jpeg"),
        (status = 404, description = "Unknown file")
    )
)]
pub async fn get_thumb(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    serve(&data, RenditionKind::Thumb, &path.into_inner()).await
}

async fn serve(data: &AppState, kind: RenditionKind, name: &str) -> Result<HttpResponse, ApiError> {
    let bytes = data.store.load(kind, name).await?;
    let mime = infer::get(&bytes)
        .map(|t| t.mime_type())
        .unwrap_or(pipeline::CONTENT_TYPE);
    Ok(HttpResponse::Ok().insert_header((header::CONTENT_TYPE, mime)).body(bytes))
}

pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound)
}

async fn method_not_allowed() -> Result<HttpResponse, ApiError> {
    Err(ApiError::MethodNotAllowed)
}
