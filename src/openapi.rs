use crate::models::{Panel, UploadResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::upload_panel,
        crate::routes::list_panels,
        crate::routes::get_upload,
        crate::routes::get_thumb,
    ),
    components(schemas(Panel, UploadResponse)),
    tags(
        (name = "panels", description = "Panel upload and listing"),
    )
)]
pub struct ApiDoc;
