use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_CHAIN_ID: &str = "unknown";
pub const DEFAULT_AUTHOR_ID: &str = "anonymous";

/// One accepted panel as stored in the `panels` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct Panel {
    pub id: String,
    pub chain_id: String,
    pub author_id: String,
    pub image_path: String, // server-relative, e.g. /uploads/{id}.jpg
    pub thumb_path: String,
    pub created_at: i64, // epoch millis
}

/// Row payload; `created_at` is stamped by the repository at insert time.
#[derive(Debug, Clone)]
pub struct NewPanel {
    pub id: String,
    pub chain_id: String,
    pub author_id: String,
    pub image_path: String,
    pub thumb_path: String,
}

impl NewPanel {
    /// Applies the caller defaults: missing or empty correlation ids become
    /// `unknown` / `anonymous`. Anything else is kept byte for byte.
    pub fn new(
        id: impl Into<String>,
        chain_id: Option<String>,
        author_id: Option<String>,
        image_path: impl Into<String>,
        thumb_path: impl Into<String>,
    ) -> Self {
        fn or_default(v: Option<String>, default: &str) -> String {
            v.filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
        }
        Self {
            id: id.into(),
            chain_id: or_default(chain_id, DEFAULT_CHAIN_ID),
            author_id: or_default(author_id, DEFAULT_AUTHOR_ID),
            image_path: image_path.into(),
            thumb_path: thumb_path.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    pub image_url: String,
    pub thumb_url: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PanelQuery {
    /// Only return panels belonging to this chain.
    pub chain_id: Option<String>,
}

impl PanelQuery {
    pub fn chain_filter(&self) -> Option<&str> {
        self.chain_id.as_deref().filter(|s| !s.is_empty())
    }
}
