use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One indexed image. Stored in day shards as a JSON array; field names stay
/// camelCase to match the layout the original frontend consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub filename: String,
    pub shot_date: DateTime<Utc>,
    pub upload_date: DateTime<Utc>,
    pub original_path: String,
    pub thumbnail_path: String,
}

/// All images shot on one calendar day, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayGroup {
    pub date: String,
    pub images: Vec<ImageRecord>,
}

/// One page of the date index. Pages are counted in day groups, not images.
/// `total` is only computed for the first page; later pages skip the full
/// count by contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    pub days: Vec<DayGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}
