//! SEMrush AI-visibility element client (concept mentions)
//!
//! One POST per page to the element endpoint. The filter pins the day,
//! brand and model, plus the tag when the task carries one. Rows come back
//! under `blocks.data` and the total row count under
//! `blocks.data_statistics[0].rowCount`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::batch::fetcher::{Page, PageSource};
use crate::domain::{ParsedConcept, Record, Task};
use crate::errors::EtlError;
use crate::infrastructure::config::SemrushConfig;
use crate::infrastructure::http_client::HttpClient;

#[derive(Debug, Default, Deserialize)]
struct ElementResponse {
    #[serde(default)]
    blocks: Blocks,
}

#[derive(Debug, Default, Deserialize)]
struct Blocks {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    data_statistics: Vec<Statistics>,
}

#[derive(Debug, Deserialize)]
struct Statistics {
    #[serde(rename = "rowCount")]
    row_count: Option<u64>,
}

/// Request body for one page of concept mentions.
#[must_use]
pub fn render_payload(project_id: &str, task: &Task, offset: usize, limit: usize) -> Value {
    let date = task.date_str();
    let mut filters = vec![json!({ "op": "eq", "val": task.brand, "col": "CBF_brand" })];
    if let Some(tag) = &task.tag {
        filters.push(json!({
            "op": "or",
            "filters": [{ "col": "CBF_tags", "op": "eq", "val": tag }]
        }));
    }
    filters.push(json!({ "op": "eq", "val": task.model, "col": "CBF_model" }));

    json!({
        "render_data": {
            "project_id": project_id,
            "statistics": { "rowCount": { "col": "*", "func": "count" } },
            "pagination": { "limit": limit, "offset": offset },
            "filters": {
                "simple": { "start_date": date, "end_date": date },
                "advanced": { "op": "and", "filters": filters }
            }
        }
    })
}

fn field_or(row: &Value, field: &str, default: Value) -> Value {
    match row.get(field) {
        Some(Value::Null) | None => default,
        Some(v) => v.clone(),
    }
}

/// Flattens one vendor row and stamps the task dimensions onto it.
#[must_use]
pub fn transform_row(row: &Value, task: &Task) -> Record {
    let raw = row.get("concept").and_then(Value::as_str).unwrap_or_default();
    let parsed = ParsedConcept::parse(raw);

    let mut record = Record::new();
    record.insert("concept", parsed.concept);
    record.insert("concept_category", parsed.category);
    record.insert("concept_subcategory", parsed.subcategory);
    record.insert("mentions", field_or(row, "mentions_end", json!(0)));
    for sentiment in ["sentiment_positive", "sentiment_negative", "sentiment_neutral"] {
        record.insert(sentiment, field_or(row, sentiment, json!(0)));
    }
    record.insert("products", field_or(row, "products", json!([])));
    task.stamp(&mut record);
    record
}

pub struct SemrushConcepts {
    client: Arc<HttpClient>,
    url: String,
    api_key: String,
    project_id: String,
}

impl SemrushConcepts {
    /// Fails with a `Config` error when the key or element IDs are missing.
    pub fn from_config(client: Arc<HttpClient>, config: &SemrushConfig) -> Result<Self, EtlError> {
        config.require_fetch_settings()?;
        Ok(Self {
            client,
            url: config.element_url(),
            api_key: config.api_key()?.to_string(),
            project_id: config.project_id.clone(),
        })
    }
}

#[async_trait]
impl PageSource for SemrushConcepts {
    async fn fetch_page(&self, task: &Task, offset: usize, limit: usize) -> Result<Page, EtlError> {
        let request = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Apikey {}", self.api_key));
        let body = render_payload(&self.project_id, task, offset, limit);
        let response: ElementResponse = self.client.post_json(request, &body).await?;

        let total = response
            .blocks
            .data_statistics
            .first()
            .and_then(|s| s.row_count);
        let rows = response
            .blocks
            .data
            .iter()
            .map(|row| transform_row(row, task))
            .collect();

        Ok(Page { rows, total })
    }
}
