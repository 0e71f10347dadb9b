//! PostgREST-style table sink (Supabase REST API)
//!
//! Upserts POST JSON arrays with `on_conflict=<key fields>` and
//! `Prefer: resolution=merge-duplicates`; existing rows are read back through
//! paginated GETs for skip-existing runs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::domain::{CompletionKey, CompletionSpec, KeySpec, Record, RecordSink};
use crate::errors::EtlError;
use crate::infrastructure::http_client::HttpClient;

const UPSERT_PREFER: &str = "return=minimal,resolution=merge-duplicates";

pub struct RestSink {
    client: Arc<HttpClient>,
    base_url: String,
    key: String,
    table: String,
    read_page_size: usize,
}

impl RestSink {
    pub fn new(
        client: Arc<HttpClient>,
        base_url: impl Into<String>,
        key: impl Into<String>,
        table: impl Into<String>,
        read_page_size: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            table: table.into(),
            read_page_size: read_page_size.max(1),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_url(&self) -> Result<Url, EtlError> {
        Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))
            .map_err(|e| EtlError::Config(format!("Invalid sink URL '{}': {e}", self.base_url)))
    }

    /// URL for an upsert keyed on `key`.
    pub fn upsert_url(&self, key: &KeySpec) -> Result<Url, EtlError> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("on_conflict", &key.on_conflict());
        Ok(url)
    }

    /// URL for one page of a keyed read.
    pub fn read_url(&self, fields: &[&str], offset: usize) -> Result<Url, EtlError> {
        let columns = fields.join(",");
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("select", &columns)
            .append_pair("order", &columns)
            .append_pair("limit", &self.read_page_size.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    async fn read_page(&self, fields: &[&str], offset: usize) -> Result<Vec<Value>, EtlError> {
        let url = self.read_url(fields, offset)?;
        let request = self.authorized(self.client.get(url.as_str()));
        let rows: Vec<Value> = self.client.get_json(request).await?;
        debug!("Read {} rows from {} at offset {}", rows.len(), self.table, offset);
        Ok(rows)
    }

    /// Completion keys of every row already in the table.
    pub async fn fetch_existing_keys(
        &self,
        spec: &CompletionSpec,
    ) -> Result<HashSet<CompletionKey>, EtlError> {
        let fields = spec.field_names();
        let rows = collect_pages(|offset| self.read_page(&fields, offset)).await?;
        let keys: HashSet<CompletionKey> = rows
            .into_iter()
            .filter_map(Record::from_value)
            .filter_map(|r| spec.key_for_record(&r))
            .collect();

        info!("Found {} existing keys in {}", keys.len(), self.table);
        Ok(keys)
    }
}

/// Reads pages by offset until one comes back empty. The server may cap a
/// page below the requested limit, so a short page is not the end.
pub(crate) async fn collect_pages<F, Fut>(mut read_page: F) -> Result<Vec<Value>, EtlError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, EtlError>>,
{
    let mut rows = Vec::new();
    loop {
        let page = read_page(rows.len()).await?;
        if page.is_empty() {
            return Ok(rows);
        }
        rows.extend(page);
    }
}

#[async_trait]
impl RecordSink for RestSink {
    async fn upsert(&self, key: &KeySpec, batch: &[Record]) -> Result<(), EtlError> {
        let url = self.upsert_url(key)?;
        let request = self
            .authorized(self.client.post(url.as_str()))
            .header("Content-Type", "application/json")
            .header("Prefer", UPSERT_PREFER)
            .json(batch);
        self.client.send(request).await?;
        Ok(())
    }
}
