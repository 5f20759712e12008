//! Thin Airtable REST client.
//!
//! Covers the record endpoints (`/v0/{base}/{table}`) and the metadata
//! endpoint used for table discovery (`/v0/meta/bases/{base}/tables`).
//! List calls follow `offset` pagination until `max_records` is reached.
//!
//! Airtable answers 429 above five requests per second per base, so every
//! call goes through [`crate::retry`]. POSTs are only retried on 429, where
//! the request was rejected before any write; a 5xx or a dropped connection
//! may have created the record already.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::retry::{backoff_delay, is_retryable};

/// Airtable accepts at most this many records per write/delete call.
pub const BATCH_LIMIT: usize = 10;

const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct TablesResponse {
    tables: Vec<TableSchema>,
}

#[derive(Deserialize)]
struct ListResponse {
    records: Vec<Record>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Deserialize)]
struct WriteResponse {
    records: Vec<Record>,
}

/// Query options for [`AirtableClient::list_records`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub formula: Option<String>,
    pub max_records: Option<usize>,
    /// `(field, descending)`
    pub sort: Option<(String, bool)>,
}

#[derive(Clone)]
pub struct AirtableClient {
    http: reqwest::Client,
    api_url: Url,
    base_id: String,
    api_key: String,
    max_retries: u32,
}

impl std::fmt::Debug for AirtableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableClient")
            .field("api_url", &self.api_url.as_str())
            .field("base_id", &self.base_id)
            .finish_non_exhaustive()
    }
}

impl AirtableClient {
    pub fn new(api_url: &str, base_id: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let api_url = Url::parse(api_url)
            .with_context(|| format!("Invalid Airtable API url: {api_url}"))?;
        Ok(Self {
            http,
            api_url,
            base_id: base_id.to_string(),
            api_key: api_key.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Airtable API url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        self.url(&["v0", &self.base_id, table])
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<reqwest::Response> {
        let replayable = method != Method::POST;
        let mut attempt = 0;
        loop {
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&self.api_key);
            if let Some(body) = body {
                req = req.json(body);
            }
            let retry = attempt < self.max_retries;

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    let again = if status == StatusCode::TOO_MANY_REQUESTS {
                        retry
                    } else {
                        retry && replayable && is_retryable(status)
                    };
                    if !again {
                        return Ok(response);
                    }
                    tracing::debug!(%method, path = url.path(), %status, attempt, "retrying Airtable call");
                }
                Err(e) if retry && replayable => {
                    tracing::debug!(%method, path = url.path(), error = %e, attempt, "retrying Airtable call");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Airtable {method} {} failed", url.path()));
                }
            }

            attempt += 1;
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }

    async fn expect_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Airtable API error {status}: {body}");
        }
        Ok(response.json::<T>().await?)
    }

    /// Every table in the base with its field names.
    pub async fn list_tables(&self) -> Result<Vec<TableSchema>> {
        let url = self.url(&["v0", "meta", "bases", &self.base_id, "tables"])?;
        let response = self.send(Method::GET, url, None).await?;
        let parsed: TablesResponse = Self::expect_json(response).await?;
        Ok(parsed.tables)
    }

    pub async fn list_records(&self, table: &str, query: &ListQuery) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut url = self.table_url(table)?;
            {
                let mut pairs = url.query_pairs_mut();
                if let Some(formula) = &query.formula {
                    pairs.append_pair("filterByFormula", formula);
                }
                if let Some(max) = query.max_records {
                    pairs.append_pair("maxRecords", &max.to_string());
                    pairs.append_pair("pageSize", &max.clamp(1, 100).to_string());
                }
                if let Some((field, desc)) = &query.sort {
                    pairs.append_pair("sort[0][field]", field);
                    pairs.append_pair("sort[0][direction]", if *desc { "desc" } else { "asc" });
                }
                if let Some(offset) = &offset {
                    pairs.append_pair("offset", offset);
                }
            }

            let response = self.send(Method::GET, url, None).await?;
            let page: ListResponse = Self::expect_json(response).await?;
            out.extend(page.records);

            if query.max_records.is_some_and(|max| out.len() >= max) {
                out.truncate(query.max_records.unwrap_or(out.len()));
                break;
            }
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(out)
    }

    /// Fetch one record; `Ok(None)` on 404.
    pub async fn get_record(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let url = self.url(&["v0", &self.base_id, table, id])?;
        let response = self.send(Method::GET, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::expect_json(response).await?))
    }

    pub async fn create_record(&self, table: &str, fields: Map<String, Value>) -> Result<Record> {
        let body = serde_json::json!({ "records": [{ "fields": fields }], "typecast": true });
        let response = self
            .send(Method::POST, self.table_url(table)?, Some(&body))
            .await?;
        let parsed: WriteResponse = Self::expect_json(response).await?;
        parsed
            .records
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Airtable create returned no records"))
    }

    pub async fn update_record(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Record> {
        let body = serde_json::json!({
            "records": [{ "id": id, "fields": fields }],
            "typecast": true,
        });
        let response = self
            .send(Method::PATCH, self.table_url(table)?, Some(&body))
            .await?;
        let parsed: WriteResponse = Self::expect_json(response).await?;
        parsed
            .records
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Airtable update returned no records"))
    }

    /// Delete records in batches of [`BATCH_LIMIT`]. Returns the number deleted.
    pub async fn delete_records(&self, table: &str, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for batch in ids.chunks(BATCH_LIMIT) {
            let mut url = self.table_url(table)?;
            {
                let mut pairs = url.query_pairs_mut();
                for id in batch {
                    pairs.append_pair("records[]", id);
                }
            }
            let response = self.send(Method::DELETE, url, None).await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Airtable API error {status}: {body}");
            }
            deleted += batch.len();
        }
        Ok(deleted)
    }
}

/// Quote a value for use inside an Airtable formula string literal.
pub fn formula_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Reference a field by name inside a formula.
pub fn formula_field(name: &str) -> String {
    format!("{{{}}}", name.replace('}', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_escaping() {
        assert_eq!(formula_literal("O'Brien"), r"'O\'Brien'");
        assert_eq!(formula_literal(r"a\b"), r"'a\\b'");
        assert_eq!(formula_field("User ID"), "{User ID}");
        assert_eq!(formula_field("bad}name"), "{badname}");
    }

    #[test]
    fn test_table_url_encodes_spaces() {
        let client = AirtableClient::new("https://api.airtable.com", "app1", "key", 5).unwrap();
        let url = client.table_url("Veteran Resources").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/app1/Veteran%20Resources"
        );
    }

    #[test]
    fn test_record_deserialize_defaults() {
        let record: Record = serde_json::from_str(r#"{"id":"rec1"}"#).unwrap();
        assert_eq!(record.id, "rec1");
        assert!(record.fields.is_empty());
        assert!(record.created_time.is_none());
    }
}
