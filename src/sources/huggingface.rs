//! Hugging Face trending models via the public models API.

use super::http::HttpSource;
use super::{AdapterOutput, FetchContext, ParsedPage, SourceAdapter};
use crate::config::{FetchSettings, HuggingFaceSettings, SOURCE_HUGGINGFACE};
use crate::error::AdapterError;
use crate::models::RawItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};
use url::Url;

const MODELS_URL: &str = "https://huggingface.co/api/models";

pub struct HuggingFaceTrending {
    http: HttpSource,
    endpoint: String,
}

impl HuggingFaceTrending {
    pub fn new(
        fetch: &FetchSettings,
        settings: &HuggingFaceSettings,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpSource::new(SOURCE_HUGGINGFACE, fetch, settings.token.clone())?,
            endpoint: MODELS_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn request_url(&self, limit: usize) -> Result<Url, AdapterError> {
        let limit = limit.to_string();
        Url::parse_with_params(
            &self.endpoint,
            [
                ("sort", "trendingScore"),
                ("direction", "-1"),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| AdapterError::Client {
            source_id: SOURCE_HUGGINGFACE.to_string(),
            message: format!("bad endpoint {}: {e}", self.endpoint),
        })
    }
}

#[async_trait]
impl SourceAdapter for HuggingFaceTrending {
    fn source_id(&self) -> &'static str {
        SOURCE_HUGGINGFACE
    }

    #[instrument(level = "info", skip_all, fields(source = SOURCE_HUGGINGFACE))]
    async fn fetch(&self, ctx: &FetchContext) -> AdapterOutput {
        let result = async {
            let url = self.request_url(ctx.max_items)?;
            let json = self.http.get_json::<Value>(url.as_str()).await?;
            parse_models(json, ctx.now, ctx.max_items)
        }
        .await;
        if let Ok(page) = &result {
            info!(count = page.items.len(), skipped = page.skipped, "Fetched trending models");
        }
        result.into()
    }
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "modelId")]
    model_id: Option<String>,
    #[serde(default)]
    likes: Option<f64>,
    #[serde(default)]
    downloads: Option<u64>,
    #[serde(default)]
    pipeline_tag: Option<String>,
    #[serde(default, rename = "createdAt")]
    created_at: Option<String>,
}

/// Map the models API response onto items.
///
/// The body must be a JSON array; entries that do not decode are skipped.
pub fn parse_models(
    json: Value,
    fetched_at: DateTime<Utc>,
    max_items: usize,
) -> Result<ParsedPage, AdapterError> {
    let Value::Array(entries) = json else {
        return Err(AdapterError::parse(
            SOURCE_HUGGINGFACE,
            "expected a JSON array of models",
        ));
    };

    let mut page = ParsedPage::default();
    for raw in entries {
        if page.is_full(max_items) {
            break;
        }
        let entry: ModelEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                page.skip(SOURCE_HUGGINGFACE, &e.to_string());
                continue;
            }
        };
        let Some(id) = entry
            .id
            .as_deref()
            .or(entry.model_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            page.skip(SOURCE_HUGGINGFACE, "missing model id");
            continue;
        };
        let published_at = match entry.created_at.as_deref() {
            None => None,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(_) => {
                    page.skip(SOURCE_HUGGINGFACE, "unparsable createdAt");
                    continue;
                }
            },
        };

        let author = id.split_once('/').map(|(a, _)| a).unwrap_or_default();
        let pipeline = entry.pipeline_tag.as_deref().unwrap_or_default();
        let snippet = describe(pipeline, author, entry.downloads);

        page.items.push(
            RawItem::new(
                SOURCE_HUGGINGFACE,
                id,
                format!("https://huggingface.co/{id}"),
                fetched_at,
            )
            .with_snippet(snippet)
            .with_score(entry.likes)
            .with_published_at(published_at)
            .with_meta("author", author)
            .with_meta("pipeline_tag", pipeline)
            .with_meta(
                "downloads",
                entry.downloads.map(|d| d.to_string()).unwrap_or_default(),
            ),
        );
    }
    Ok(page)
}

fn describe(pipeline: &str, author: &str, downloads: Option<u64>) -> Option<String> {
    let mut parts = Vec::new();
    if !pipeline.is_empty() {
        parts.push(format!("{} model", pipeline.replace('-', " ")));
    }
    if !author.is_empty() {
        parts.push(format!("by {author}"));
    }
    if let Some(d) = downloads {
        parts.push(format!("with {d} downloads"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::ts;
    use crate::sources::http::tests::{fast_settings, serve};
    use serde_json::json;

    #[test]
    fn test_parse_models_maps_fields() {
        let body = json!([
            {
                "_id": "1",
                "id": "meta-llama/Llama-4-Scout-17B-16E",
                "likes": 812,
                "downloads": 120345,
                "pipeline_tag": "image-text-to-text",
                "createdAt": "2025-04-02T12:00:00.000Z"
            },
            { "likes": 3 },
            { "id": "x/y", "createdAt": "yesterday" },
            { "modelId": "mistralai/Magistral-Small" }
        ]);
        let page = parse_models(body, ts(0), 25).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.skipped, 2);

        let llama = &page.items[0];
        assert_eq!(llama.url, "https://huggingface.co/meta-llama/Llama-4-Scout-17B-16E");
        assert_eq!(llama.score, Some(812.0));
        assert_eq!(llama.metadata["pipeline_tag"], "image-text-to-text");
        assert_eq!(
            llama.summary_snippet.as_deref(),
            Some("image text to text model by meta-llama with 120345 downloads")
        );
        assert!(llama.published_at.is_some());

        let magistral = &page.items[1];
        assert_eq!(magistral.title, "mistralai/Magistral-Small");
        assert!(magistral.score.is_none());
    }

    #[test]
    fn test_parse_models_rejects_non_array() {
        let err = parse_models(json!({"error": "nope"}), ts(0), 25).unwrap_err();
        assert!(matches!(err, AdapterError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_fetch_against_local_server() {
        let (base, _) = serve(vec![(200, r#"[{"id":"a/b","likes":1}]"#.to_string())]).await;
        let adapter = HuggingFaceTrending::new(&fast_settings(), &HuggingFaceSettings::default())
            .unwrap()
            .with_endpoint(&base);
        let out = adapter
            .fetch(&FetchContext { now: ts(0), max_items: 10 })
            .await;
        assert!(out.error.is_none());
        assert_eq!(out.items[0].title, "a/b");
    }
}
