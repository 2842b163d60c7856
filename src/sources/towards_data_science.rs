//! Towards Data Science articles from the publication's RSS feed.
//!
//! Descriptions arrive as HTML (usually CDATA); they are reduced to visible
//! text before becoming the snippet.

use super::http::HttpSource;
use super::{AdapterOutput, FetchContext, ParsedPage, SourceAdapter};
use crate::config::{FetchSettings, SOURCE_TOWARDS_DATA_SCIENCE};
use crate::error::AdapterError;
use crate::models::RawItem;
use crate::utils::{collapse_whitespace, html_to_text};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{info, instrument};

const FEED_URL: &str = "https://towardsdatascience.com/feed";

pub struct TowardsDataScience {
    http: HttpSource,
    endpoint: String,
}

impl TowardsDataScience {
    pub fn new(fetch: &FetchSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpSource::new(SOURCE_TOWARDS_DATA_SCIENCE, fetch, None)?,
            endpoint: FEED_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl SourceAdapter for TowardsDataScience {
    fn source_id(&self) -> &'static str {
        SOURCE_TOWARDS_DATA_SCIENCE
    }

    #[instrument(level = "info", skip_all, fields(source = SOURCE_TOWARDS_DATA_SCIENCE))]
    async fn fetch(&self, ctx: &FetchContext) -> AdapterOutput {
        let result = match self.http.get_text(&self.endpoint).await {
            Ok(xml) => parse_rss(&xml, ctx.now, ctx.max_items),
            Err(e) => Err(e),
        };
        if let Ok(page) = &result {
            info!(count = page.items.len(), skipped = page.skipped, "Fetched articles");
        }
        result.into()
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    // `<dc:creator>` arrives under its local name.
    #[serde(rename = "creator", alias = "dc:creator")]
    creator: Option<String>,
}

/// Parse an RSS 2.0 document.
pub fn parse_rss(
    xml: &str,
    fetched_at: DateTime<Utc>,
    max_items: usize,
) -> Result<ParsedPage, AdapterError> {
    let rss: Rss = from_str(xml)
        .map_err(|e| AdapterError::parse(SOURCE_TOWARDS_DATA_SCIENCE, format!("rss: {e}")))?;

    let mut page = ParsedPage::default();
    for item in rss.channel.items {
        if page.is_full(max_items) {
            break;
        }
        let title = item
            .title
            .as_deref()
            .map(collapse_whitespace)
            .unwrap_or_default();
        let link = item
            .link
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if title.is_empty() || link.is_empty() {
            page.skip(SOURCE_TOWARDS_DATA_SCIENCE, "item without title or link");
            continue;
        }
        let published_at = match item.pub_date.as_deref().map(str::trim) {
            None => None,
            Some(raw) => match DateTime::parse_from_rfc2822(raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(_) => {
                    page.skip(SOURCE_TOWARDS_DATA_SCIENCE, "unparsable pubDate");
                    continue;
                }
            },
        };

        page.items.push(
            RawItem::new(SOURCE_TOWARDS_DATA_SCIENCE, title, link, fetched_at)
                .with_snippet(item.description.as_deref().map(html_to_text))
                .with_published_at(published_at)
                .with_meta("author", item.creator.unwrap_or_default()),
        );
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::ts;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Towards Data Science</title>
    <link>https://towardsdatascience.com</link>
    <description>Your home for data science and AI.</description>
    <item>
      <title>Fine-tuning Llama 4 on a Single GPU</title>
      <link>https://towardsdatascience.com/fine-tuning-llama-4/</link>
      <dc:creator>Jane Doe</dc:creator>
      <pubDate>Wed, 02 Apr 2025 14:30:00 +0000</pubDate>
      <description><![CDATA[<p>A <strong>practical</strong> guide.</p><img src="x.png"/>]]></description>
    </item>
    <item>
      <title></title>
      <link>https://towardsdatascience.com/empty/</link>
    </item>
    <item>
      <title>Broken date</title>
      <link>https://towardsdatascience.com/broken/</link>
      <pubDate>someday</pubDate>
    </item>
    <item>
      <title>No description</title>
      <link>https://towardsdatascience.com/plain/</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let page = parse_rss(FEED, ts(0), 25).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.skipped, 2);

        let first = &page.items[0];
        assert_eq!(first.title, "Fine-tuning Llama 4 on a Single GPU");
        assert_eq!(first.summary_snippet.as_deref(), Some("A practical guide."));
        assert_eq!(first.metadata.get("author").map(String::as_str), Some("Jane Doe"));
        assert_eq!(
            first.published_at.map(|d| d.to_rfc3339()),
            Some("2025-04-02T14:30:00+00:00".to_string())
        );
        assert!(page.items[1].summary_snippet.is_none());
    }

    #[test]
    fn test_parse_rss_respects_cap() {
        let page = parse_rss(FEED, ts(0), 1).unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_parse_rss_without_channel_is_error() {
        assert!(parse_rss("<rss></rss>", ts(0), 25).is_err());
    }
}
