//! Paper source collaborator: metadata lookup and raw source download

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::Client;
use tokio::time::sleep;

use crate::config::SourceConfig;
use crate::error::{Error, Result};

/// Partial paper details fetched from the source
#[derive(Debug, Clone)]
pub struct PaperDetails {
    pub id: String,
    pub title: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub authors: String,
    pub abstract_text: String,
}

/// Trait for the external paper source
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Look up paper metadata; `NotFound` when the id resolves to nothing
    async fn details(&self, paper_id: &str) -> Result<PaperDetails>;

    /// Download the LaTeX source archive (tarball or single gzipped file)
    async fn download_source(&self, paper_id: &str) -> Result<Vec<u8>>;

    /// Download the rendered PDF
    async fn download_pdf(&self, paper_id: &str) -> Result<Vec<u8>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// arXiv export API implementation
pub struct ArxivSource {
    client: Client,
    base_url: String,
    max_retries: u32,
}

impl ArxivSource {
    pub fn new(config: &SourceConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        }
    }

    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                // A missing paper will not appear on retry
                Err(e @ Error::NotFound(_)) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let delay = Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            "Source request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            self.max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(Error::provider(format!(
            "source retries exhausted: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn fetch_bytes(&self, url: String, paper_id: &str) -> Result<Vec<u8>> {
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(paper_id.to_string()));
        }
        let response = response.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SourceProvider for ArxivSource {
    async fn details(&self, paper_id: &str) -> Result<PaperDetails> {
        let url = format!(
            "{}/api/query?id_list={}&max_results=1",
            self.base_url, paper_id
        );
        let body = self
            .retry_request(|| async {
                let response = self.client.get(&url).send().await?.error_for_status()?;
                Ok(response.text().await?)
            })
            .await?;

        parse_atom_entry(&body, paper_id)
    }

    async fn download_source(&self, paper_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/e-print/{}", self.base_url, paper_id);
        self.retry_request(|| self.fetch_bytes(url.clone(), paper_id))
            .await
    }

    async fn download_pdf(&self, paper_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/pdf/{}", self.base_url, paper_id);
        self.retry_request(|| self.fetch_bytes(url.clone(), paper_id))
            .await
    }

    fn name(&self) -> &str {
        "arxiv"
    }
}

/// Collapse whitespace runs into single spaces
fn clean_spaces(text: &str) -> String {
    static SPACES: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = SPACES.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
    re.replace_all(text.trim(), " ").into_owned()
}

/// Parse the first `<entry>` of an arXiv Atom response into paper details
pub(crate) fn parse_atom_entry(xml: &str, paper_id: &str) -> Result<PaperDetails> {
    let mut reader = Reader::from_str(xml);

    let mut in_entry = false;
    let mut in_author = false;
    let mut current: Option<String> = None;

    let mut title = None;
    let mut published = None;
    let mut summary = None;
    let mut authors: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "entry" => in_entry = true,
                    "author" if in_entry => in_author = true,
                    _ => current = Some(name),
                }
            }
            Ok(Event::Text(text)) if in_entry => {
                let value = text.unescape().unwrap_or_default().into_owned();
                match current.as_deref() {
                    Some("title") if title.is_none() => title = Some(clean_spaces(&value)),
                    Some("published") if published.is_none() => published = Some(value),
                    Some("summary") if summary.is_none() => summary = Some(clean_spaces(&value)),
                    Some("name") if in_author => authors.push(value.trim().to_string()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"entry" => break,
                b"author" => in_author = false,
                _ => current = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::provider(format!("malformed metadata response: {}", e)))
            }
            _ => {}
        }
    }

    let title = title.ok_or_else(|| Error::NotFound(paper_id.to_string()))?;

    Ok(PaperDetails {
        id: paper_id.to_string(),
        title,
        date: published
            .map(|p| p.chars().take(10).collect())
            .unwrap_or_default(),
        authors: authors.join(", "),
        abstract_text: summary.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <summary>  The dominant sequence transduction models...
    </summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_entry() {
        let details = parse_atom_entry(SAMPLE_FEED, "1706.03762").unwrap();
        assert_eq!(details.title, "Attention Is All You Need");
        assert_eq!(details.date, "2017-06-12");
        assert_eq!(details.authors, "Ashish Vaswani, Noam Shazeer");
        assert!(details.abstract_text.starts_with("The dominant"));
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let empty = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>q</title></feed>"#;
        let err = parse_atom_entry(empty, "0000.00000").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
