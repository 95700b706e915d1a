//! Store norske leksikon provider. Articles are addressed either by
//! numeric id (`/api/v1/article/{id}`) or by URL slug (`/{slug}.json`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::registry::{
    Content, RegistryError, ToolDefinition, ToolError, ToolHandler, ToolRegistry,
};
use crate::schema::Schema;
use crate::upstream::{build_client, fetch_json};

const BASE_URL: &str = "https://snl.no";
const MAX_BODY_CHARS: usize = 3000;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static pattern parses"));

pub struct SnlClient {
    http: reqwest::Client,
}

impl SnlClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }

    pub async fn search(&self, query: &str, limit: u64) -> Result<Vec<Value>, ToolError> {
        let params = [
            ("query", query.to_string()),
            ("limit", limit.to_string()),
        ];
        let data = fetch_json(&self.http, &format!("{BASE_URL}/api/v1/search"), &params).await?;
        data.as_array()
            .cloned()
            .ok_or_else(|| ToolError::Malformed("search response is not a list".to_string()))
    }

    pub async fn article(&self, identifier: &str) -> Result<Value, ToolError> {
        let identifier = identifier.trim().trim_start_matches('/');
        if identifier.is_empty() {
            return Err(ToolError::Invalid("article identifier is empty".to_string()));
        }

        let url = if identifier.chars().all(|ch| ch.is_ascii_digit()) {
            format!("{BASE_URL}/api/v1/article/{identifier}")
        } else {
            format!("{BASE_URL}/{identifier}.json")
        };
        fetch_json(&self.http, &url, &[]).await
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_limit() -> u64 {
    10
}

struct SearchTool {
    client: Arc<SnlClient>,
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let results = self.client.search(&args.query, args.limit).await?;
        Ok(vec![Content::text(format_search_results(
            &args.query,
            &results,
        ))])
    }
}

fn format_search_results(query: &str, results: &[Value]) -> String {
    if results.is_empty() {
        return format!("No SNL articles found for: {query}");
    }

    let mut lines = vec![format!(
        "Found {} articles in Store norske leksikon for '{query}':\n",
        results.len()
    )];
    for (index, result) in results.iter().enumerate() {
        let title = result["headword"]
            .as_str()
            .or_else(|| result["title"].as_str())
            .unwrap_or("Unknown");
        lines.push(format!("{}. **{title}**", index + 1));

        let snippet = result["snippet"]
            .as_str()
            .or_else(|| result["first_two_sentences"].as_str())
            .unwrap_or_default();
        if !snippet.is_empty() {
            lines.push(format!("   {}", snippet.replace("<b>", "").replace("</b>", "")));
        }

        let url = result["article_url"]
            .as_str()
            .or_else(|| result["permalink"].as_str())
            .unwrap_or_default();
        if !url.is_empty() {
            lines.push(format!("   {url}"));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

#[derive(Debug, Deserialize)]
struct ArticleArgs {
    identifier: String,
}

struct ArticleTool {
    client: Arc<SnlClient>,
}

#[async_trait]
impl ToolHandler for ArticleTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: ArticleArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let article = self.client.article(&args.identifier).await?;
        Ok(vec![Content::text(format_article(
            &args.identifier,
            &article,
        ))])
    }
}

fn format_article(identifier: &str, article: &Value) -> String {
    let title = article["headword"].as_str().unwrap_or(identifier);
    let raw_body = article["plain_text_body"]
        .as_str()
        .or_else(|| article["xhtml_body"].as_str())
        .unwrap_or("No content available");
    let body = truncate_chars(&strip_html(raw_body), MAX_BODY_CHARS);

    let mut text = format!("# {title}\n\n{body}");

    let authors: Vec<&str> = article["authors"]
        .as_array()
        .map(|authors| {
            authors
                .iter()
                .filter_map(|author| author["full_name"].as_str())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if !authors.is_empty() {
        text.push_str(&format!("\n\n**Authors:** {}", authors.join(", ")));
    }

    let url = article["article_url"]
        .as_str()
        .or_else(|| article["permalink"].as_str())
        .unwrap_or_default();
    if !url.is_empty() {
        text.push_str(&format!("\n\n**Source:** {url}"));
    }

    text
}

fn strip_html(body: &str) -> String {
    if !body.contains('<') {
        return body.to_string();
    }
    HTML_TAG
        .replace_all(body, "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}... [truncated]")
}

pub fn register_tools(registry: &mut ToolRegistry, config: &Config) -> Result<(), RegistryError> {
    let client = Arc::new(
        SnlClient::new(config.tool_timeout)
            .map_err(|err| RegistryError::Provider(err.to_string()))?,
    );

    registry.register(ToolDefinition::new(
        "snl-search",
        "Search Store norske leksikon (the Norwegian national encyclopedia) for articles.",
        Schema::object(
            [
                ("query", Schema::string("Search term")),
                ("limit", Schema::integer("Maximum number of results")),
            ],
            &["query"],
        ),
        config.tool_timeout,
        Arc::new(SearchTool {
            client: Arc::clone(&client),
        }),
    ))?;

    registry.register(ToolDefinition::new(
        "snl-article",
        "Fetch a full article from Store norske leksikon by numeric id or URL slug.",
        Schema::object(
            [(
                "identifier",
                Schema::string("Article id (numeric) or URL slug"),
            )],
            &["identifier"],
        ),
        config.tool_timeout,
        Arc::new(ArticleTool { client }),
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn search_formatting_lists_headword_snippet_and_url() {
        let results = vec![json!({
            "headword": "Borgund stavkirke",
            "snippet": "en <b>stavkirke</b> i Lærdal",
            "article_url": "https://snl.no/Borgund_stavkirke",
        })];
        let text = format_search_results("stavkirke", &results);
        assert!(text.contains("1. **Borgund stavkirke**"));
        assert!(text.contains("en stavkirke i Lærdal"));
        assert!(text.contains("https://snl.no/Borgund_stavkirke"));
    }

    #[test]
    fn empty_search_reports_no_matches() {
        assert_eq!(
            format_search_results("xyzzy", &[]),
            "No SNL articles found for: xyzzy"
        );
    }

    #[test]
    fn article_formatting_strips_html_and_lists_authors() {
        let article = json!({
            "headword": "Vikingtid",
            "xhtml_body": "<p>Perioden fra&nbsp;793 &amp; utover.</p>",
            "authors": [{"full_name": "Kari Nordmann"}],
            "article_url": "https://snl.no/vikingtid",
        });
        let text = format_article("vikingtid", &article);
        assert!(text.starts_with("# Vikingtid"));
        assert!(text.contains("Perioden fra 793 & utover."));
        assert!(!text.contains("<p>"));
        assert!(text.contains("**Authors:** Kari Nordmann"));
        assert!(text.contains("**Source:** https://snl.no/vikingtid"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(MAX_BODY_CHARS + 100);
        let truncated = truncate_chars(&body, MAX_BODY_CHARS);
        assert!(truncated.ends_with("... [truncated]"));
        assert!(truncated.chars().count() < body.chars().count());
    }

    #[tokio::test]
    async fn empty_identifier_is_rejected() {
        let client = SnlClient::new(Duration::from_secs(1)).expect("client builds");
        let err = client
            .article("  /  ")
            .await
            .expect_err("expected invalid identifier");
        assert!(matches!(err, ToolError::Invalid(_)));
    }
}
