//! Wikipedia provider backed by the MediaWiki API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::registry::{
    Content, RegistryError, ToolDefinition, ToolError, ToolHandler, ToolRegistry,
};
use crate::schema::Schema;
use crate::upstream::{build_client, fetch_json};

const MAX_SEARCH_LIMIT: u64 = 500;
const MAX_GEO_RADIUS: u64 = 10_000;

pub struct WikipediaClient {
    http: reqwest::Client,
}

impl WikipediaClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }

    fn api_url(language: &str) -> Result<String, ToolError> {
        if !is_valid_language(language) {
            return Err(ToolError::Invalid(format!(
                "invalid language code '{language}'"
            )));
        }
        Ok(format!("https://{language}.wikipedia.org/w/api.php"))
    }

    pub async fn search(
        &self,
        language: &str,
        query: &str,
        limit: u64,
    ) -> Result<Vec<Value>, ToolError> {
        let url = Self::api_url(language)?;
        let params = [
            ("action", "query".to_string()),
            ("list", "search".to_string()),
            ("srsearch", query.to_string()),
            ("srlimit", limit.min(MAX_SEARCH_LIMIT).to_string()),
            ("format", "json".to_string()),
        ];

        let data = fetch_json(&self.http, &url, &params).await?;
        check_api_error(&data)?;
        Ok(data["query"]["search"].as_array().cloned().unwrap_or_default())
    }

    /// Intro extract for an exact title. `None` when the page is unknown.
    pub async fn summary(&self, language: &str, title: &str) -> Result<Option<Value>, ToolError> {
        let url = Self::api_url(language)?;
        let params = [
            ("action", "query".to_string()),
            ("prop", "extracts|info".to_string()),
            ("exintro", "true".to_string()),
            ("explaintext", "true".to_string()),
            ("titles", title.to_string()),
            ("inprop", "url".to_string()),
            ("format", "json".to_string()),
        ];

        let data = fetch_json(&self.http, &url, &params).await?;
        check_api_error(&data)?;

        let Some(pages) = data["query"]["pages"].as_object() else {
            return Ok(None);
        };
        for (page_id, page) in pages {
            if page_id == "-1" {
                return Ok(None);
            }
            return Ok(Some(page.clone()));
        }
        Ok(None)
    }

    pub async fn geosearch(
        &self,
        language: &str,
        latitude: f64,
        longitude: f64,
        radius: u64,
        limit: u64,
    ) -> Result<Vec<Value>, ToolError> {
        let url = Self::api_url(language)?;
        let params = [
            ("action", "query".to_string()),
            ("list", "geosearch".to_string()),
            ("gscoord", format!("{latitude}|{longitude}")),
            ("gsradius", radius.min(MAX_GEO_RADIUS).to_string()),
            ("gslimit", limit.min(MAX_SEARCH_LIMIT).to_string()),
            ("format", "json".to_string()),
        ];

        let data = fetch_json(&self.http, &url, &params).await?;
        check_api_error(&data)?;
        Ok(data["query"]["geosearch"]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }
}

fn check_api_error(data: &Value) -> Result<(), ToolError> {
    if let Some(error) = data.get("error") {
        let info = error["info"].as_str().unwrap_or("unknown error");
        return Err(ToolError::Upstream(format!("MediaWiki API error: {info}")));
    }
    Ok(())
}

/// The language code ends up in the hostname, so only plain codes pass.
fn is_valid_language(language: &str) -> bool {
    !language.is_empty()
        && language.len() <= 12
        && language
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

fn default_language() -> String {
    "no".to_string()
}

fn default_limit() -> u64 {
    10
}

fn default_radius() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_limit")]
    limit: u64,
}

struct SearchTool {
    client: Arc<WikipediaClient>,
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let results = self
            .client
            .search(&args.language, &args.query, args.limit)
            .await?;
        Ok(vec![Content::text(format_search_results(
            &args.query,
            &results,
        ))])
    }
}

fn format_search_results(query: &str, results: &[Value]) -> String {
    if results.is_empty() {
        return format!("No Wikipedia articles found for: {query}");
    }

    let mut lines = vec![format!(
        "Found {} Wikipedia articles for '{query}':\n",
        results.len()
    )];
    for (index, result) in results.iter().enumerate() {
        let title = result["title"].as_str().unwrap_or("Unknown");
        lines.push(format!("{}. **{title}**", index + 1));
        let snippet = strip_search_markup(result["snippet"].as_str().unwrap_or_default());
        if !snippet.is_empty() {
            lines.push(format!("   {snippet}..."));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

fn strip_search_markup(snippet: &str) -> String {
    snippet
        .replace("<span class=\"searchmatch\">", "")
        .replace("</span>", "")
}

#[derive(Debug, Deserialize)]
struct SummaryArgs {
    title: String,
    #[serde(default = "default_language")]
    language: String,
}

struct SummaryTool {
    client: Arc<WikipediaClient>,
}

#[async_trait]
impl ToolHandler for SummaryTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: SummaryArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let Some(page) = self.client.summary(&args.language, &args.title).await? else {
            return Ok(vec![Content::text(format!(
                "Article not found: {}",
                args.title
            ))]);
        };
        Ok(vec![Content::text(format_summary(
            &args.language,
            &args.title,
            &page,
        ))])
    }
}

fn format_summary(language: &str, requested_title: &str, page: &Value) -> String {
    let title = page["title"].as_str().unwrap_or(requested_title);
    let extract = page["extract"].as_str().unwrap_or("No content available");
    let url = page["fullurl"].as_str().map(str::to_string).unwrap_or_else(|| {
        format!(
            "https://{language}.wikipedia.org/wiki/{}",
            requested_title.replace(' ', "_")
        )
    });

    format!("# {title}\n\n{extract}\n\n**Source:** {url}")
}

#[derive(Debug, Deserialize)]
struct GeosearchArgs {
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_radius")]
    radius: u64,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_limit")]
    limit: u64,
}

struct GeosearchTool {
    client: Arc<WikipediaClient>,
}

#[async_trait]
impl ToolHandler for GeosearchTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: GeosearchArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let results = self
            .client
            .geosearch(
                &args.language,
                args.latitude,
                args.longitude,
                args.radius,
                args.limit,
            )
            .await?;
        Ok(vec![Content::text(format_geosearch_results(
            &args.language,
            args.latitude,
            args.longitude,
            args.radius,
            &results,
        ))])
    }
}

fn format_geosearch_results(
    language: &str,
    latitude: f64,
    longitude: f64,
    radius: u64,
    results: &[Value],
) -> String {
    if results.is_empty() {
        return format!(
            "No Wikipedia articles found within {radius}m of ({latitude}, {longitude})"
        );
    }

    let mut lines = vec![format!(
        "Found {} Wikipedia articles near ({latitude}, {longitude}):\n",
        results.len()
    )];
    for (index, result) in results.iter().enumerate() {
        let title = result["title"].as_str().unwrap_or("Unknown");
        let distance = result["dist"].as_f64().unwrap_or(0.0);
        let page_id = result["pageid"].as_u64().unwrap_or(0);
        lines.push(format!("{}. **{title}** ({distance:.0}m away)", index + 1));
        lines.push(format!("   https://{language}.wikipedia.org/?curid={page_id}"));
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn register_tools(registry: &mut ToolRegistry, config: &Config) -> Result<(), RegistryError> {
    let client = Arc::new(
        WikipediaClient::new(config.tool_timeout)
            .map_err(|err| RegistryError::Provider(err.to_string()))?,
    );

    registry.register(ToolDefinition::new(
        "wikipedia-search",
        "Search Wikipedia for articles matching a query. Returns article titles and snippets.",
        Schema::object(
            [
                ("query", Schema::string("Search query")),
                (
                    "language",
                    Schema::string("Wikipedia language code (e.g. 'no' for Norwegian, 'en' for English)"),
                ),
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
        "wikipedia-summary",
        "Get a summary of a Wikipedia article by its exact title.",
        Schema::object(
            [
                ("title", Schema::string("Article title (exact match)")),
                ("language", Schema::string("Wikipedia language code")),
            ],
            &["title"],
        ),
        config.tool_timeout,
        Arc::new(SummaryTool {
            client: Arc::clone(&client),
        }),
    ))?;

    registry.register(ToolDefinition::new(
        "wikipedia-geosearch",
        "Find Wikipedia articles near geographic coordinates. Useful for landmarks and places.",
        Schema::object(
            [
                ("latitude", Schema::number("Latitude in decimal degrees")),
                ("longitude", Schema::number("Longitude in decimal degrees")),
                ("radius", Schema::integer("Search radius in meters (max 10000)")),
                ("language", Schema::string("Wikipedia language code")),
                ("limit", Schema::integer("Maximum number of results")),
            ],
            &["latitude", "longitude"],
        ),
        config.tool_timeout,
        Arc::new(GeosearchTool { client }),
    ))?;

    Ok(())
}
