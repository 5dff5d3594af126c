use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{FloorDocument, SearchIndex, SearchQuery};
use crate::db::models::FloorId;
use crate::error::{AppError, AppResult};

pub const DEFAULT_INDEX_NAME: &str = "floors";

/// Elasticsearch-compatible index reached over its REST API.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: Client,
    base_url: String,
    index_name: String,
    bulk_budget_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
}

impl ElasticIndex {
    pub fn new(base_url: &str, timeout: Duration, bulk_budget_bytes: usize) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            bulk_budget_bytes,
        })
    }

    pub fn with_index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = name.into();
        self
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index_name, tail)
    }

    async fn post_bulk(&self, body: String) -> AppResult<()> {
        let response: BulkResponse = self
            .client
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.errors {
            tracing::warn!(index = %self.index_name, "bulk request reported item errors");
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn index(&self, doc: &FloorDocument) -> AppResult<()> {
        self.client
            .put(self.url(&format!("_doc/{}", doc.id)))
            .json(doc)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(floor_id = doc.id, "floor indexed");
        Ok(())
    }

    async fn delete(&self, id: FloorId) -> AppResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("_doc/{}", id)))
            .send()
            .await?;
        // already absent counts as deleted
        if response.status() != StatusCode::NOT_FOUND {
            response.error_for_status()?;
        }
        tracing::debug!(floor_id = id, "floor removed from index");
        Ok(())
    }

    async fn bulk_index(&self, docs: &[FloorDocument]) -> AppResult<()> {
        for body in bulk_index_bodies(docs, self.bulk_budget_bytes)? {
            self.post_bulk(body).await?;
        }
        tracing::info!(count = docs.len(), "bulk index finished");
        Ok(())
    }

    async fn bulk_delete(&self, ids: &[FloorId]) -> AppResult<()> {
        for body in bulk_delete_bodies(ids, self.bulk_budget_bytes) {
            self.post_bulk(body).await?;
        }
        tracing::info!(count = ids.len(), "bulk delete finished");
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> AppResult<Vec<FloorId>> {
        let response: SearchResponse = self
            .client
            .post(self.url("_search"))
            .json(&search_body(query))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                hit.id
                    .parse()
                    .map_err(|_| AppError::Internal(format!("non-numeric hit id {}", hit.id)))
            })
            .collect()
    }
}

/// NDJSON bodies for indexing `docs`, each at most `budget` bytes unless a
/// single entry is larger on its own.
pub fn bulk_index_bodies(docs: &[FloorDocument], budget: usize) -> AppResult<Vec<String>> {
    let mut entries = Vec::with_capacity(docs.len());
    for doc in docs {
        let action = json!({ "index": { "_id": doc.id.to_string() } });
        entries.push(format!("{}\n{}\n", action, serde_json::to_string(doc)?));
    }
    Ok(pack(entries, budget))
}

pub fn bulk_delete_bodies(ids: &[FloorId], budget: usize) -> Vec<String> {
    let entries = ids
        .iter()
        .map(|id| format!("{}\n", json!({ "delete": { "_id": id.to_string() } })))
        .collect();
    pack(entries, budget)
}

fn pack(entries: Vec<String>, budget: usize) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut current = String::new();
    for entry in entries {
        if !current.is_empty() && current.len() + entry.len() > budget {
            bodies.push(std::mem::take(&mut current));
        }
        current.push_str(&entry);
    }
    if !current.is_empty() {
        bodies.push(current);
    }
    bodies
}

pub fn search_body(query: &SearchQuery) -> Value {
    let matcher = if query.accurate {
        json!({ "match_phrase": { "content": query.keyword } })
    } else {
        json!({ "match": { "content": query.keyword } })
    };

    let mut bool_query = json!({ "must": { "dis_max": { "queries": [matcher] } } });
    if query.start_time.is_some() || query.end_time.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(start) = &query.start_time {
            range.insert("gte".into(), json!(start));
        }
        if let Some(end) = &query.end_time {
            range.insert("lte".into(), json!(end));
        }
        bool_query["filter"] = json!({ "range": { "updated_at": range } });
    }

    json!({
        "query": { "bool": bool_query },
        "sort": [{ "_score": "desc" }, { "updated_at": "desc" }],
        "from": query.offset,
        "size": query.size,
        "_source": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: FloorId, content: &str) -> FloorDocument {
        FloorDocument {
            id,
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn bulk_body_pairs_action_and_source_lines() {
        let bodies = bulk_index_bodies(&[doc(7, "hello")], 1 << 20).unwrap();
        assert_eq!(bodies.len(), 1);
        let lines: Vec<&str> = bodies[0].lines().collect();
        assert_eq!(lines.len(), 2);

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "7");
        let source: FloorDocument = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source, doc(7, "hello"));
        assert!(bodies[0].ends_with('\n'));
    }

    #[test]
    fn bulk_bodies_respect_byte_budget() {
        let docs: Vec<_> = (1..=10).map(|i| doc(i, &"x".repeat(100))).collect();
        let one_entry = bulk_index_bodies(&docs[..1], usize::MAX).unwrap()[0].len();
        let bodies = bulk_index_bodies(&docs, one_entry * 3).unwrap();

        assert_eq!(bodies.len(), 4);
        for body in &bodies {
            assert!(body.len() <= one_entry * 3);
        }
        let total_lines: usize = bodies.iter().map(|b| b.lines().count()).sum();
        assert_eq!(total_lines, 20);
    }

    #[test]
    fn oversized_entry_gets_its_own_body() {
        let bodies = bulk_index_bodies(&[doc(1, "a"), doc(2, &"y".repeat(500))], 64).unwrap();
        assert_eq!(bodies.len(), 2);
    }

    #[test]
    fn bulk_delete_lines_name_ids() {
        let bodies = bulk_delete_bodies(&[3, 4], 1 << 20);
        assert_eq!(
            bodies,
            vec!["{\"delete\":{\"_id\":\"3\"}}\n{\"delete\":{\"_id\":\"4\"}}\n".to_string()]
        );
    }

    #[test]
    fn empty_bulk_produces_no_requests() {
        assert!(bulk_index_bodies(&[], 1024).unwrap().is_empty());
        assert!(bulk_delete_bodies(&[], 1024).is_empty());
    }

    #[test]
    fn search_body_switches_match_kind() {
        let mut query = SearchQuery::new("tree hole");
        let fuzzy = search_body(&query);
        assert_eq!(
            fuzzy["query"]["bool"]["must"]["dis_max"]["queries"][0]["match"]["content"],
            "tree hole"
        );
        assert!(fuzzy["query"]["bool"].get("filter").is_none());

        query.accurate = true;
        let exact = search_body(&query);
        assert_eq!(
            exact["query"]["bool"]["must"]["dis_max"]["queries"][0]["match_phrase"]["content"],
            "tree hole"
        );
    }

    #[test]
    fn search_body_carries_paging_sort_and_window() {
        let mut query = SearchQuery::new("x");
        query.offset = 20;
        query.size = 5;
        query.start_time = Some("2024-01-01T00:00:00Z".into());
        let body = search_body(&query);

        assert_eq!(body["from"], 20);
        assert_eq!(body["size"], 5);
        assert_eq!(body["sort"][0]["_score"], "desc");
        assert_eq!(body["sort"][1]["updated_at"], "desc");
        let range = &body["query"]["bool"]["filter"]["range"]["updated_at"];
        assert_eq!(range["gte"], "2024-01-01T00:00:00Z");
        assert!(range.get("lte").is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let index =
            ElasticIndex::new("http://localhost:9200/", Duration::from_secs(1), 1024).unwrap();
        assert_eq!(index.url("_search"), "http://localhost:9200/floors/_search");
    }
}
