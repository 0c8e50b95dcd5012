//! Chroma REST 客户端（v1 API，cosine 空间）

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::catalog::index::{IndexError, MetadataFilter, QueryResult, VectorIndex};
use crate::catalog::product::{DocumentMetadata, EmbeddingDocument};

/// 绑定到单个 collection 的 Chroma 客户端
pub struct ChromaIndex {
    http: Client,
    base_url: String,
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    include: [&'static str; 2],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<DocumentMetadata>>>>,
}

impl ChromaIndex {
    /// 连接并 get-or-create collection
    pub async fn connect(
        base_url: &str,
        collection: &str,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Request(e.to_string()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = http
            .post(format!("{}/api/v1/collections", base_url))
            .json(&json!({
                "name": collection,
                "metadata": {"hnsw:space": "cosine"},
                "get_or_create": true,
            }))
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        let info: CollectionInfo = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))?;

        tracing::info!(collection, collection_id = %info.id, "chroma collection ready");
        Ok(Self {
            http,
            base_url,
            collection_id: info.id,
        })
    }

    fn endpoint(&self, op: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url, self.collection_id, op
        )
    }
}

async fn check(resp: Response) -> Result<Response, IndexError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(IndexError::Status {
        status: status.as_u16(),
        body,
    })
}

impl QueryResponse {
    /// 单条查询只取第一行；缺失的元数据视为响应损坏
    fn into_result(self) -> Result<QueryResult, IndexError> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let distances = self
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = self
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();
        if ids.len() != distances.len() || ids.len() != metadatas.len() {
            return Err(IndexError::Malformed(format!(
                "{} ids, {} distances, {} metadatas",
                ids.len(),
                distances.len(),
                metadatas.len()
            )));
        }
        let metadatas = metadatas
            .into_iter()
            .zip(&ids)
            .map(|(m, id)| m.ok_or_else(|| IndexError::Malformed(format!("no metadata for {}", id))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult {
            ids,
            distances,
            metadatas,
        })
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn query(
        &self,
        vector: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult, IndexError> {
        let body = QueryBody {
            query_embeddings: [vector],
            n_results,
            filter: filter.map(MetadataFilter::to_json),
            include: ["metadatas", "distances"],
        };
        let resp = self
            .http
            .post(self.endpoint("query"))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        let parsed: QueryResponse = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))?;
        parsed.into_result()
    }

    async fn upsert(&self, document: &EmbeddingDocument) -> Result<(), IndexError> {
        let resp = self
            .http
            .post(self.endpoint("upsert"))
            .json(&json!({
                "ids": [document.key()],
                "embeddings": [document.vector],
                "metadatas": [document.metadata],
            }))
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        check(resp).await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let resp = self
            .http
            .get(self.endpoint("count"))
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        check(resp)
            .await?
            .json::<usize>()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_filter;

    #[test]
    fn test_query_body_omits_where_without_filter() {
        let v = [0.5f32, 0.5];
        let body = QueryBody {
            query_embeddings: [&v[..]],
            n_results: 6,
            filter: None,
            include: ["metadatas", "distances"],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("where").is_none());
        assert_eq!(json["n_results"], 6);

        let f = build_filter(None, Some(1), Some(2)).map(|f| f.to_json());
        let body = QueryBody { filter: f, ..body };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["where"]["$and"][1]["price"]["$lte"], 2);
    }

    #[test]
    fn test_parse_query_response() {
        let raw = json!({
            "ids": [["text_1", "photo_1"]],
            "distances": [[0.1, 0.2]],
            "metadatas": [[
                {"product_id": "1", "type": "text", "name": "A", "price": 10},
                {"product_id": "1", "type": "photo", "name": "A", "price": 10, "photo_url": "u"}
            ]]
        });
        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        let r = parsed.into_result().unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.metadatas[1].photo_url.as_deref(), Some("u"));
    }

    #[test]
    fn test_parse_mismatched_response() {
        let raw = json!({"ids": [["a"]], "distances": [[]], "metadatas": [[]]});
        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(parsed.into_result(), Err(IndexError::Malformed(_))));
    }
}
