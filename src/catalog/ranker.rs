//! 检索结果去重与排序

use std::collections::HashMap;

use crate::catalog::index::QueryResult;
use crate::catalog::product::DocumentMetadata;

/// 一条原始匹配
#[derive(Debug, Clone)]
pub struct RawMatch {
    pub product_id: String,
    pub distance: f32,
    pub metadata: DocumentMetadata,
}

/// 去重后的命中
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub product_id: String,
    /// 1 - distance
    pub score: f32,
    pub metadata: DocumentMetadata,
}

impl QueryResult {
    /// 展开为逐条匹配，商品 id 取自元数据
    pub fn into_matches(self) -> Vec<RawMatch> {
        self.distances
            .into_iter()
            .zip(self.metadatas)
            .map(|(distance, metadata)| RawMatch {
                product_id: metadata.product_id.clone(),
                distance,
                metadata,
            })
            .collect()
    }
}

/// 按商品去重并取前 k 个
///
/// 每个商品保留最高相似度，只有严格更高才替换；
/// 排序稳定，同分时保持首次出现的顺序。不足 k 个时原样返回。
pub fn rank(raw_matches: Vec<RawMatch>, k: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();

    for m in raw_matches {
        let score = 1.0 - m.distance;
        match slot.get(&m.product_id) {
            Some(&i) => {
                if score > hits[i].score {
                    hits[i].score = score;
                    hits[i].metadata = m.metadata;
                }
            }
            None => {
                slot.insert(m.product_id.clone(), hits.len());
                hits.push(SearchHit {
                    product_id: m.product_id,
                    score,
                    metadata: m.metadata,
                });
            }
        }
    }

    // sort_by 是稳定排序
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}
