//! 商品目录：数据模型、向量索引、检索排序与离线索引

pub mod chroma;
pub mod index;
pub mod indexer;
pub mod product;
pub mod ranker;
pub mod search;

pub use chroma::ChromaIndex;
pub use index::{build_filter, IndexError, InMemoryIndex, MetadataFilter, QueryResult, VectorIndex};
pub use indexer::{load_catalog, normalize_photo_url, CatalogIndexer, HttpPhotoFetcher, IndexReport};
pub use product::{DocumentKind, DocumentMetadata, EmbeddingDocument, ProductRecord};
pub use ranker::{rank, RawMatch, SearchHit};
pub use search::{CatalogSearchService, SearchError};
