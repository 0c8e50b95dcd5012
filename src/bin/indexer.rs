//! Seller 目录索引
//!
//! 读取商品目录 JSON，为每件在售商品写入文本与图片两条向量文档。
//!
//! 用法: seller-indexer [目录文件] [--config <配置文件>]
//! 环境变量: EMBEDDING_API_KEY 或 OPENAI_API_KEY

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use seller::agent::{create_encoders, create_index};
use seller::catalog::{load_catalog, CatalogIndexer, HttpPhotoFetcher, VectorIndex};
use seller::config::{load_config, IndexBackend};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct Args {
    catalog: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args {
        catalog: None,
        config: None,
    };
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config requires a path")?;
            parsed.config = Some(PathBuf::from(path));
        } else {
            parsed.catalog = Some(PathBuf::from(arg));
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let cfg = load_config(args.config).context("Failed to load config")?;
    if cfg.index.backend == IndexBackend::Memory {
        tracing::warn!("index backend is 'memory'; documents will be lost when the indexer exits");
    }

    let catalog_path = args.catalog.unwrap_or_else(|| cfg.catalog.path.clone());
    let products = load_catalog(&catalog_path)
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;
    tracing::info!(products = products.len(), path = %catalog_path.display(), "catalog loaded");

    let index = create_index(&cfg).await.context("Failed to open vector index")?;
    let (text_encoder, image_encoder) = create_encoders(&cfg);
    let photos = Arc::new(HttpPhotoFetcher::new(Duration::from_secs(cfg.index.timeout_secs)));

    let indexer = CatalogIndexer::new(index.clone(), text_encoder, image_encoder, photos)
        .with_photo_base_url(cfg.catalog.photo_base_url.clone())
        .with_language(&cfg.catalog.language)
        .with_concurrency(cfg.catalog.concurrency);
    let report = indexer.index_all(&products).await;

    println!(
        "indexed {} products ({} documents), skipped {} deleted, {} failures",
        report.products_indexed,
        report.documents_written,
        report.skipped_deleted,
        report.failures.len()
    );
    for (id, reason) in &report.failures {
        println!("  {}: {}", id, reason);
    }
    if let Ok(total) = index.count().await {
        println!("collection now holds {} documents", total);
    }
    Ok(())
}
