use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cardbase::config::{DbCredentials, SourceConfig, StoreConfig};
use cardbase::model::Set;
use cardbase::pipeline::{self, FetchRequest, PipelineConfig};
use cardbase::source::search::{Facet, SearchParams};
use cardbase::source::{product_line_by_url_name, CatalogSource, SearchApiSource};
use cardbase::store::{CatalogStore, PostgresStore, StoreError};
use cardbase::util::env::{env_opt, init_env};

/// Products persisted by this tool are always of the card product type.
const PRODUCT_TYPE: &str = "Cards";

#[derive(Debug, Parser)]
#[command(name = "cardbase", about = "Ingest card catalog data into a relational store")]
struct Cli {
    /// List all product lines from the catalog source and exit
    #[arg(short = 'p', long)]
    product_lines: bool,

    /// Product line URL name to process
    #[arg(short = 'n', long)]
    product_line_name: Option<String>,

    /// List the target product line's sets instead of ingesting them
    #[arg(short = 's', long)]
    sets: bool,

    /// Persist sets and products to the store; without it the run is a
    /// read-only dry run
    #[arg(long)]
    write_data: bool,

    /// Directory product images are written to (falls back to IMAGE_DIR)
    #[arg(long)]
    image_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let source = SearchApiSource::new(&SourceConfig::default())?;

    if cli.product_lines {
        let lines = source.fetch_product_lines().await?;
        print_two_column(&lines);
        return Ok(());
    }

    let Some(name) = cli.product_line_name.as_deref() else {
        bail!("no target: pass --product-lines or --product-line-name <name>");
    };

    let product_line = product_line_by_url_name(&source, name)
        .await?
        .with_context(|| format!("product line '{name}' not found"))?;
    let sets = source.fetch_sets_by_product_line(&product_line.url_name).await?;
    info!(product_line = %product_line.name, sets = sets.len(), "fetched set list");

    if cli.sets || !cli.write_data {
        print_sets(&sets);
        if !cli.write_data {
            info!("dry run; pass --write-data to persist");
        }
        return Ok(());
    }

    let creds = DbCredentials::from_env()?;
    let store = PostgresStore::connect(&creds, &StoreConfig::from_env()).await?;

    let product_line = match store.add_product_line(&product_line).await {
        Ok(created) => created,
        Err(StoreError::Conflict { .. }) => {
            warn!(product_line = %product_line.name, "product line already stored; reusing");
            store.get_product_line_by_name(&product_line.name).await?
        }
        Err(err) => return Err(err).context("adding product line"),
    };

    let mut sets = sets;
    for set in &mut sets {
        set.product_line_id = product_line.id;
    }
    let sets = store.add_sets(sets).await.context("adding sets")?;

    let requests: Vec<FetchRequest> = sets
        .into_iter()
        .map(|set| FetchRequest {
            params: SearchParams::new(
                &product_line.url_name,
                &set.url_name,
                PRODUCT_TYPE,
                0,
                set.count,
            ),
            set,
            product_line: product_line.clone(),
        })
        .collect();

    let image_dir = cli
        .image_dir
        .or_else(|| env_opt("IMAGE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("card_images"));
    let config = PipelineConfig::sized_for_host(image_dir);

    pipeline::run(config, Arc::new(source), Arc::new(store), requests).await
}

/// Print product lines in two columns, the way the set lists are browsed.
fn print_two_column(list: &[Facet]) {
    let mid = list.len() / 2;
    for i in 0..mid {
        println!(
            "{:<4} : {:<60} {:<5} {:<4} : {:<60}",
            i,
            list[i].url_name,
            "",
            i + mid,
            list[i + mid].url_name
        );
    }
    if list.len() % 2 != 0 {
        if let Some(last) = list.last() {
            println!("{:<65}{:<60}", "", last.url_name);
        }
    }
}

fn print_sets(sets: &[Set]) {
    for set in sets {
        println!("{:<6} {:<60} {}", set.count, set.name, set.url_name);
    }
}
