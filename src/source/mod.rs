//! Catalog source: the external search API that supplies product lines,
//! sets, paginated product listings and per-product images.

pub mod search;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::SourceConfig;
use crate::model::{Product, ProductLine, Set};
use search::{Facet, SearchCriteria, SearchParams, SearchResults};

/// The search API caps the number of products returned per response;
/// larger requests are satisfied page by page.
pub const MAX_RESULT_SIZE: i64 = 50;

/// Fixed variant suffix under which product images are published.
pub const IMAGE_FORMAT_SUFFIX: &str = "400x400.jpg";

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// All known product lines, as aggregation buckets.
    async fn fetch_product_lines(&self) -> Result<Vec<Facet>>;

    /// All sets belonging to one product line (by URL name).
    async fn fetch_sets_by_product_line(&self, product_line: &str) -> Result<Vec<Set>>;

    /// All products matching `params`, paginating transparently until
    /// `params.size` items have been requested.
    async fn fetch_products_in_parts(&self, params: &SearchParams) -> Result<Vec<Product>>;

    /// Raw image bytes for one product, by its source-side identifier.
    async fn fetch_product_image(&self, product_id: i64) -> Result<Vec<u8>>;
}

/// Find one product line by URL name among everything the source offers.
pub async fn product_line_by_url_name(
    source: &dyn CatalogSource,
    url_name: &str,
) -> Result<Option<ProductLine>> {
    let lines = source.fetch_product_lines().await?;
    Ok(lines.into_iter().find(|f| f.url_name == url_name).map(|f| ProductLine {
        id: None,
        name: f.name,
        url_name: f.url_name,
    }))
}

/// Production [`CatalogSource`] over the marketplace search API.
#[derive(Debug, Clone)]
pub struct SearchApiSource {
    http: Client,
    search_url: String,
    image_base_url: String,
}

impl SearchApiSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        // The endpoint rejects requests that don't look like they came from
        // the storefront, so mirror a browser's headers.
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.tcgplayer.com"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.tcgplayer.com/"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64; rv:147.0) Gecko/20100101 Firefox/147.0",
            ),
        );
        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context("building catalog source HTTP client")?;
        Ok(Self {
            http,
            search_url: config.search_url.clone(),
            image_base_url: config.image_base_url.clone(),
        })
    }

    /// One raw search call; callers pick out the page or the aggregations.
    async fn search(&self, params: &SearchParams) -> Result<SearchResults> {
        let criteria = SearchCriteria::from_params(params);
        let results: SearchResults = self
            .http
            .post(&self.search_url)
            .json(&criteria)
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search request rejected")?
            .json()
            .await
            .context("decoding search response")?;
        Ok(results)
    }
}

#[async_trait]
impl CatalogSource for SearchApiSource {
    async fn fetch_product_lines(&self) -> Result<Vec<Facet>> {
        let params = SearchParams::default();
        let results = self.search(&params).await?;
        Ok(results
            .results
            .into_iter()
            .next()
            .map(|page| page.aggregations.product_line_name)
            .unwrap_or_default())
    }

    async fn fetch_sets_by_product_line(&self, product_line: &str) -> Result<Vec<Set>> {
        let params = SearchParams::new(product_line, "", "", 0, 0);
        let results = self.search(&params).await?;
        let facets = results
            .results
            .into_iter()
            .next()
            .map(|page| page.aggregations.set_name)
            .unwrap_or_default();
        Ok(facets.into_iter().map(facet_to_set).collect())
    }

    async fn fetch_products_in_parts(&self, params: &SearchParams) -> Result<Vec<Product>> {
        let mut all = Vec::with_capacity(params.size.max(0) as usize);
        for (from, size) in page_windows(params.size, MAX_RESULT_SIZE) {
            let page_params = SearchParams {
                from,
                size,
                ..params.clone()
            };
            let results = self.search(&page_params).await?;
            let mut page = results
                .results
                .into_iter()
                .next()
                .map(|page| page.results)
                .unwrap_or_default();
            debug!(set = %params.set_name, from, fetched = page.len(), "fetched product page");
            all.append(&mut page);
        }
        extract_custom_attributes(&mut all);
        Ok(all)
    }

    async fn fetch_product_image(&self, product_id: i64) -> Result<Vec<u8>> {
        let url = format!("{}{}_in_{}", self.image_base_url, product_id, IMAGE_FORMAT_SUFFIX);
        let bytes = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("image request failed for product {product_id}"))?
            .error_for_status()
            .with_context(|| format!("image request rejected for product {product_id}"))?
            .bytes()
            .await
            .context("reading image body")?;
        Ok(bytes.to_vec())
    }
}

fn facet_to_set(facet: Facet) -> Set {
    Set {
        id: None,
        name: facet.name,
        url_name: facet.url_name,
        count: facet.count as i64,
        release_date: String::new(),
        product_line_id: None,
    }
}

/// The `(from, size)` windows needed to cover `total` items in pages of at
/// most `cap`.
fn page_windows(total: i64, cap: i64) -> Vec<(i64, i64)> {
    let mut windows = Vec::new();
    let mut from = 0;
    while from < total {
        windows.push((from, cap.min(total - from)));
        from += cap;
    }
    windows
}

/// Fields the search API buries inside the opaque `customAttributes` payload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomAttrs {
    #[serde(default)]
    number: String,
    #[serde(default)]
    release_date: String,
}

/// Populate `product_number` and `release_date` from each product's raw
/// custom-attribute payload. Products with unparseable payloads keep empty
/// fields and fall to the screening step.
fn extract_custom_attributes(products: &mut [Product]) {
    for product in products.iter_mut() {
        let attrs: CustomAttrs =
            serde_json::from_value(product.custom_attributes.clone()).unwrap_or_default();
        product.product_number = attrs.number;
        product.release_date = attrs.release_date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_windows_cover_total_without_overshoot() {
        assert_eq!(page_windows(120, 50), vec![(0, 50), (50, 50), (100, 20)]);
        assert_eq!(page_windows(50, 50), vec![(0, 50)]);
        assert_eq!(page_windows(0, 50), Vec::<(i64, i64)>::new());
        assert_eq!(page_windows(3, 50), vec![(0, 3)]);
    }

    #[test]
    fn custom_attributes_populate_number_and_release_date() {
        let mut products = vec![Product {
            custom_attributes: json!({"number": "MRD-001", "releaseDate": "2002-06-26"}),
            ..Default::default()
        }];
        extract_custom_attributes(&mut products);
        assert_eq!(products[0].product_number, "MRD-001");
        assert_eq!(products[0].release_date, "2002-06-26");
    }

    #[test]
    fn unparseable_custom_attributes_leave_fields_empty() {
        let mut products = vec![Product {
            custom_attributes: json!("not an object"),
            ..Default::default()
        }];
        extract_custom_attributes(&mut products);
        assert!(products[0].product_number.is_empty());
    }

    #[test]
    fn product_deserializes_from_search_payload() {
        let product: Product = serde_json::from_value(json!({
            "productId": 42,
            "productName": "Dark Magician",
            "productUrlName": "dark-magician",
            "productLineName": "YuGiOh",
            "productLineUrlName": "yugioh",
            "setName": "Metal Raiders",
            "setUrlName": "metal-raiders",
            "rarityName": "Ultra Rare",
            "customAttributes": {"number": "MRD-001"}
        }))
        .unwrap();
        assert_eq!(product.id, 42);
        assert_eq!(product.rarity, "Ultra Rare");
        assert_eq!(product.set_name, "Metal Raiders");
        assert!(product.product_number.is_empty());
    }
}
