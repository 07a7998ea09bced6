//! Request and response shapes for the marketplace search endpoint.
//!
//! The endpoint takes a deeply nested criteria document; most of it is
//! boilerplate the server expects to be present even when empty.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Product;

/// Search parameters as the rest of the crate sees them; flattened into a
/// [`SearchCriteria`] document right before the request goes out.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub product_line: String,
    pub set_name: String,
    pub product_type: String,
    pub from: i64,
    pub size: i64,
}

impl SearchParams {
    pub fn new(product_line: &str, set_name: &str, product_type: &str, from: i64, size: i64) -> Self {
        Self {
            product_line: product_line.to_string(),
            set_name: set_name.to_string(),
            product_type: product_type.to_string(),
            from,
            size,
        }
    }
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    pub algorithm: String,
    pub context: RequestContext,
    pub filters: Filters,
    pub from: i64,
    pub listing_search: ListingSearch,
    pub settings: Settings,
    pub size: i64,
    pub sort: Empty,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub cart: Empty,
    pub shipping_country: String,
    pub user_profile: Empty,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Filters {
    #[serde(rename = "match")]
    pub match_: Empty,
    pub range: Empty,
    pub term: TermFilter,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_line_name: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_name: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type_name: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingSearch {
    pub context: ListingContext,
    pub filters: ListingFilters,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingContext {
    pub cart: Empty,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingFilters {
    pub exclude: ListingExclude,
    pub range: ListingRange,
    pub term: ListingTerm,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingExclude {
    pub channel_exclusion: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingRange {
    pub quantity: QuantityRange,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuantityRange {
    pub gte: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingTerm {
    pub channel_id: i64,
    pub seller_status: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub did_you_mean: Empty,
    pub use_fuzzy_search: bool,
}

impl SearchCriteria {
    /// Build the full criteria document for one search call. Empty parameter
    /// strings leave the matching term filter out entirely.
    pub fn from_params(params: &SearchParams) -> Self {
        let term = TermFilter {
            product_line_name: non_empty(&params.product_line),
            set_name: non_empty(&params.set_name),
            product_type_name: non_empty(&params.product_type),
        };
        Self {
            algorithm: "sales_dismax".to_string(),
            context: RequestContext {
                shipping_country: "US".to_string(),
                ..Default::default()
            },
            filters: Filters {
                term,
                ..Default::default()
            },
            from: params.from,
            listing_search: ListingSearch {
                context: ListingContext::default(),
                filters: ListingFilters {
                    exclude: ListingExclude { channel_exclusion: 0 },
                    range: ListingRange {
                        quantity: QuantityRange { gte: 1 },
                    },
                    term: ListingTerm {
                        channel_id: 0,
                        seller_status: "Live".to_string(),
                    },
                },
            },
            settings: Settings {
                did_you_mean: Empty {},
                use_fuzzy_search: true,
            },
            size: params.size,
            sort: Empty {},
        }
    }
}

fn non_empty(value: &str) -> Option<Vec<String>> {
    if value.is_empty() {
        None
    } else {
        Some(vec![value.to_string()])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub results: Vec<ResultPage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultPage {
    #[serde(default)]
    pub aggregations: Aggregations,
    #[serde(default)]
    pub results: Vec<Product>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregations {
    #[serde(default)]
    pub product_line_name: Vec<Facet>,
    #[serde(default)]
    pub set_name: Vec<Facet>,
    #[serde(default)]
    pub rarity_name: Vec<Facet>,
}

/// One aggregation bucket: a display name, its URL-safe form and how many
/// items fall under it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Facet {
    #[serde(rename = "value")]
    pub name: String,
    #[serde(rename = "urlValue")]
    pub url_name: String,
    #[serde(default)]
    pub count: f64,
}
