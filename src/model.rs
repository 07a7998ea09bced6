//! Catalog entities shared by the source client, the store adapter and the
//! pipeline. Field names follow the store schema; serde renames map the
//! search API's camelCase payloads onto the same types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductLine {
    pub id: Option<i64>,
    pub name: String,
    pub url_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Set {
    pub id: Option<i64>,
    pub name: String,
    pub url_name: String,
    /// Item count as reported by the source; rewritten to the post-screening
    /// length before the set's products are persisted.
    pub count: i64,
    pub release_date: String,
    pub product_line_id: Option<i64>,
}

/// One product as it moves through the pipeline.
///
/// `id` carries the source-side identifier on products fetched from the
/// catalog source; rows read back from the store carry the store-assigned
/// identifier instead. `product_number` is the business key: unique within a
/// set+rarity, and the value the conflict-repair protocol keys on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
#[serde(default, rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "productId")]
    pub id: i64,
    #[serde(rename = "productName")]
    pub name: String,
    #[serde(rename = "productUrlName")]
    pub url_name: String,
    pub product_line_name: String,
    pub product_line_url_name: String,
    pub set_name: String,
    pub set_url_name: String,
    #[serde(rename = "rarityName")]
    pub rarity: String,
    pub custom_attributes: serde_json::Value,
    #[serde(skip)]
    pub product_number: String,
    #[serde(skip)]
    pub print_edition: String,
    #[serde(skip)]
    pub release_date: String,
    #[serde(skip)]
    pub product_line_id: Option<i64>,
    #[serde(skip)]
    pub set_id: Option<i64>,
}
