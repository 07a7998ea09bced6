//! Product screening and conflict-repair helpers.
//!
//! Screening enforces the job invariant: every product carries a non-empty
//! business key (product number), unique within the job. Repair undoes a
//! unique-constraint conflict by removing exactly the offending product.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::Product;

/// Drop products without a product number, then deduplicate by product
/// number; the first occurrence wins. Idempotent.
pub fn screen_products(products: Vec<Product>) -> Vec<Product> {
    let mut seen: HashSet<String> = HashSet::with_capacity(products.len());
    products
        .into_iter()
        .filter(|p| !p.product_number.is_empty() && seen.insert(p.product_number.clone()))
        .collect()
}

/// Remove the single product carrying `number`; screened jobs hold at most
/// one such product. Returns whether anything was removed, so callers can
/// tell a repaired job from one whose extracted key matches nothing.
pub fn remove_product_by_number(products: &mut Vec<Product>, number: &str) -> bool {
    match products.iter().position(|p| p.product_number == number) {
        Some(pos) => {
            products.remove(pos);
            true
        }
        None => false,
    }
}

fn detail_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Postgres unique-violation details read
    //   Key (col, col, col)=(val, val, val) already exists.
    RE.get_or_init(|| Regex::new(r"\(([^)]*)\)=\(([^)]*)\)").expect("detail regex"))
}

/// Extract the conflicting product number from a unique-violation detail
/// string. The column tuple names the position of `product_number`; the
/// value at the same position in the values tuple is the business key.
/// Returns `None` when the detail doesn't follow the known format or the
/// index doesn't name a product number.
pub fn duplicate_key_from_detail(detail: &str) -> Option<String> {
    let caps = detail_regex().captures(detail)?;
    let columns: Vec<&str> = caps.get(1)?.as_str().split(',').map(str::trim).collect();
    let values: Vec<&str> = caps.get(2)?.as_str().split(',').map(str::trim).collect();
    let idx = columns.iter().position(|c| *c == "product_number")?;
    let value = *values.get(idx)?;
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(number: &str) -> Product {
        Product {
            product_number: number.to_string(),
            name: format!("card {number}"),
            ..Default::default()
        }
    }

    #[test]
    fn screening_drops_missing_and_duplicate_numbers() {
        // Ten products: two share "007", one has no number at all.
        let mut products: Vec<Product> = (1..=8).map(|i| product(&format!("{i:03}"))).collect();
        products.push(product("007"));
        products.push(product(""));
        assert_eq!(products.len(), 10);

        let screened = screen_products(products);
        assert_eq!(screened.len(), 8);
        let numbers: Vec<&str> = screened.iter().map(|p| p.product_number.as_str()).collect();
        assert_eq!(numbers.iter().filter(|n| **n == "007").count(), 1);
    }

    #[test]
    fn screening_keeps_first_occurrence() {
        let mut first = product("007");
        first.name = "original".to_string();
        let mut second = product("007");
        second.name = "reprint".to_string();
        let screened = screen_products(vec![first, second]);
        assert_eq!(screened.len(), 1);
        assert_eq!(screened[0].name, "original");
    }

    #[test]
    fn screening_is_idempotent() {
        let products = vec![product("001"), product("002"), product("001"), product("")];
        let once = screen_products(products);
        let twice = screen_products(once.clone());
        assert_eq!(once.len(), twice.len());
        let a: Vec<&str> = once.iter().map(|p| p.product_number.as_str()).collect();
        let b: Vec<&str> = twice.iter().map(|p| p.product_number.as_str()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn remove_by_number_removes_exactly_one() {
        let mut products = vec![product("001"), product("002"), product("003")];
        assert!(remove_product_by_number(&mut products, "002"));
        assert_eq!(products.len(), 2);
        assert!(products.iter().all(|p| p.product_number != "002"));

        assert!(!remove_product_by_number(&mut products, "missing"));
        assert_eq!(products.len(), 2);
    }

    #[test]
    fn duplicate_key_extracted_from_values_tuple() {
        let detail = "Key (product_number, rarity_name, set_id)=(007, Common, 3) already exists.";
        assert_eq!(duplicate_key_from_detail(detail), Some("007".to_string()));
    }

    #[test]
    fn duplicate_key_follows_column_position() {
        let detail = "Key (set_id, product_number)=(3, LOB-124) already exists.";
        assert_eq!(duplicate_key_from_detail(detail), Some("LOB-124".to_string()));
    }

    #[test]
    fn duplicate_key_absent_when_format_unknown() {
        assert_eq!(duplicate_key_from_detail("deadlock detected"), None);
        assert_eq!(
            duplicate_key_from_detail("Key (set_name)=(Base Set) already exists."),
            None
        );
        assert_eq!(duplicate_key_from_detail(""), None);
    }
}
