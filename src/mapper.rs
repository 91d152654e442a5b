//! Projection of raw backend rows into [`Product`] view models.
//!
//! Every column of a raw row is optional: the same type decodes a full joined
//! select and a change-feed payload that only carries the updated columns.
//! Mapping is pure. It never performs I/O and never fails on a missing field.

use serde::Deserialize;
use serde_json::Value;

use crate::lenient;
use crate::model::{Currency, ListingStatus, Product, ProductImage};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawProductRow {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub permanent_link_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub seller_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub expires_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub view_count: Option<i64>,
    #[serde(default, alias = "images", deserialize_with = "lenient::list")]
    pub product_images: Option<Vec<RawImageRow>>,
    #[serde(default, alias = "seller", deserialize_with = "lenient::object")]
    pub users: Option<RawSellerRow>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawImageRow {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub alt: Option<String>,
    #[serde(default, alias = "order", deserialize_with = "lenient::int")]
    pub order_number: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawSellerRow {
    #[serde(default, deserialize_with = "lenient::text")]
    pub whatsapp_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub full_name: Option<String>,
}

impl RawProductRow {
    /// Decode a row. Columns of an unexpected type decode as absent; only a
    /// value that is not an object at all is an error.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if !value.is_object() {
            return Err(serde::de::Error::custom("product row is not an object"));
        }
        serde_json::from_value(value)
    }

    /// Overlay the columns present in this (possibly partial) row onto a
    /// previously known product. Absent columns keep their known value.
    pub fn overlay(&self, base: &Product) -> Product {
        let mut out = base.clone();
        if let Some(id) = &self.id {
            out.id = id.clone();
        }
        if self.permanent_link_id.is_some() {
            out.permanent_link_id = self.permanent_link_id;
        }
        if let Some(title) = &self.title {
            out.title = title.clone();
        }
        if let Some(description) = &self.description {
            out.description = description.clone();
        }
        if let Some(price) = self.price {
            out.price = clamp_price(price);
        }
        if let Some(currency) = self.currency.as_deref().and_then(parse_currency) {
            out.currency = currency;
        }
        if let Some(quantity) = self.quantity {
            out.quantity = clamp_quantity(quantity);
        }
        if let Some(status) = self.status.as_deref().and_then(parse_status) {
            out.status = status;
        }
        if let Some(seller_id) = &self.seller_id {
            out.seller_id = seller_id.clone();
        }
        if let Some(created_at) = &self.created_at {
            out.created_at = created_at.clone();
        }
        if let Some(expires_at) = &self.expires_at {
            out.expires_at = expires_at.clone();
        }
        if let Some(view_count) = self.view_count {
            out.view_count = view_count;
        }
        if let Some(images) = &self.product_images {
            out.images = map_images(images);
        }
        if let Some(seller) = &self.users {
            out.seller_whatsapp = seller.whatsapp_number.clone().unwrap_or_default();
        }
        out
    }
}

/// Map a raw row to a complete view model, using blank/zero defaults for
/// anything the row does not carry.
pub fn map_product(row: &RawProductRow) -> Product {
    row.overlay(&Product::default())
}

pub fn map_images(rows: &[RawImageRow]) -> Vec<ProductImage> {
    rows.iter()
        .map(|img| ProductImage {
            id: img.id.clone().unwrap_or_default(),
            url: img.url.clone().unwrap_or_default(),
            alt: img.alt.clone().unwrap_or_default(),
            order: img.order_number.unwrap_or_default(),
        })
        .collect()
}

/// Joined sub-resources that change-feed payloads never carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinedParts {
    pub images: Vec<ProductImage>,
    pub seller_whatsapp: String,
}

impl JoinedParts {
    pub fn from_row(row: &RawProductRow) -> Self {
        Self {
            images: row
                .product_images
                .as_deref()
                .map(map_images)
                .unwrap_or_default(),
            seller_whatsapp: row
                .users
                .as_ref()
                .and_then(|s| s.whatsapp_number.clone())
                .unwrap_or_default(),
        }
    }

    pub fn apply_to(self, product: &mut Product) {
        product.images = self.images;
        product.seller_whatsapp = self.seller_whatsapp;
    }
}

fn parse_status(raw: &str) -> Option<ListingStatus> {
    serde_json::from_value(Value::String(raw.to_string())).ok()
}

fn parse_currency(raw: &str) -> Option<Currency> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "XAF" => Some(Currency::XAF),
        "USD" => Some(Currency::USD),
        _ => None,
    }
}

fn clamp_price(price: f64) -> f64 {
    if price.is_finite() && price > 0.0 {
        price
    } else {
        0.0
    }
}

fn clamp_quantity(quantity: i64) -> u32 {
    quantity.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawProductRow {
        RawProductRow::from_value(value).unwrap()
    }

    #[test]
    fn missing_joins_map_to_empty_defaults() {
        let p = map_product(&row(json!({
            "id": "p1",
            "title": "Bike",
            "price": 1500,
            "currency": "XAF",
            "quantity": 2,
            "status": "active",
            "seller_id": "s1"
        })));
        assert_eq!(p.id, "p1");
        assert!(p.images.is_empty());
        assert_eq!(p.seller_whatsapp, "");
        assert_eq!(p.status, ListingStatus::Active);
    }

    #[test]
    fn null_joins_map_to_empty_defaults() {
        let p = map_product(&row(json!({
            "id": "p1",
            "product_images": null,
            "users": null
        })));
        assert!(p.images.is_empty());
        assert_eq!(p.seller_whatsapp, "");

        let p = map_product(&row(json!({
            "id": "p1",
            "users": { "whatsapp_number": null }
        })));
        assert_eq!(p.seller_whatsapp, "");
    }

    #[test]
    fn image_ranks_are_copied_not_sorted() {
        let p = map_product(&row(json!({
            "id": "p1",
            "product_images": [
                { "id": "i3", "url": "u3", "alt": null, "order_number": 3 },
                { "id": "i1", "url": "u1", "alt": "front", "order_number": 1 },
                { "id": "i2", "url": "u2", "order_number": 2 }
            ],
            "users": { "whatsapp_number": "+237600000000" }
        })));
        let ranks: Vec<i64> = p.images.iter().map(|i| i.order).collect();
        assert_eq!(ranks, vec![3, 1, 2]);
        assert_eq!(p.images[0].alt, "");
        assert_eq!(p.images[1].alt, "front");
        assert_eq!(p.seller_whatsapp, "+237600000000");
    }

    #[test]
    fn zero_quantity_boundary() {
        let p = map_product(&row(json!({ "price": 1500, "currency": "XAF", "quantity": 0 })));
        assert_eq!(p.quantity, 0);
        assert_eq!(p.price, 1500.0);
        assert_eq!(p.availability().to_string(), "Sold out");
    }

    #[test]
    fn partial_payload_yields_blank_defaults() {
        let p = map_product(&row(json!({ "status": "active" })));
        assert_eq!(p.status, ListingStatus::Active);
        assert_eq!(p.title, "");
        assert_eq!(p.price, 0.0);
        assert_eq!(p.currency, Currency::XAF);
    }

    #[test]
    fn overlay_keeps_absent_fields() {
        let known = map_product(&row(json!({
            "id": "x",
            "title": "Phone",
            "price": 250,
            "currency": "USD",
            "status": "pending_approval",
            "product_images": [{ "id": "i1", "url": "u1", "order_number": 1 }]
        })));
        let merged = row(json!({ "status": "active" })).overlay(&known);
        assert_eq!(merged.status, ListingStatus::Active);
        assert_eq!(merged.title, "Phone");
        assert_eq!(merged.price, 250.0);
        assert_eq!(merged.currency, Currency::USD);
        assert_eq!(merged.images.len(), 1);
    }

    #[test]
    fn unknown_enum_values_fall_back() {
        let p = map_product(&row(json!({ "status": "archived", "currency": "EUR", "quantity": -4 })));
        assert_eq!(p.status, ListingStatus::Draft);
        assert_eq!(p.currency, Currency::XAF);
        assert_eq!(p.quantity, 0);
    }

    #[test]
    fn mistyped_columns_do_not_fail_the_row() {
        let p = map_product(&row(json!({
            "id": 17,
            "title": "Desk",
            "price": "2500",
            "quantity": 2.0,
            "view_count": "n/a",
            "status": "active",
            "product_images": [{ "id": "i1", "url": "u1", "order_number": "1" }, "garbage"],
            "users": "not an object"
        })));
        assert_eq!(p.id, "17");
        assert_eq!(p.title, "Desk");
        assert_eq!(p.price, 2500.0);
        assert_eq!(p.quantity, 2);
        assert_eq!(p.view_count, 0);
        assert_eq!(p.status, ListingStatus::Active);
        assert_eq!(p.images.len(), 1);
        assert_eq!(p.images[0].order, 1);
        assert_eq!(p.seller_whatsapp, "");
    }

    #[test]
    fn mistyped_column_in_partial_keeps_known_value() {
        let known = map_product(&row(json!({ "id": "x", "title": "Phone", "view_count": 7 })));
        let merged = row(json!({ "status": "active", "view_count": 3.0, "title": [] })).overlay(&known);
        assert_eq!(merged.status, ListingStatus::Active);
        assert_eq!(merged.view_count, 3);
        assert_eq!(merged.title, "Phone");
    }

    #[test]
    fn non_object_row_is_rejected() {
        assert!(RawProductRow::from_value(json!([1, 2])).is_err());
        assert!(RawProductRow::from_value(json!("row")).is_err());
    }

    #[test]
    fn provider_style_aliases_decode() {
        let r = row(json!({
            "id": "p1",
            "images": [{ "id": "i1", "url": "u", "order": 4 }],
            "seller": { "whatsapp_number": "123" }
        }));
        let parts = JoinedParts::from_row(&r);
        assert_eq!(parts.images[0].order, 4);
        assert_eq!(parts.seller_whatsapp, "123");
    }
}
