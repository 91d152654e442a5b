use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Currency {
    #[default]
    XAF,
    USD,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::XAF => "XAF",
            Currency::USD => "USD",
        }
    }
}

/// Listing lifecycle:
/// `draft -> pending_payment -> pending_approval -> {active | rejected} -> expired`.
///
/// The backend stores listings awaiting moderation as `pending`; that value
/// decodes to [`ListingStatus::PendingApproval`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Draft,
    PendingPayment,
    #[serde(alias = "pending")]
    PendingApproval,
    Active,
    Expired,
    Rejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::PendingPayment => "pending_payment",
            ListingStatus::PendingApproval => "pending_approval",
            ListingStatus::Active => "active",
            ListingStatus::Expired => "expired",
            ListingStatus::Rejected => "rejected",
        }
    }

    /// Status written by a moderation decision.
    pub fn decided(approve: bool) -> Self {
        if approve {
            ListingStatus::Active
        } else {
            ListingStatus::Rejected
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a paid listing stays active, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingDuration {
    H24,
    H48,
    H72,
    H96,
    H120,
}

impl ListingDuration {
    pub fn hours(&self) -> i64 {
        match self {
            ListingDuration::H24 => 24,
            ListingDuration::H48 => 48,
            ListingDuration::H72 => 72,
            ListingDuration::H96 => 96,
            ListingDuration::H120 => 120,
        }
    }
}

impl FromStr for ListingDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "24" => Ok(ListingDuration::H24),
            "48" => Ok(ListingDuration::H48),
            "72" => Ok(ListingDuration::H72),
            "96" => Ok(ListingDuration::H96),
            "120" => Ok(ListingDuration::H120),
            other => Err(format!("unsupported listing duration: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductImage {
    pub id: String,
    pub url: String,
    pub alt: String,
    /// Display rank. Rendering order follows this, not arrival order.
    pub order: i64,
}

/// UI-ready view model of a listing, including the joined images and the
/// seller's contact handle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub permanent_link_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: Currency,
    pub quantity: u32,
    pub images: Vec<ProductImage>,
    pub status: ListingStatus,
    pub seller_id: String,
    /// Empty when the seller has no contact on file, never absent.
    pub seller_whatsapp: String,
    pub created_at: String,
    pub expires_at: String,
    pub view_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available(u32),
    SoldOut,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Available(n) => write!(f, "{} available", n),
            Availability::SoldOut => f.write_str("Sold out"),
        }
    }
}

impl Product {
    pub fn availability(&self) -> Availability {
        if self.quantity == 0 {
            Availability::SoldOut
        } else {
            Availability::Available(self.quantity)
        }
    }

    /// `XAF 1,500` for francs (no minor unit), `$15.00` for dollars.
    pub fn display_price(&self) -> String {
        match self.currency {
            Currency::XAF => format!("XAF {}", group_thousands(self.price.round() as i64)),
            Currency::USD => format!("${:.2}", self.price),
        }
    }

    /// Images sorted by display rank. The stored sequence is left untouched.
    pub fn images_by_rank(&self) -> Vec<ProductImage> {
        let mut images = self.images.clone();
        images.sort_by_key(|img| img.order);
        images
    }

    pub fn cover_image(&self) -> Option<ProductImage> {
        self.images_by_rank().into_iter().next()
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        out.insert(0, '-');
    }
    out
}

pub const NOTIFICATION_TYPE_PRODUCT_STATUS: &str = "product_status";

/// Notification row inserted for the seller after a moderation decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
}

impl NewNotification {
    pub fn product_status(seller_id: &str, approved: bool) -> Self {
        let (title, verb) = if approved {
            ("Product Approved", "approved")
        } else {
            ("Product Rejected", "rejected")
        };
        Self {
            user_id: seller_id.to_string(),
            kind: NOTIFICATION_TYPE_PRODUCT_STATUS.to_string(),
            title: title.to_string(),
            message: format!("Your product listing has been {}.", verb),
        }
    }
}
