use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "untitled";
pub const DEFAULT_PRICE: &str = "unspecified";

/// A posting pulled out of one search results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub price: String,
    pub url: Option<String>,
    pub keyword: String, // search term that matched, no cross-keyword merge
    pub region: Option<String>,
    pub image_url: Option<String>,
}

impl Listing {
    /// Synthetic listing announcing that monitoring has started.
    pub fn startup_notice() -> Self {
        Self {
            id: String::new(),
            title: "Listing monitor started".to_string(),
            price: String::new(),
            url: None,
            keyword: "monitor".to_string(),
            region: None,
            image_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub price: String,
    pub url: Option<String>,
    pub keyword: String,
    pub region: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
    pub notified: bool,
    pub delivery_attempts: u32,
}

impl ListingRecord {
    pub fn to_listing(&self) -> Listing {
        Listing {
            id: self.id.clone(),
            title: self.title.clone(),
            price: self.price.clone(),
            url: self.url.clone(),
            keyword: self.keyword.clone(),
            region: self.region.clone(),
            image_url: self.image_url.clone(),
        }
    }
}
