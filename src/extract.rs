use anyhow::{anyhow, Context, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::models::{Listing, DEFAULT_PRICE, DEFAULT_TITLE};

/// Relative-time tokens meaning "within the last hour" or "just now".
pub const DEFAULT_RECENCY_MARKERS: &[&str] = &[
    "minute",
    "heure",
    "hour",
    "ساعة",
    "دقيقة",
    "الآن",
    "just now",
    "instant",
];

struct Selectors {
    node: Selector,
    date: Selector,
    title: Selector,
    price: Selector,
    link: Selector,
    image: Selector,
    region: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            node: parse_selector("li[data-id]")?,
            date: parse_selector("span.annonce_date")?,
            title: parse_selector("h2")?,
            price: parse_selector("span.annonce_prix")?,
            link: parse_selector("a[href]")?,
            image: parse_selector("img")?,
            region: parse_selector("span.annonce_region")?,
        })
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{}': {}", css, e))
}

/// Turns one search results page into listings, keeping only recent ones.
pub struct Extractor {
    base: Url,
    markers: Vec<String>,
    selectors: Selectors,
}

impl Extractor {
    pub fn new(base_url: &str, markers: &[String]) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid base URL: {}", base_url))?;
        Ok(Self {
            base,
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
            selectors: Selectors::new()?,
        })
    }

    pub fn extract(&self, document: &str, keyword: &str) -> Vec<Listing> {
        let html = Html::parse_document(document);
        let mut listings = Vec::new();

        for node in html.select(&self.selectors.node) {
            match self.extract_node(node, keyword) {
                Some(listing) => listings.push(listing),
                None => debug!(
                    keyword = %keyword,
                    id = node.value().attr("data-id").unwrap_or_default(),
                    "skipped listing node"
                ),
            }
        }

        listings
    }

    fn extract_node(&self, node: ElementRef, keyword: &str) -> Option<Listing> {
        let id = node.value().attr("data-id")?.trim();
        if id.is_empty() {
            return None;
        }

        let posted = text_of(node.select(&self.selectors.date).next()?).to_lowercase();
        if !self.is_recent(&posted) {
            return None;
        }

        let title = node
            .select(&self.selectors.title)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let price = node
            .select(&self.selectors.price)
            .next()
            .map(text_of)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PRICE.to_string());

        let url = node
            .select(&self.selectors.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| self.resolve(href));

        let image_url = node.select(&self.selectors.image).next().and_then(|img| {
            let src = img
                .value()
                .attr("src")
                .filter(|s| !s.trim().is_empty())
                .or_else(|| img.value().attr("data-src"))?;
            self.resolve(src)
        });

        let region = node
            .select(&self.selectors.region)
            .next()
            .map(text_of)
            .and_then(|loc| loc.split_whitespace().next().map(str::to_string));

        Some(Listing {
            id: id.to_string(),
            title,
            price,
            url,
            keyword: keyword.to_string(),
            region,
            image_url,
        })
    }

    fn is_recent(&self, posted: &str) -> bool {
        self.markers.iter().any(|m| posted.contains(m.as_str()))
    }

    fn resolve(&self, link: &str) -> Option<String> {
        let link = link.trim();
        if link.is_empty() {
            return None;
        }
        if let Some(rest) = link.strip_prefix("//") {
            return Some(format!("https://{}", rest));
        }
        self.base.join(link).ok().map(String::from)
    }
}

fn text_of(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
