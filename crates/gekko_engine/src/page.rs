use std::collections::HashSet;

use scraper::{Html, Selector};

/// Link and image counts of one HTML document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    /// Distinct navigable `href` values of `<a>` elements.
    pub links: usize,
    /// Number of `<img>` elements.
    pub images: usize,
}

impl PageStats {
    pub fn from_html(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let anchor_sel = Selector::parse("a[href]").ok();
        let img_sel = Selector::parse("img").ok();

        let links = anchor_sel
            .as_ref()
            .map(|sel| {
                doc.select(sel)
                    .filter_map(|a| a.value().attr("href"))
                    .map(str::trim)
                    .filter(|href| is_navigable(href))
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0);

        let images = img_sel
            .as_ref()
            .map(|sel| doc.select(sel).count())
            .unwrap_or(0);

        Self { links, images }
    }
}

fn is_navigable(href: &str) -> bool {
    if href.is_empty() {
        return false;
    }
    let lower = href.to_ascii_lowercase();
    !(lower.starts_with('#') || lower.starts_with("javascript:") || lower.starts_with("mailto:"))
}
