//! The HTML page that boots the browser client.
//!
//! Rendered from `templates/app_index.html` by askama, which escapes every
//! value for HTML and substitutes each placeholder exactly once.

use askama::Template;

use crate::urls;

/// Font size used when the `fontsize` query value is missing or malformed.
pub const DEFAULT_FONT_SIZE: u32 = 16;

/// Values rendered into the bootstrap template.
#[derive(Clone, Debug, PartialEq, Eq, Template)]
#[template(path = "app_index.html")]
pub struct IndexPage {
    pub title: String,
    pub font_size: u32,
    pub ws_url: String,
    pub static_url: String,
}

impl IndexPage {
    pub fn new(title: &str, base_url: &str, font_size: u32) -> Self {
        Self {
            title: title.to_owned(),
            font_size,
            ws_url: urls::ws_url(base_url),
            static_url: urls::static_url(base_url),
        }
    }
}
