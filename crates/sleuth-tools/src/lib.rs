//! External collaborators used by the research stages: a web-search provider
//! and a page scraper. Both are traits so stages can be driven by in-memory
//! implementations in tests.

pub mod scrape;
pub mod search;

pub use scrape::{extract_text_from_html, is_garbled, HttpScraper, ScrapeOutcome, Scraper};
pub use search::{format_results, SearchProvider, SearchResult, SerperSearch};
