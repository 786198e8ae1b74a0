pub mod traits;
pub mod web;

#[cfg(test)]
pub(crate) mod fake;

pub use traits::{BrowserPage, PageEvent};
