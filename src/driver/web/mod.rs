pub mod driver;

pub use driver::{BrowserType, WebPage, WebPageConfig};
