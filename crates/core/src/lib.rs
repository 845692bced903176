//! Text lookup with culture fallback, hot-swappable catalogs and per-request
//! culture negotiation.

pub mod catalog;
pub mod config;
pub mod culture;
pub mod format;
pub mod loader;
pub mod localizer;
pub mod negotiate;
pub mod server;

pub use catalog::Catalog;
pub use culture::{Culture, CultureError, CultureFormat, RequestCulture};
pub use format::FormatError;
pub use loader::{FileResourceLoader, LoadError, ResourceLoader};
pub use localizer::{
    DynamicLocalizer, LocalizedText, LocalizerOptions, LocalizerStatus, ReloadOutcome,
};
pub use negotiate::{CultureNegotiator, CultureProvider, RequestContext, RequestCultureFeature};
