pub mod annotate;
pub mod config;
pub mod lang;
pub mod normalize;
pub mod packages;
pub mod report;
pub mod runtime;
pub mod scan;
pub mod status;
pub mod wikitext;
