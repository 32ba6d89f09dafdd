pub mod annotations;
pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod html;
pub mod links;
pub mod output;
pub mod providers;
pub mod pubmed;
pub mod record;
pub mod references;
pub mod sideload;
pub mod store;
pub mod taxonomy;
