//! HTTP-backed collaborators for the storefront feed controller.

pub mod http_client;

pub use http_client::{HttpCatalogSource, HttpGeoResolver};
