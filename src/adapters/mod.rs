//! Source adapters (C4): stateless paginating clients over the upstream
//! House of Commons and OpenParliament feeds, each wrapping a shared
//! [`crate::http::client::HttpAdapterCore`] and normalizing raw payloads
//! into the domain records in [`models`].

pub mod committees;
pub mod hansard;
pub mod models;
pub mod normalize;
pub mod publications;
pub mod votes;
pub mod xml;
