//! Client data layer for VN Club: visual-novel stats, paginated browsing and
//! recommendations over a remote VNDB statistics API.
//!
//! The remote backend does all of the computation. This crate handles
//! everything between a user action and a rendered view: URL state, request
//! supersession and timeouts, the per-list prefetch cache, session snapshots
//! of stats pages, and image URL rewriting.

pub mod api;
pub mod browse;
pub mod config;
pub mod entity;
pub mod filters;
pub mod image;
pub mod lifecycle;
pub mod preferences;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod url_state;
