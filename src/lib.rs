//! Media compression, capture and feed core for the Kleo social app.

pub mod backend;
pub mod config;
pub mod feed;
pub mod media;
pub mod post;
pub mod profile;
pub mod share;
pub mod utils;
