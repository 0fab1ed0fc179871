#![forbid(unsafe_code)]

pub mod backend;
pub mod cli;
pub mod context;
pub mod crawl;
pub mod download;
pub mod extractor;
pub mod logging;
pub mod merge;
pub mod model;
pub mod pages;
pub mod parse;
pub mod resolve;
