pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fan_out;
pub mod filter_mapper;
pub mod graph;
pub mod http;
pub mod inclusions;
pub mod mappings;
pub mod ontology;
pub mod output;
pub mod response_mapper;
pub mod scoring;
pub mod store;
pub mod technique_source;
pub mod techniques;
pub mod units;
