pub mod action;
pub mod config;
pub mod error;
pub mod graph;
pub mod rpc;
pub mod scope;
