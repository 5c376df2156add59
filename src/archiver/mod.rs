pub mod bucket;
pub mod config;
pub mod paths;
pub mod render;
pub mod search;
pub mod session;
pub mod sorted_tree;
pub mod store;
pub mod watcher;
