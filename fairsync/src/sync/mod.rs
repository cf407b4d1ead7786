pub mod cache;
pub mod engine;
pub mod localize;
pub mod merge;
pub mod team_patch;
pub mod transfer;
pub mod tree;
