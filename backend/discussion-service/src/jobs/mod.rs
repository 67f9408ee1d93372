//! Background jobs
//!
//! - Community tree refresher: periodic rebuild of the hierarchy snapshot

pub mod community_tree_refresher;

pub use community_tree_refresher::{start_community_tree_refresher, CommunityTreeRefresherConfig};
