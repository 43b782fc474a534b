pub mod audience_cache;
pub mod filter;
pub mod notifier;
pub mod pagination;
