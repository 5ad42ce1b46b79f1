//! Suite transformation and metadata
//!
//! Reorders, groups and filters discovered suites, and reads the declarative
//! markers tests carry in their documentation.

mod catalog;
mod metadata;
mod transform;

pub use catalog::TestCatalog;
pub use metadata::{parse_level, parse_order, parse_tags, Metadata, DEFAULT_LEVEL, DEFAULT_ORDER};
pub use transform::{
    filter_by_level, filter_by_list, filter_by_tags, flatten, group_by_class, load_id_list,
    order_within_class,
};
