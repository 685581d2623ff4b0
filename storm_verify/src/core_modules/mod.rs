pub mod columnar;
pub mod config;
pub mod error;
pub mod field;
pub mod interest;
pub mod logging;
pub mod matcher;
pub mod outcome;
pub mod region_extractor;
pub mod storm_object;
pub mod store;
pub mod tracker;
