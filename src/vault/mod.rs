pub mod archiver;
pub mod audit;
pub mod config;
pub mod lease;
pub mod ledger;
pub mod path_key;
pub mod paths;
pub mod retention;
pub mod run_config;
pub mod s3tar;
pub mod storage;
pub mod util;
pub mod walker;
pub mod warn;
