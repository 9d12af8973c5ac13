pub mod config;
pub mod history;
pub mod keywords;
pub mod output;
pub mod providers;
pub mod quota;
pub mod scheduler;
pub mod server;
pub mod storage;
