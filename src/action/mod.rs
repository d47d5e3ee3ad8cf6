pub mod config_generate;
pub mod start;
