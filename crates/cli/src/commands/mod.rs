pub mod config_cmd;
pub mod gen_keys;
pub mod serve;
