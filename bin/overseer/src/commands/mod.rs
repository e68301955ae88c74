pub mod gateway;
pub mod run_cmd;
