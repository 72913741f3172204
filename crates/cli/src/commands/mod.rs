pub mod call;
pub mod config_cmd;
pub mod doctor;
pub mod run;
