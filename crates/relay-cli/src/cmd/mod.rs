pub mod config;
pub mod init;
pub mod run;
pub mod serve;
pub mod tasks;
pub mod workers;
