pub mod cli;
pub mod config;
pub mod crawler;
pub mod harvester;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod storage;
