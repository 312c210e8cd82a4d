pub mod config;
pub mod controller;
pub mod egress;
pub mod errors;
pub mod health;
pub mod logging;
pub mod oracle;
pub mod personality;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod ui;
