pub mod configure;
pub mod history_store;
pub mod logger;
pub mod transfer;
