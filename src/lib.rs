pub mod app;
pub mod config;
pub mod lock;
pub mod scanner;
pub mod semantic;
pub mod storage;

#[cfg(test)]
mod tests;
