pub mod compact;
pub mod export;
pub mod import;
pub mod metadata;
pub mod upload;
