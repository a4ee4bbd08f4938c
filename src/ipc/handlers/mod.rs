pub mod core;
pub mod import_legacy;
