pub mod header_extension;
pub mod header_extensions;
