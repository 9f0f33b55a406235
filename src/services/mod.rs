pub mod auth_service;
pub mod document_service;

pub use document_service::DocumentService;
