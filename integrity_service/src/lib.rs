// integrity_service/src/lib.rs

pub mod service;

pub use service::{IntegrityService, FAILED_TO_DESERIALISE_AXIOM_DURING_REFERENCE_INTEGRITY_CHECK};
