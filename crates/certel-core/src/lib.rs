pub mod attestation;
pub mod constants;
pub mod error;

pub use attestation::{genesis_attestation, truncate_to_seconds, Attestation, AttestationStatus};
pub use constants::*;
pub use error::CertelError;
