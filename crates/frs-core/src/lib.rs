#![deny(missing_docs)]
#![doc = "Shared error taxonomy, canonical serialization and provenance for frscan."]

pub mod errors;
/// Stable content hashing.
pub mod hash;
pub mod provenance;
/// Canonical JSON and YAML helpers.
pub mod serde;

pub use errors::{config_error, io_error, ErrorInfo, FrsError};
pub use hash::stable_hash_string;
pub use provenance::RunProvenance;
pub use crate::serde::{
    from_json_slice, from_yaml_slice, read_json, to_canonical_json_bytes, write_json,
};
