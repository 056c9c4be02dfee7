//! dwiprep-provenance: records how pipeline outputs were produced
//!
//! Per-subject manifests carry blake3 hashes of the final artifacts; the
//! per-run BIDS `dataset_description` names the pipeline version, host,
//! user and FSL release that produced the derivatives.

pub mod description;
pub mod hash;
pub mod host;
pub mod manifest;

pub use description::DatasetDescription;
pub use hash::hash_file;
pub use host::RunEnvironment;
pub use manifest::SubjectManifest;

/// Name recorded in every manifest and dataset description
pub const PIPELINE_NAME: &str = "dMRI Preprocessing Pipeline";

/// Version of this pipeline build
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");
