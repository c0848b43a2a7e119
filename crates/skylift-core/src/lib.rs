//! skylift core types.
//!
//! The shared vocabulary of the skylift deployment toolkit: the cloud
//! artifact model produced by synthesis (stacks, asset manifests, nested
//! assemblies), the asset manifest format, content hashing for
//! content-addressed work ids, and `skylift.toml` configuration parsing.

pub mod artifact;
pub mod asset;
pub mod config;
pub mod content_hash;

pub use artifact::{
    AssetManifestArtifact, CloudArtifact, NestedAssemblyArtifact, StackArtifact,
};
pub use asset::{
    AssetDestination, AssetEntry, AssetManifest, AssetSource, FilePackaging, ManifestError,
};
pub use config::{DeploySettings, ProjectSettings, SkyliftConfig};
pub use content_hash::{content_hash, short_content_hash};
