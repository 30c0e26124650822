//! Per-provider connection variants.
//!
//! Every variant wires the same pieces together: an immutable credentials
//! struct loaded via `ortho-config`, a creation spec with the provider's
//! defaults, a status classification function, and a connection that holds
//! a lazily-built [`crate::connection::ComputeApi`] adapter behind a
//! `OnceLock`. The lifecycle layer never special-cases a provider; the
//! variants differ only in classification, creation fields, and how the
//! usable address and default login user are derived.

pub mod aws;
pub mod azure;
pub mod azure_rm;
pub mod gcp;
pub mod rackspace;
