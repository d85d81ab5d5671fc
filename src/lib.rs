//! Workspace umbrella crate.
//!
//! Exposes the feature flags that map onto the workspace crates so a host can
//! depend on `offline-cache-workspace` alone. The offline core is always
//! available; the host façade comes in with `service` or `desktop-shims`.

pub use core_offline as offline;

#[cfg(feature = "service")]
pub use core_service as service;
