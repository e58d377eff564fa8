//! Test utilities for the fixture framework.
//!
//! - [`MockCluster`]: in-memory [`ClusterAccessor`](fixture_framework::kube::ClusterAccessor)
//!   with failure injection and tunnel open/close accounting.
//! - [`MockLauncher`]: [`ServerLauncher`](fixture_framework::environment::ServerLauncher)
//!   that runs the real embedded server but counts generations and can fail
//!   on demand.
//! - [`fixtures`]: sample documents and short-timeout configurations.

pub mod fixtures;
pub mod mock_cluster;
pub mod mock_launcher;

pub use mock_cluster::{MockCluster, MockClusterBuilder, TunnelStats};
pub use mock_launcher::{LaunchStats, MockLauncher};
