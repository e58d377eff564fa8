//! # Fixture Framework
//!
//! Lifecycle management for integration-test fixtures that run either
//! in-process ("native") or in a Kubernetes cluster ("kube").
//!
//! A test creates a [`Context`], asks [`new_component`] for a component, and
//! talks to it through the [`Instance`] trait regardless of environment.
//! Everything the context hands out is released, last acquired first, by
//! [`Context::teardown`].
//!
//! ```rust,ignore
//! use fixture_framework::{new_component, ComponentConfig, Context, FrameworkConfig};
//!
//! let ctx = Context::new(FrameworkConfig::from_env()?).await?;
//! let server = new_component(&ctx, ComponentConfig::default()).await?;
//!
//! server.apply_config(None, &["kind: Gateway\nmetadata:\n  name: ingress\n"]).await?;
//! server.wait_for_snapshot("Gateway", &[expected]).await?;
//!
//! ctx.teardown().await?;
//! ```

pub mod components;
pub mod config;
pub mod context;
pub mod deployment;
pub mod environment;
pub mod errors;
pub mod eventual;
pub mod kube;
pub mod namespace;
pub mod resource;

pub use components::{new_component, Client, ComponentConfig, Instance, KubeTarget};
pub use config::{FrameworkConfig, Timeouts};
pub use context::{Context, TmpDirs};
pub use environment::{Environment, EnvironmentKind};
pub use errors::FixtureError;
pub use namespace::{Namespace, TemplateNamespace};
pub use resource::{Resource, ResourceId, ResourceTracker};
