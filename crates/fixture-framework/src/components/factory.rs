//! Environment-keyed component construction.

use super::kube::KUBE_COMPONENT_LABEL;
use super::native::NATIVE_COMPONENT_LABEL;
use super::{ComponentConfig, Instance, KubeComponent, NativeComponent};
use crate::context::Context;
use crate::environment::Environment;
use crate::errors::FixtureError;
use crate::resource::Resource;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Build a component in the context's environment and register it with the
/// context.
///
/// The instance is registered before it is started, so whatever a failed
/// start left behind is still released at teardown; it is also closed
/// immediately before the error is returned.
///
/// # Errors
///
/// Returns the construction failure of the selected variant.
#[instrument(skip_all, fields(environment = %ctx.environment().kind()))]
pub async fn new_component(
    ctx: &Context,
    config: ComponentConfig,
) -> Result<Arc<dyn Instance>, FixtureError> {
    match ctx.environment() {
        Environment::Native(env) => {
            let dirs = ctx.tmp_dirs();
            let env = env.clone();
            let component = ctx.track_resource(NATIVE_COMPONENT_LABEL, |id| {
                NativeComponent::new(id, config, env, dirs)
            });
            if let Err(e) = component.reset().await {
                unwind(component.as_ref()).await;
                return Err(e);
            }
            let instance: Arc<dyn Instance> = component;
            Ok(instance)
        }
        Environment::Kube(env) => {
            let env = env.clone();
            let component = ctx.track_resource(KUBE_COMPONENT_LABEL, |id| {
                KubeComponent::new(id, config, env)
            });
            // connect() unwinds its own partial state on failure.
            component.connect().await?;
            let instance: Arc<dyn Instance> = component;
            Ok(instance)
        }
    }
}

async fn unwind(resource: &dyn Resource) {
    if let Err(e) = resource.close().await {
        warn!(resource = %resource.id(), error = %e, "Failed to close after failed start");
    }
}
