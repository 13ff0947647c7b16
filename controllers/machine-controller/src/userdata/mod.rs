//! Instance user data
//!
//! User data comes from the secret named by `userDataSecret` in the provider
//! spec. The secret's `userData` key is rendered as a template unless the
//! secret also carries `disableTemplating`; a `postprocessor` key selects a
//! conversion applied to the rendered text.

pub mod ignition;
pub mod template;

use crate::error::ControllerError;
use crate::session::SecretStore;
use crds::{Machine, OpenstackProviderSpec};
use kube::ResourceExt;
use tracing::debug;

/// Secret key holding the user data
pub const USER_DATA_KEY: &str = "userData";

/// Secret key whose presence disables templating
pub const DISABLE_TEMPLATING_KEY: &str = "disableTemplating";

/// Secret key naming the postprocessor
pub const POSTPROCESSOR_KEY: &str = "postprocessor";

/// Container Linux Config transpiler
pub const CT_POSTPROCESSOR: &str = "ct";

/// Fetch and render the user data for `machine`.
///
/// A spec without `userDataSecret` has empty user data.
pub async fn get_user_data(
    secrets: &dyn SecretStore,
    machine: &Machine,
    spec: &OpenstackProviderSpec,
) -> Result<String, ControllerError> {
    let Some(secret_ref) = &spec.user_data_secret else {
        return Ok(String::new());
    };
    if secret_ref.name.is_empty() {
        return Err(ControllerError::UserData(
            "UserDataSecret name must be provided".to_string(),
        ));
    }

    let machine_namespace = machine.namespace().unwrap_or_default();
    let namespace = secret_ref.namespace_or(&machine_namespace);
    let data = secrets.secret_data(namespace, &secret_ref.name).await?;

    let user_data = data.get(USER_DATA_KEY).ok_or_else(|| {
        ControllerError::UserData(format!(
            "Machine's userdata secret {} in namespace {} did not contain key {}",
            secret_ref.name, namespace, USER_DATA_KEY
        ))
    })?;
    let user_data = String::from_utf8_lossy(user_data).into_owned();

    let rendered = if user_data.is_empty() || data.contains_key(DISABLE_TEMPLATING_KEY) {
        user_data
    } else {
        template::render(&user_data, machine, spec)
            .map_err(|e| ControllerError::UserData(format!("failed to render user data template: {}", e)))?
    };

    match data.get(POSTPROCESSOR_KEY) {
        None => Ok(rendered),
        Some(postprocessor) => postprocess(&String::from_utf8_lossy(postprocessor), &rendered),
    }
}

fn postprocess(postprocessor: &str, user_data: &str) -> Result<String, ControllerError> {
    match postprocessor {
        CT_POSTPROCESSOR => {
            debug!("Transpiling user data to Ignition");
            ignition::transpile(user_data)
                .map_err(|e| ControllerError::UserData(format!("Postprocessor error: {}", e)))
        }
        other => Err(ControllerError::UserData(format!(
            "Postprocessor error: unknown postprocessor: '{}'",
            other
        ))),
    }
}
