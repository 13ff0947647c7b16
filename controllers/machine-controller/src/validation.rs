//! Pre-flight checks run before an instance is created
//!
//! Every failure here is a configuration problem: the machine cannot be
//! created until its provider spec changes.

use crate::error::ControllerError;
use crate::flavorcache::FlavorCache;
use crate::session::CloudSession;
use crds::OpenstackProviderSpec;

/// Check that everything `spec` references exists in the cloud.
pub async fn validate_machine(
    spec: &OpenstackProviderSpec,
    session: &CloudSession,
    flavors: &FlavorCache,
) -> Result<(), ControllerError> {
    // Booting from volume takes the image from the root volume instead
    if spec.root_volume.is_none() {
        session.image.get_image_id(&spec.image).await?;
    }

    flavors.get(session.compute.as_ref(), &spec.flavor).await?;

    validate_availability_zone(spec, session).await?;
    validate_server_group(spec, session).await
}

async fn validate_availability_zone(
    spec: &OpenstackProviderSpec,
    session: &CloudSession,
) -> Result<(), ControllerError> {
    if spec.availability_zone.is_empty() {
        return Ok(());
    }

    let zones = session.compute.list_availability_zones().await?;
    let available = zones
        .iter()
        .filter(|zone| zone.zone_state.available)
        .map(|zone| zone.zone_name.as_str())
        .collect::<Vec<_>>();
    if available.is_empty() {
        return Err(ControllerError::Validation(
            "could not find an available compute availability zone".to_string(),
        ));
    }
    if !available.contains(&spec.availability_zone.as_str()) {
        return Err(ControllerError::Validation(format!(
            "could not find compute availability zone: {}",
            spec.availability_zone
        )));
    }
    Ok(())
}

async fn validate_server_group(
    spec: &OpenstackProviderSpec,
    session: &CloudSession,
) -> Result<(), ControllerError> {
    let id = spec.server_group_id.as_str();
    let name = spec.server_group_name.as_str();

    if !id.is_empty() {
        let group = session.compute.get_server_group(id).await.map_err(|e| {
            ControllerError::Validation(format!(
                "error when looking up server group with ID {}: {}",
                id, e
            ))
        })?;
        if !name.is_empty() && group.name != name {
            return Err(ControllerError::Validation(format!(
                "name of a {} server group does not match defined name {}",
                id, name
            )));
        }
        return Ok(());
    }

    if !name.is_empty() {
        let count = session
            .compute
            .list_server_groups()
            .await?
            .iter()
            .filter(|group| group.name == name)
            .count();
        if count > 1 {
            return Err(ControllerError::Validation(format!(
                "{} server groups named {} exist",
                count, name
            )));
        }
    }
    Ok(())
}
