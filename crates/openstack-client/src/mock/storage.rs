//! Image and volume operations for MockOpenStackClient

use super::{MockOpenStackClient, lock};
use crate::error::OpenStackError;
use crate::models::*;
use crate::openstack_trait::{ImageService, VolumeService};

#[async_trait::async_trait]
impl ImageService for MockOpenStackClient {
    async fn get_image_id(&self, name: &str) -> Result<String, OpenStackError> {
        self.record("get_image_id", name)?;
        let images = lock(&self.images);
        let matches = images.values().filter(|i| i.name == name).collect::<Vec<_>>();
        match matches.as_slice() {
            [] => Err(OpenStackError::NotFound(format!("image {:?} not found", name))),
            [image] => Ok(image.id.clone()),
            _ => Err(OpenStackError::InvalidRequest(format!(
                "found {} images with name {:?}",
                matches.len(),
                name
            ))),
        }
    }
}

#[async_trait::async_trait]
impl VolumeService for MockOpenStackClient {
    async fn create_volume(&self, request: &VolumeCreateRequest) -> Result<Volume, OpenStackError> {
        self.record("create_volume", &request.name)?;
        // Volumes become available immediately in the mock cloud
        let volume = Volume {
            id: self.next_id("volume"),
            name: request.name.clone(),
            status: "available".to_string(),
            size: request.size,
        };
        lock(&self.volumes).insert(volume.id.clone(), volume.clone());
        Ok(volume)
    }

    async fn get_volume(&self, id: &str) -> Result<Volume, OpenStackError> {
        self.record("get_volume", id)?;
        lock(&self.volumes)
            .get(id)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("volume {} not found", id)))
    }

    async fn delete_volume(&self, id: &str) -> Result<(), OpenStackError> {
        self.record("delete_volume", id)?;
        lock(&self.volumes)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OpenStackError::NotFound(format!("volume {} not found", id)))
    }

    async fn list_volumes_by_name(&self, name: &str) -> Result<Vec<Volume>, OpenStackError> {
        self.record("list_volumes_by_name", name)?;
        Ok(lock(&self.volumes)
            .values()
            .filter(|v| v.name == name)
            .cloned()
            .collect())
    }
}
