//! Startup check that every image a job could need is present.

use alaska_db::{RegistryError, WorkRegistry};
use alaska_sandbox::{Sandbox, SandboxError};

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("Required sandbox image '{0}' is not available")]
    MissingImage(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Verify the images of all active analyses, plus `index_image` if set.
pub async fn check_images(
    registry: &dyn WorkRegistry,
    sandbox: &dyn Sandbox,
    index_image: Option<&str>,
) -> Result<(), PreflightError> {
    let mut images: Vec<String> = registry
        .list_active_analyses()
        .await?
        .into_iter()
        .map(|a| a.image)
        .collect();
    images.extend(index_image.map(str::to_string));
    images.sort();
    images.dedup();

    for image in &images {
        if !sandbox.image_exists(image).await? {
            return Err(PreflightError::MissingImage(image.clone()));
        }
        tracing::info!(image = %image, "Image present");
    }
    Ok(())
}
