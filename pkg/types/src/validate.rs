use anyhow::{Result, bail};

use crate::deployment::Deployment;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate the identifiers and template a Deployment must carry before it
/// can be rolled out.
pub fn validate_deployment(deploy: &Deployment) -> Result<()> {
    if deploy.id.is_empty() {
        bail!("deployment '{}' has no id", deploy.name);
    }
    validate_name(&deploy.name)?;
    if deploy.namespace.is_empty() {
        bail!("deployment '{}' has no namespace", deploy.name);
    }
    if deploy.spec.template.spec.containers.is_empty() {
        bail!(
            "deployment '{}' template must declare at least one container",
            deploy.name
        );
    }
    for container in &deploy.spec.template.spec.containers {
        if container.image.is_empty() {
            bail!(
                "container '{}' in deployment '{}' has no image",
                container.name,
                deploy.name
            );
        }
    }
    Ok(())
}
