//! Annotation keys read from tenants and spawner definitions

use kube::Resource;

pub const DISPLAY_NAME: &str = "dossier.unito.it/display-name";
pub const DESCRIPTION: &str = "dossier.unito.it/description";
pub const IMAGE_POLICY: &str = "dossier.unito.it/image-policy";
pub const RESOURCE_POLICY: &str = "dossier.unito.it/resource-policy";

/// Read access to Dossier annotations on any Kubernetes object.
pub trait Annotated {
    fn annotation(&self, key: &str) -> Option<&str>;

    fn display_name(&self) -> Option<&str> {
        self.annotation(DISPLAY_NAME)
    }

    fn description(&self) -> Option<&str> {
        self.annotation(DESCRIPTION)
    }
}

impl<K: Resource> Annotated for K {
    fn annotation(&self, key: &str) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()?
            .get(key)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tenant, TenantSpec};

    #[test]
    fn test_read_annotations() {
        let mut tenant = Tenant::new("physics", TenantSpec::default());
        tenant.metadata.annotations = Some(
            [
                (DISPLAY_NAME.to_string(), "Physics Department".to_string()),
                (IMAGE_POLICY.to_string(), "manual".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        assert_eq!(tenant.display_name(), Some("Physics Department"));
        assert_eq!(tenant.annotation(IMAGE_POLICY), Some("manual"));
        assert_eq!(tenant.description(), None);
    }

    #[test]
    fn test_missing_annotation_map() {
        let tenant = Tenant::new("bare", TenantSpec::default());
        assert_eq!(tenant.display_name(), None);
    }
}
