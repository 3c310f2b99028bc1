use crate::config::SwarmConfig;
use std::path::Path;
use swarm_model::TargetId;

/// Read-only view of the configured target groups and storage limits.
pub trait TargetRegistry: Send + Sync {
    fn resolve(&self, group: &str) -> Option<&[TargetId]>;
    fn retention_window(&self) -> usize;
    fn artifact_root(&self) -> Option<&Path>;
}

impl TargetRegistry for SwarmConfig {
    fn resolve(&self, group: &str) -> Option<&[TargetId]> {
        self.target_groups.get(group).map(Vec::as_slice)
    }

    fn retention_window(&self) -> usize {
        self.storage.retention_window
    }

    fn artifact_root(&self) -> Option<&Path> {
        self.storage.artifact_root.as_deref()
    }
}

impl<R: TargetRegistry + ?Sized> TargetRegistry for &R {
    fn resolve(&self, group: &str) -> Option<&[TargetId]> {
        (**self).resolve(group)
    }

    fn retention_window(&self) -> usize {
        (**self).retention_window()
    }

    fn artifact_root(&self) -> Option<&Path> {
        (**self).artifact_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_groups() {
        let config = SwarmConfig::default().with_group("stable", ["5", "7"]);
        assert_eq!(
            config.resolve("stable"),
            Some(&["5".to_string(), "7".to_string()][..])
        );
        assert!(config.resolve("beta").is_none());
        assert!(config.artifact_root().is_none());
    }
}
