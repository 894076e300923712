//! # Scenario Repository
//!
//! Persistence seam for scenario definitions. The core never assumes a
//! storage medium: the manager layer receives a [`ScenarioRepository`] and
//! the embedding application picks the in-memory or file-backed
//! implementation (or brings its own).

use crate::error::ScenarioError;
use crate::scenario::ScenarioDefinition;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage contract for scenario definitions
#[async_trait]
pub trait ScenarioRepository: Send + Sync {
    /// Load every stored scenario
    async fn load(&self) -> Result<Vec<ScenarioDefinition>, ScenarioError>;
    /// Replace the stored set
    async fn save(&self, scenarios: &[ScenarioDefinition]) -> Result<(), ScenarioError>;
    /// Remove everything
    async fn clear(&self) -> Result<(), ScenarioError>;
}

/// Volatile repository for tests and embedded defaults
#[derive(Default)]
pub struct InMemoryScenarioRepository {
    scenarios: RwLock<Vec<ScenarioDefinition>>,
}

impl InMemoryScenarioRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScenarioRepository for InMemoryScenarioRepository {
    async fn load(&self) -> Result<Vec<ScenarioDefinition>, ScenarioError> {
        Ok(self.scenarios.read().await.clone())
    }

    async fn save(&self, scenarios: &[ScenarioDefinition]) -> Result<(), ScenarioError> {
        *self.scenarios.write().await = scenarios.to_vec();
        Ok(())
    }

    async fn clear(&self) -> Result<(), ScenarioError> {
        self.scenarios.write().await.clear();
        Ok(())
    }
}

/// JSON-file-backed repository
pub struct FileScenarioRepository {
    path: PathBuf,
}

impl FileScenarioRepository {
    /// Create a repository storing scenarios at `path`; the file is
    /// created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage location
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ScenarioRepository for FileScenarioRepository {
    async fn load(&self) -> Result<Vec<ScenarioDefinition>, ScenarioError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let scenarios: Vec<ScenarioDefinition> = serde_json::from_str(&contents)?;
                debug!(
                    "loaded {} scenarios from {}",
                    scenarios.len(),
                    self.path.display()
                );
                Ok(scenarios)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, scenarios: &[ScenarioDefinition]) -> Result<(), ScenarioError> {
        let contents = serde_json::to_string_pretty(scenarios)?;
        tokio::fs::write(&self.path, contents).await?;
        debug!(
            "saved {} scenarios to {}",
            scenarios.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn clear(&self) -> Result<(), ScenarioError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Edge, NodeData, ScenarioNode};

    fn sample_scenarios() -> Vec<ScenarioDefinition> {
        let mut scenario = ScenarioDefinition::new("persisted");
        scenario.nodes = vec![
            ScenarioNode::new("start", NodeData::Start),
            ScenarioNode::new("end", NodeData::End),
        ];
        scenario.edges = vec![Edge::new("start", "end")];
        vec![scenario]
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let repository = InMemoryScenarioRepository::new();
        assert!(repository.load().await.unwrap().is_empty());

        let scenarios = sample_scenarios();
        repository.save(&scenarios).await.unwrap();
        assert_eq!(repository.load().await.unwrap(), scenarios);

        repository.clear().await.unwrap();
        assert!(repository.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repository = FileScenarioRepository::new(dir.path().join("scenarios.json"));

        // Missing file reads as an empty set, not an error.
        assert!(repository.load().await.unwrap().is_empty());

        let scenarios = sample_scenarios();
        repository.save(&scenarios).await.unwrap();
        assert_eq!(repository.load().await.unwrap(), scenarios);

        repository.clear().await.unwrap();
        assert!(repository.load().await.unwrap().is_empty());
        // Clearing twice stays quiet.
        repository.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_load_rejects_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenarios.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let repository = FileScenarioRepository::new(path);
        assert!(matches!(
            repository.load().await,
            Err(ScenarioError::Serialization(_))
        ));
    }
}
