//! Container and image cleanup
//!
//! Every container a chain created is deleted, then every image it holds
//! (including the base image) is removed. Image removal failures are
//! expected, since deleting a container may already have taken an image
//! with it, and are ignored.

use tracing::{debug, info, warn};

use crate::container::chain::ContainerChain;
use crate::container::engine::ContainerEngine;
use crate::error::{Result, RunnerError};

pub struct ResourceReaper;

impl ResourceReaper {
    pub fn new() -> Self {
        Self
    }

    /// Removes everything the chain created and marks it reaped
    ///
    /// Container deletion failures are collected and returned once all
    /// deletions have been attempted.
    pub async fn cleanup(&self, chain: &mut ContainerChain) -> Result<()> {
        let (containers, images) = chain.take_resources();
        let engine = chain.engine();
        reap(engine.as_ref(), &containers, &images).await
    }
}

impl Default for ResourceReaper {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn reap(
    engine: &dyn ContainerEngine,
    containers: &[String],
    images: &[String],
) -> Result<()> {
    info!(
        "Cleaning up {} container(s) and {} image(s)",
        containers.len(),
        images.len()
    );

    let mut failures = Vec::new();
    for container in containers {
        match engine.remove_container(container).await {
            Ok(()) => debug!("Container {} removed", container),
            Err(e) => {
                warn!("Failed to remove container {}: {}", container, e);
                failures.push(format!("{}: {}", container, e));
            }
        }
    }

    for image in images {
        if let Err(e) = engine.remove_image(image).await {
            debug!("Ignoring failure to remove image {}: {}", image, e);
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RunnerError::Cleanup(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::FakeEngine;
    use std::sync::Arc;

    async fn chain_with_two_of_each(engine: &Arc<FakeEngine>) -> ContainerChain {
        let base = engine.build_image(std::path::Path::new("/src")).await.unwrap();
        let mut chain = ContainerChain::new(engine.clone(), base);
        for _ in 0..2 {
            let id = engine
                .create_container(chain.head(), &["true".to_string()])
                .await
                .unwrap();
            chain.track_container(id.clone());
            let image = engine.commit_container(&id).await.unwrap();
            chain.push_image(image);
        }
        chain
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything() {
        let engine = Arc::new(FakeEngine::new());
        let mut chain = chain_with_two_of_each(&engine).await;
        assert_eq!(engine.live_containers().len(), 2);
        assert_eq!(engine.live_images().len(), 3);

        ResourceReaper::new().cleanup(&mut chain).await.unwrap();

        assert!(engine.live_containers().is_empty());
        assert!(engine.live_images().is_empty());
        assert!(chain.is_reaped());
    }

    #[tokio::test]
    async fn test_image_removal_errors_are_swallowed() {
        let engine = Arc::new(FakeEngine::new());
        let mut chain = chain_with_two_of_each(&engine).await;
        // the engine already dropped an image on its own
        let head = chain.head().to_string();
        engine.remove_image(&head).await.unwrap();

        assert!(ResourceReaper::new().cleanup(&mut chain).await.is_ok());
        assert!(engine.live_images().is_empty());
    }

    #[tokio::test]
    async fn test_container_removal_errors_are_reported() {
        let engine = Arc::new(FakeEngine::new().failing_container_removal());
        let mut chain = chain_with_two_of_each(&engine).await;

        let err = ResourceReaper::new().cleanup(&mut chain).await.unwrap_err();

        assert!(matches!(err, RunnerError::Cleanup(ref failed) if failed.len() == 2));
        // images are still attempted
        assert!(engine.live_images().is_empty());
        assert!(chain.is_reaped());
    }

    #[tokio::test]
    async fn test_dropped_chain_is_reaped_in_background() {
        let engine = Arc::new(FakeEngine::new());
        let chain = chain_with_two_of_each(&engine).await;

        drop(chain);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(engine.live_containers().is_empty());
        assert!(engine.live_images().is_empty());
    }
}
