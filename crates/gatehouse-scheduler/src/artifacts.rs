//! Artifact exchange between jobs of one run.

use crate::dag::JobGraph;
use gatehouse_core::ArtifactError;
use gatehouse_core::pipeline::NodeKey;
use gatehouse_core::ports::Artifact;
use gatehouse_core::run::ArtifactSummary;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Keyed store with exactly one producer per key.
///
/// Keys are declared up front from the jobs' `produces` lists; payloads
/// become fetchable once their producer publishes them on success.
#[derive(Debug, Default)]
pub struct ArtifactExchange {
    declared: HashMap<String, String>,
    published: HashMap<String, Artifact>,
}

impl ArtifactExchange {
    /// Exchange accepting the keys declared by the graph's jobs.
    pub fn for_graph(graph: &JobGraph) -> Self {
        let declared = graph
            .producers()
            .map(|(key, job)| (key.to_string(), graph.job(job).name().to_string()))
            .collect();
        Self {
            declared,
            published: HashMap::new(),
        }
    }

    /// Publish a payload under `key`.
    pub fn publish(
        &mut self,
        key: &str,
        payload: Vec<u8>,
        producer: &NodeKey,
    ) -> Result<(), ArtifactError> {
        let declared_by = self
            .declared
            .get(key)
            .ok_or_else(|| ArtifactError::UnknownKey(key.to_string()))?;

        if *declared_by != producer.job {
            return Err(ArtifactError::DuplicateProducer {
                key: key.to_string(),
                existing: declared_by.clone(),
                attempted: producer.to_string(),
            });
        }

        if let Some(existing) = self.published.get(key) {
            return Err(ArtifactError::DuplicateProducer {
                key: key.to_string(),
                existing: existing.producer.to_string(),
                attempted: producer.to_string(),
            });
        }

        debug!(key = %key, producer = %producer, size = payload.len(), "Artifact published");
        self.published.insert(
            key.to_string(),
            Artifact {
                key: key.to_string(),
                payload,
                producer: producer.clone(),
            },
        );
        Ok(())
    }

    /// Fetch a published artifact on behalf of `consumer`.
    pub fn fetch(&self, key: &str, consumer: &NodeKey) -> Result<&Artifact, ArtifactError> {
        if !self.declared.contains_key(key) {
            return Err(ArtifactError::UnknownKey(key.to_string()));
        }
        self.published
            .get(key)
            .ok_or_else(|| ArtifactError::NotYetAvailable {
                key: key.to_string(),
                consumer: consumer.to_string(),
            })
    }

    /// Report entries for every published artifact, sorted by key.
    pub fn summaries(&self) -> Vec<ArtifactSummary> {
        let mut summaries: Vec<ArtifactSummary> = self
            .published
            .values()
            .map(|artifact| ArtifactSummary {
                key: artifact.key.clone(),
                producer: artifact.producer.clone(),
                size_bytes: artifact.payload.len() as u64,
                sha256: hex::encode(Sha256::digest(&artifact.payload)),
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    /// Drop every payload at the end of a run.
    pub fn clear(&mut self) {
        self.published.clear();
    }
}
