//! Physical device selection across every candidate a provider reports.

use crate::catalog::{CapabilityCatalog, DeviceType};
use crate::error::{GpuError, Result};
use crate::features::DeviceFeatures;
use crate::negotiate::{negotiate, Selection};
use crate::provider::HardwareQueryProvider;
use crate::requirements::{QueueRoles, RequirementSet, ScoreWeights};

/// Fluent front end over [`RequirementSet`] and a [`HardwareQueryProvider`].
pub struct PhysicalDeviceSelector<'p, P: HardwareQueryProvider> {
    provider: &'p P,
    requirements: RequirementSet,
    weights: ScoreWeights,
}

impl<'p, P: HardwareQueryProvider> PhysicalDeviceSelector<'p, P> {
    pub fn new(provider: &'p P) -> Self {
        Self {
            provider,
            requirements: RequirementSet::default(),
            weights: ScoreWeights::default(),
        }
    }

    /// Replace the accumulated requirements.
    pub fn with_requirements(mut self, requirements: RequirementSet) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn require_extension(mut self, name: impl Into<String>) -> Self {
        self.requirements = self.requirements.require_extension(name);
        self
    }

    pub fn request_extension(mut self, name: impl Into<String>) -> Self {
        self.requirements = self.requirements.request_extension(name);
        self
    }

    pub fn require_features(mut self, features: impl Into<DeviceFeatures>) -> Self {
        self.requirements = self.requirements.require_features(features);
        self
    }

    pub fn request_features(mut self, features: impl Into<DeviceFeatures>) -> Self {
        self.requirements = self.requirements.request_features(features);
        self
    }

    pub fn require_memory(mut self, bytes: u64) -> Self {
        self.requirements = self.requirements.require_memory(bytes);
        self
    }

    pub fn request_memory(mut self, bytes: u64) -> Self {
        self.requirements = self.requirements.request_memory(bytes);
        self
    }

    pub fn set_flags(mut self, roles: QueueRoles) -> Self {
        self.requirements = self.requirements.set_flags(roles);
        self
    }

    pub fn add_flags(mut self, roles: QueueRoles) -> Self {
        self.requirements = self.requirements.add_flags(roles);
        self
    }

    pub fn remove_flags(mut self, roles: QueueRoles) -> Self {
        self.requirements = self.requirements.remove_flags(roles);
        self
    }

    pub fn request_flags(mut self, roles: QueueRoles) -> Self {
        self.requirements = self.requirements.request_flags(roles);
        self
    }

    pub fn prefer_type(mut self, device_type: DeviceType) -> Self {
        self.requirements = self.requirements.prefer_type(device_type);
        self
    }

    pub fn allow_any_type(mut self, allow: bool) -> Self {
        self.requirements = self.requirements.allow_any_type(allow);
        self
    }

    pub fn require_api_version(mut self, version: u32) -> Self {
        self.requirements = self.requirements.require_api_version(version);
        self
    }

    pub fn requirements(&self) -> &RequirementSet {
        &self.requirements
    }

    /// Negotiate every candidate, in enumeration order.
    ///
    /// A failure affects only its own element. Misconfiguration, or a failure
    /// to list candidates at all, yields a single `Err` element.
    pub fn enumerate(&self) -> Vec<Result<Selection<P::Candidate>>> {
        if let Err(e) = self.requirements.check() {
            return vec![Err(e)];
        }

        match self.provider.enumerate_candidates() {
            Ok(candidates) => self.negotiate_all(candidates),
            Err(e) => vec![Err(e)],
        }
    }

    /// Pick the highest-scoring eligible candidate.
    ///
    /// Ties go to the candidate enumerated first. Misconfiguration and a
    /// failure to list candidates are returned as-is.
    pub fn select(&self) -> Result<Selection<P::Candidate>> {
        self.requirements.check()?;
        let candidates = self.provider.enumerate_candidates()?;

        let mut best: Option<Selection<P::Candidate>> = None;
        let mut rejections = Vec::new();

        for outcome in self.negotiate_all(candidates) {
            match outcome {
                Ok(selection) => {
                    if best.as_ref().map_or(true, |b| selection.score > b.score) {
                        best = Some(selection);
                    }
                }
                Err(e @ GpuError::Configuration(_)) => return Err(e),
                Err(e) => rejections.push(e),
            }
        }

        let selection = best.ok_or(GpuError::NoEligibleCandidate { rejections })?;
        tracing::info!("Selected GPU: {}", selection.summary());
        Ok(selection)
    }

    fn negotiate_all(
        &self,
        candidates: Vec<P::Candidate>,
    ) -> Vec<Result<Selection<P::Candidate>>> {
        candidates
            .into_iter()
            .enumerate()
            .map(|(ordinal, candidate)| {
                let outcome = CapabilityCatalog::query(self.provider, candidate)
                    .and_then(|catalog| {
                        negotiate(candidate, ordinal, &catalog, &self.requirements, &self.weights)
                    });
                match &outcome {
                    Ok(selection) => {
                        tracing::debug!("Candidate {ordinal} eligible: {}", selection.summary());
                    }
                    Err(e) => tracing::debug!("Candidate {ordinal} rejected: {e}"),
                }
                outcome
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CandidateProperties, QueueFamily, SurfaceSupport};
    use crate::error::Unmet;
    use crate::fixtures::{gpu, C, GB};
    use crate::provider::StaticProvider;
    use ash::vk;
    use std::collections::HashSet;

    #[test]
    fn equal_scores_pick_first_enumerated() {
        let provider = StaticProvider::new(vec![
            gpu("first", DeviceType::Discrete),
            gpu("second", DeviceType::Discrete),
        ]);

        let selection = PhysicalDeviceSelector::new(&provider).select().unwrap();
        assert_eq!(selection.name(), "first");
        assert_eq!(selection.handle, 0);

        let selection = PhysicalDeviceSelector::new(&provider)
            .weights(ScoreWeights::uniform())
            .select()
            .unwrap();
        assert_eq!(selection.ordinal, 0);
    }

    #[test]
    fn highest_score_wins() {
        let provider = StaticProvider::new(vec![
            gpu("integrated", DeviceType::Integrated),
            gpu("discrete", DeviceType::Discrete),
            gpu("compute-rich", DeviceType::Integrated).with_queue_family(QueueFamily::new(1, C)),
        ]);

        let selection = PhysicalDeviceSelector::new(&provider)
            .request_flags(QueueRoles::DEDICATED_COMPUTE)
            .select()
            .unwrap();
        assert_eq!(selection.name(), "discrete");

        let selection = PhysicalDeviceSelector::new(&provider)
            .weights(ScoreWeights::default().with_preferred_type(0))
            .request_flags(QueueRoles::DEDICATED_COMPUTE)
            .select()
            .unwrap();
        assert_eq!(selection.name(), "compute-rich");
        assert_eq!(selection.queues.compute, Some(1));
    }

    #[test]
    fn all_rejected_aggregates_reasons() {
        let provider = StaticProvider::new(vec![
            gpu("small", DeviceType::Discrete),
            gpu("smaller", DeviceType::Integrated),
        ]);

        let err = PhysicalDeviceSelector::new(&provider)
            .require_memory(32 * GB)
            .select()
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"No suitable GPU found (2 candidate(s) rejected)");

        let GpuError::NoEligibleCandidate { rejections } = err else {
            panic!("expected NoEligibleCandidate");
        };
        assert!(rejections
            .iter()
            .all(|e| matches!(e.unmet_reason(), Some(Unmet::Memory { .. }))));
    }

    #[test]
    fn configuration_error_is_not_a_rejection() {
        let provider = StaticProvider::new(vec![gpu("any", DeviceType::Discrete)]);
        let selector = PhysicalDeviceSelector::new(&provider).require_extension("");

        let outcomes = selector.enumerate();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Err(GpuError::Configuration(_))));
        assert!(matches!(selector.select(), Err(GpuError::Configuration(_))));
    }

    /// Fails every query for one candidate.
    struct FlakyProvider {
        inner: StaticProvider,
        broken: usize,
    }

    impl FlakyProvider {
        fn guard(&self, candidate: usize) -> Result<()> {
            if candidate == self.broken {
                Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
            } else {
                Ok(())
            }
        }
    }

    impl HardwareQueryProvider for FlakyProvider {
        type Candidate = usize;

        fn enumerate_candidates(&self) -> Result<Vec<usize>> {
            self.inner.enumerate_candidates()
        }
        fn properties(&self, c: usize) -> Result<CandidateProperties> {
            self.guard(c)?;
            self.inner.properties(c)
        }
        fn extensions(&self, c: usize) -> Result<HashSet<String>> {
            self.inner.extensions(c)
        }
        fn features(&self, c: usize, api: u32) -> Result<DeviceFeatures> {
            self.inner.features(c, api)
        }
        fn memory_heaps(&self, c: usize) -> Result<Vec<vk::MemoryHeap>> {
            self.inner.memory_heaps(c)
        }
        fn queue_families(&self, c: usize) -> Result<Vec<QueueFamily>> {
            self.inner.queue_families(c)
        }
        fn surface_support(&self, c: usize) -> Result<Option<SurfaceSupport>> {
            self.inner.surface_support(c)
        }
    }

    #[test]
    fn query_failure_is_isolated_to_its_candidate() {
        let provider = FlakyProvider {
            inner: StaticProvider::new(vec![
                gpu("a", DeviceType::Discrete),
                gpu("b", DeviceType::Discrete),
                gpu("c", DeviceType::Discrete),
            ]),
            broken: 1,
        };

        let outcomes = PhysicalDeviceSelector::new(&provider).enumerate();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert!(matches!(
            outcomes[1],
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(outcomes[2].as_ref().unwrap().ordinal, 2);
    }

    #[test]
    fn listing_failure_is_returned_unwrapped() {
        struct NoDriver;
        impl HardwareQueryProvider for NoDriver {
            type Candidate = usize;
            fn enumerate_candidates(&self) -> Result<Vec<usize>> {
                Err(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
            }
            fn properties(&self, _: usize) -> Result<CandidateProperties> {
                unreachable!()
            }
            fn extensions(&self, _: usize) -> Result<HashSet<String>> {
                unreachable!()
            }
            fn features(&self, _: usize, _: u32) -> Result<DeviceFeatures> {
                unreachable!()
            }
            fn memory_heaps(&self, _: usize) -> Result<Vec<vk::MemoryHeap>> {
                unreachable!()
            }
            fn queue_families(&self, _: usize) -> Result<Vec<QueueFamily>> {
                unreachable!()
            }
            fn surface_support(&self, _: usize) -> Result<Option<SurfaceSupport>> {
                unreachable!()
            }
        }

        let outcomes = PhysicalDeviceSelector::new(&NoDriver).enumerate();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_err());

        let err = PhysicalDeviceSelector::new(&NoDriver).select().unwrap_err();
        assert!(matches!(
            err,
            GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        ));
    }
}
