//! Device negotiation: hard filter, then soft score.

use bitflags::bitflags;

use crate::catalog::{CandidateProperties, CapabilityCatalog};
use crate::error::{GpuError, Result, Unmet};
use crate::features::DeviceFeatures;
use crate::queues::{classify, QueueAssignment};
use crate::requirements::{QueueRoles, RequirementSet, ScoreWeights};

/// Extension a portability implementation advertises and must have enabled.
pub const PORTABILITY_SUBSET: &str = "VK_KHR_portability_subset";

bitflags! {
    /// Facts about a selection that preferences can key on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SelectionFlags: u32 {
        const DEDICATED_COMPUTE = 1 << 0;
        const DEDICATED_TRANSFER = 1 << 1;
        const SEPARATE_COMPUTE = 1 << 2;
        const SEPARATE_TRANSFER = 1 << 3;
        /// `VK_KHR_portability_subset` was found and enabled.
        const PORTABILITY_SUBSET = 1 << 4;
        /// Device type matches the preferred one.
        const PREFERRED_TYPE = 1 << 5;
        /// Largest device-local heap reaches the requested size.
        const REQUESTED_MEMORY = 1 << 6;
    }
}

/// Outcome of negotiating one candidate.
#[derive(Debug, Clone)]
pub struct Selection<C> {
    /// Non-owning candidate handle.
    pub handle: C,
    /// Position in enumeration order.
    pub ordinal: usize,
    pub properties: CandidateProperties,
    pub queues: QueueAssignment,
    /// Extensions to enable: required, then available requested, then implied.
    pub extensions: Vec<String>,
    /// Features to enable: required plus available requested.
    pub features: DeviceFeatures,
    /// Size of the largest device-local heap.
    pub device_local_memory: u64,
    pub score: u64,
    pub flags: SelectionFlags,
}

impl<C> Selection<C> {
    pub fn name(&self) -> &str {
        &self.properties.name
    }

    /// One-line description for logs and reports.
    pub fn summary(&self) -> String {
        format!(
            "{} (score {}, graphics {:?}, compute {:?}, transfer {:?}, present {:?})",
            self.properties.name,
            self.score,
            self.queues.graphics,
            self.queues.compute,
            self.queues.transfer,
            self.queues.present,
        )
    }
}

/// Negotiate one candidate against a requirement set.
///
/// Every unmet Required item rejects the candidate; Requested items only
/// add to the score.
pub fn negotiate<C>(
    handle: C,
    ordinal: usize,
    catalog: &CapabilityCatalog,
    requirements: &RequirementSet,
    weights: &ScoreWeights,
) -> Result<Selection<C>> {
    let reject = |reason: Unmet| GpuError::unmet(catalog.name(), reason);
    let properties = &catalog.properties;

    // Phase 1: hard filter.
    if properties.api_version < requirements.min_api_version {
        return Err(reject(Unmet::ApiVersion {
            required: requirements.min_api_version,
            found: properties.api_version,
        }));
    }

    if !requirements.allow_any_type && properties.device_type != requirements.preferred_type {
        return Err(reject(Unmet::DeviceType {
            required: requirements.preferred_type,
            found: properties.device_type,
        }));
    }

    let required_extensions = requirements.effective_required_extensions();
    if let Some(missing) = required_extensions
        .iter()
        .find(|ext| !catalog.supports_extension(ext))
    {
        return Err(reject(Unmet::Extension(missing.clone())));
    }

    let missing_features = requirements.required_features.difference(&catalog.features);
    if !missing_features.is_empty() {
        return Err(reject(Unmet::Features(missing_features)));
    }

    let device_local_memory = catalog.largest_device_local_heap();
    if device_local_memory < requirements.required_memory {
        return Err(reject(Unmet::Memory {
            required: requirements.required_memory,
            available: device_local_memory,
        }));
    }

    if requirements.required_roles.contains(QueueRoles::PRESENT) && catalog.surface.is_none() {
        return Err(reject(Unmet::Surface));
    }

    let queues = classify(&catalog.queue_families, requirements.wanted_roles());
    let missing_roles = requirements.required_roles - queues.satisfied_roles();
    if !missing_roles.is_empty() {
        return Err(reject(Unmet::QueueRoles(missing_roles)));
    }

    // Phase 2: soft score.
    let mut score = 0;
    let mut flags = SelectionFlags::empty();

    if properties.device_type == requirements.preferred_type {
        score += weights.preferred_type;
        flags |= SelectionFlags::PREFERRED_TYPE;
    }

    let mut extensions = Vec::new();
    for ext in &required_extensions {
        if !extensions.contains(ext) {
            extensions.push(ext.clone());
        }
    }
    for ext in &requirements.requested_extensions {
        if catalog.supports_extension(ext) && !extensions.contains(ext) {
            score += weights.requested_extension;
            extensions.push(ext.clone());
        }
    }
    if catalog.supports_extension(PORTABILITY_SUBSET) {
        flags |= SelectionFlags::PORTABILITY_SUBSET;
        if !extensions.iter().any(|ext| ext == PORTABILITY_SUBSET) {
            extensions.push(PORTABILITY_SUBSET.to_string());
        }
    }

    let granted_features = requirements
        .requested_features
        .intersection(&catalog.features);
    score += u64::from(granted_features.count()) * weights.requested_feature;
    let features = requirements.required_features.union(&granted_features);

    if requirements.requested_memory > 0 && device_local_memory >= requirements.requested_memory {
        score += weights.requested_memory;
        flags |= SelectionFlags::REQUESTED_MEMORY;
    }

    let achieved = queues.satisfied_roles();
    let requested = requirements.requested_roles;
    let plain_roles =
        QueueRoles::GRAPHICS | QueueRoles::COMPUTE | QueueRoles::TRANSFER | QueueRoles::PRESENT;
    score += u64::from((requested & achieved & plain_roles).bits().count_ones())
        * weights.requested_role;

    for (role, flag, weight) in [
        (
            QueueRoles::DEDICATED_COMPUTE,
            SelectionFlags::DEDICATED_COMPUTE,
            weights.dedicated_queue,
        ),
        (
            QueueRoles::DEDICATED_TRANSFER,
            SelectionFlags::DEDICATED_TRANSFER,
            weights.dedicated_queue,
        ),
        (
            QueueRoles::SEPARATE_COMPUTE,
            SelectionFlags::SEPARATE_COMPUTE,
            weights.separate_queue,
        ),
        (
            QueueRoles::SEPARATE_TRANSFER,
            SelectionFlags::SEPARATE_TRANSFER,
            weights.separate_queue,
        ),
    ] {
        if achieved.contains(role) {
            flags |= flag;
            if requested.contains(role) {
                score += weight;
            }
        }
    }

    Ok(Selection {
        handle,
        ordinal,
        properties: properties.clone(),
        queues,
        extensions,
        features,
        device_local_memory,
        score,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeviceType, QueueFamily};
    use crate::features::{CoreFeatures, Vulkan12Features, Vulkan13Features};
    use crate::fixtures::{gpu, surface, C, G, GB, T};
    use ash::vk;

    fn run(catalog: &CapabilityCatalog, requirements: &RequirementSet) -> Result<Selection<()>> {
        negotiate((), 0, catalog, requirements, &ScoreWeights::default())
    }

    fn reason(result: Result<Selection<()>>) -> Unmet {
        match result {
            Err(GpuError::RequirementUnmet { reason, .. }) => reason,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn selection_revalidates_against_requirements() {
        let catalog = gpu("rtx", DeviceType::Discrete)
            .with_extensions(["VK_KHR_ray_query", "VK_EXT_mesh_shader"])
            .with_features(CoreFeatures::GEOMETRY_SHADER.into())
            .with_features(Vulkan13Features::DYNAMIC_RENDERING.into())
            .with_queue_family(QueueFamily::new(1, C))
            .with_surface(surface(2, 3));
        let catalog = CapabilityCatalog {
            queue_families: catalog
                .queue_families
                .into_iter()
                .map(|family| family.with_present(true))
                .collect(),
            ..catalog
        };

        let requirement_sets = [
            RequirementSet::new(),
            RequirementSet::new()
                .require_extension("VK_KHR_ray_query")
                .request_extension("VK_KHR_missing")
                .require_features(Vulkan13Features::DYNAMIC_RENDERING),
            RequirementSet::new()
                .add_flags(QueueRoles::PRESENT | QueueRoles::DEDICATED_COMPUTE)
                .require_memory(4 * GB)
                .require_api_version(vk::API_VERSION_1_3),
        ];

        for requirements in &requirement_sets {
            let selection = run(&catalog, requirements).unwrap();
            assert_eq!(requirements.validate(&selection), Ok(()));
            assert!(selection
                .extensions
                .iter()
                .all(|ext| catalog.supports_extension(ext)));
            assert!(catalog.features.contains(&selection.features));
        }
    }

    #[test]
    fn rejection_names_the_failed_requirement() {
        let catalog = gpu("igpu", DeviceType::Integrated);

        assert_eq!(
            reason(run(&catalog, &RequirementSet::new().require_extension("VK_KHR_ray_query"))),
            Unmet::Extension("VK_KHR_ray_query".into())
        );

        let required = DeviceFeatures::from(CoreFeatures::SHADER_FLOAT64)
            .union(&Vulkan12Features::BUFFER_DEVICE_ADDRESS.into());
        assert_eq!(
            reason(run(&catalog, &RequirementSet::new().require_features(required))),
            Unmet::Features(required)
        );

        assert_eq!(
            reason(run(&catalog, &RequirementSet::new().require_memory(12 * GB))),
            Unmet::Memory {
                required: 12 * GB,
                available: 8 * GB
            }
        );

        assert_eq!(
            reason(run(
                &catalog,
                &RequirementSet::new()
                    .prefer_type(DeviceType::Discrete)
                    .allow_any_type(false)
            )),
            Unmet::DeviceType {
                required: DeviceType::Discrete,
                found: DeviceType::Integrated
            }
        );

        assert_eq!(
            reason(run(&catalog, &RequirementSet::new().add_flags(QueueRoles::PRESENT))),
            Unmet::Surface
        );
    }

    #[test]
    fn missing_compute_role_rejects() {
        let catalog = CapabilityCatalog {
            queue_families: vec![QueueFamily::new(0, G | T), QueueFamily::new(1, T)],
            ..gpu("no-compute", DeviceType::Discrete)
        };

        assert!(run(&catalog, &RequirementSet::new()).is_ok());
        assert_eq!(
            reason(run(&catalog, &RequirementSet::new().add_flags(QueueRoles::COMPUTE))),
            Unmet::QueueRoles(QueueRoles::COMPUTE)
        );
    }

    #[test]
    fn required_dedicated_compute_rejects_shared_family() {
        let catalog = gpu("shared", DeviceType::Discrete);
        let requirements = RequirementSet::new().add_flags(QueueRoles::DEDICATED_COMPUTE);
        assert_eq!(
            reason(run(&catalog, &requirements)),
            Unmet::QueueRoles(QueueRoles::DEDICATED_COMPUTE)
        );

        // Only requested: accepted, no bonus.
        let requirements = RequirementSet::new().request_flags(QueueRoles::DEDICATED_COMPUTE);
        let selection = run(&catalog, &requirements).unwrap();
        assert!(!selection.flags.contains(SelectionFlags::DEDICATED_COMPUTE));
    }

    #[test]
    fn scoring_is_monotonic() {
        let requirements = RequirementSet::new()
            .request_extension("VK_EXT_mesh_shader")
            .request_features(CoreFeatures::SHADER_INT64)
            .request_memory(6 * GB)
            .request_flags(QueueRoles::DEDICATED_COMPUTE);

        let base = gpu("base", DeviceType::Integrated);
        let mut previous = run(&base, &requirements).unwrap().score;

        let richer = [
            base.clone().with_extensions(["VK_EXT_mesh_shader"]),
            base.clone()
                .with_extensions(["VK_EXT_mesh_shader"])
                .with_features(CoreFeatures::SHADER_INT64.into()),
            base.clone()
                .with_extensions(["VK_EXT_mesh_shader"])
                .with_features(CoreFeatures::SHADER_INT64.into())
                .with_queue_family(QueueFamily::new(1, C)),
        ];
        for catalog in &richer {
            let score = run(catalog, &requirements).unwrap().score;
            assert!(score >= previous, "{score} < {previous}");
            previous = score;
        }

        let defaults = ScoreWeights::default();
        assert_eq!(
            previous,
            defaults.requested_extension
                + defaults.requested_feature
                + defaults.requested_memory
                + defaults.dedicated_queue
        );
    }

    #[test]
    fn preferred_type_dominates_default_weights() {
        let requirements = RequirementSet::new()
            .prefer_type(DeviceType::Discrete)
            .request_extension("VK_EXT_mesh_shader");

        let discrete = run(&gpu("d", DeviceType::Discrete), &requirements).unwrap();
        let integrated = run(
            &gpu("i", DeviceType::Integrated).with_extensions(["VK_EXT_mesh_shader"]),
            &requirements,
        )
        .unwrap();

        assert!(discrete.flags.contains(SelectionFlags::PREFERRED_TYPE));
        assert!(discrete.score > integrated.score);
    }

    #[test]
    fn resolved_extensions_keep_declaration_order() {
        let catalog = gpu("mac", DeviceType::Integrated)
            .with_extensions(["VK_KHR_b", "VK_KHR_a", PORTABILITY_SUBSET]);
        let requirements = RequirementSet::new()
            .require_extension("VK_KHR_b")
            .request_extension("VK_KHR_a")
            .request_extension("VK_KHR_absent")
            .request_extension("VK_KHR_a");

        let selection = run(&catalog, &requirements).unwrap();
        assert_eq!(
            selection.extensions,
            vec!["VK_KHR_b", "VK_KHR_a", PORTABILITY_SUBSET]
        );
        assert!(selection.flags.contains(SelectionFlags::PORTABILITY_SUBSET));
        assert_eq!(selection.score, ScoreWeights::default().requested_extension);
    }
}
