//! Device requirements: what a candidate must have and what it should have.

use ash::vk;
use bitflags::bitflags;

use crate::catalog::DeviceType;
use crate::error::{GpuError, Result, Unmet};
use crate::features::DeviceFeatures;
use crate::negotiate::Selection;

bitflags! {
    /// Queue roles plus dedication/separation modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueRoles: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const PRESENT = 1 << 3;
        /// Compute on a family without graphics capability.
        const DEDICATED_COMPUTE = 1 << 4;
        /// Transfer on a family without graphics capability.
        const DEDICATED_TRANSFER = 1 << 5;
        /// Compute on a family other than the graphics one.
        const SEPARATE_COMPUTE = 1 << 6;
        /// Transfer on a family other than the graphics one.
        const SEPARATE_TRANSFER = 1 << 7;
    }
}

/// Score contributed by each satisfied preference.
///
/// Every weight is non-negative, so satisfying one more preference never
/// lowers a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    /// Device type matches the preferred one.
    pub preferred_type: u64,
    /// Per requested extension the candidate has.
    pub requested_extension: u64,
    /// Per requested feature bit the candidate has.
    pub requested_feature: u64,
    /// Largest device-local heap reaches the requested size.
    pub requested_memory: u64,
    /// Per requested queue role that received a family.
    pub requested_role: u64,
    /// Per requested dedicated queue found.
    pub dedicated_queue: u64,
    /// Per requested separate queue found.
    pub separate_queue: u64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            preferred_type: 1000,
            requested_extension: 10,
            requested_feature: 5,
            requested_memory: 50,
            requested_role: 10,
            dedicated_queue: 20,
            separate_queue: 10,
        }
    }
}

impl ScoreWeights {
    /// All weights zero: every eligible candidate ties and the first one wins.
    pub fn uniform() -> Self {
        Self {
            preferred_type: 0,
            requested_extension: 0,
            requested_feature: 0,
            requested_memory: 0,
            requested_role: 0,
            dedicated_queue: 0,
            separate_queue: 0,
        }
    }

    pub fn with_preferred_type(mut self, weight: u64) -> Self {
        self.preferred_type = weight;
        self
    }

    pub fn with_requested_extension(mut self, weight: u64) -> Self {
        self.requested_extension = weight;
        self
    }

    pub fn with_requested_feature(mut self, weight: u64) -> Self {
        self.requested_feature = weight;
        self
    }

    pub fn with_requested_memory(mut self, weight: u64) -> Self {
        self.requested_memory = weight;
        self
    }

    pub fn with_requested_role(mut self, weight: u64) -> Self {
        self.requested_role = weight;
        self
    }

    pub fn with_dedicated_queue(mut self, weight: u64) -> Self {
        self.dedicated_queue = weight;
        self
    }

    pub fn with_separate_queue(mut self, weight: u64) -> Self {
        self.separate_queue = weight;
        self
    }
}

/// Accumulated device constraints.
///
/// Every call adds to what was declared before. Requested lists keep
/// declaration order, which is the preference order downstream.
#[derive(Debug, Clone)]
pub struct RequirementSet {
    pub(crate) required_extensions: Vec<String>,
    pub(crate) requested_extensions: Vec<String>,
    pub(crate) required_features: DeviceFeatures,
    pub(crate) requested_features: DeviceFeatures,
    pub(crate) required_memory: u64,
    pub(crate) requested_memory: u64,
    pub(crate) required_roles: QueueRoles,
    pub(crate) requested_roles: QueueRoles,
    pub(crate) preferred_type: DeviceType,
    pub(crate) allow_any_type: bool,
    pub(crate) min_api_version: u32,
}

impl Default for RequirementSet {
    fn default() -> Self {
        Self {
            required_extensions: Vec::new(),
            requested_extensions: Vec::new(),
            required_features: DeviceFeatures::empty(),
            requested_features: DeviceFeatures::empty(),
            required_memory: 0,
            requested_memory: 0,
            required_roles: QueueRoles::GRAPHICS,
            requested_roles: QueueRoles::empty(),
            preferred_type: DeviceType::Discrete,
            allow_any_type: true,
            min_api_version: vk::API_VERSION_1_0,
        }
    }
}

impl RequirementSet {
    /// Create a requirement set that only requires a graphics queue.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_extension(mut self, name: impl Into<String>) -> Self {
        self.required_extensions.push(name.into());
        self
    }

    pub fn require_extensions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_extensions
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn request_extension(mut self, name: impl Into<String>) -> Self {
        self.requested_extensions.push(name.into());
        self
    }

    pub fn require_features(mut self, features: impl Into<DeviceFeatures>) -> Self {
        self.required_features = self.required_features.union(&features.into());
        self
    }

    pub fn request_features(mut self, features: impl Into<DeviceFeatures>) -> Self {
        self.requested_features = self.requested_features.union(&features.into());
        self
    }

    /// Require a device-local heap of at least `bytes`. The largest value declared wins.
    pub fn require_memory(mut self, bytes: u64) -> Self {
        self.required_memory = self.required_memory.max(bytes);
        self
    }

    /// Prefer a device-local heap of at least `bytes`. The largest value declared wins.
    pub fn request_memory(mut self, bytes: u64) -> Self {
        self.requested_memory = self.requested_memory.max(bytes);
        self
    }

    /// Replace the required queue roles.
    pub fn set_flags(mut self, roles: QueueRoles) -> Self {
        self.required_roles = roles;
        self
    }

    pub fn add_flags(mut self, roles: QueueRoles) -> Self {
        self.required_roles |= roles;
        self
    }

    pub fn remove_flags(mut self, roles: QueueRoles) -> Self {
        self.required_roles -= roles;
        self
    }

    /// Prefer these roles and modifiers without requiring them.
    pub fn request_flags(mut self, roles: QueueRoles) -> Self {
        self.requested_roles |= roles;
        self
    }

    pub fn prefer_type(mut self, device_type: DeviceType) -> Self {
        self.preferred_type = device_type;
        self
    }

    /// With `false`, a candidate that is not of the preferred type is rejected.
    pub fn allow_any_type(mut self, allow: bool) -> Self {
        self.allow_any_type = allow;
        self
    }

    /// Require at least this API version. The highest version declared wins.
    pub fn require_api_version(mut self, version: u32) -> Self {
        self.min_api_version = self.min_api_version.max(version);
        self
    }

    pub fn required_roles(&self) -> QueueRoles {
        self.required_roles
    }

    pub fn requested_roles(&self) -> QueueRoles {
        self.requested_roles
    }

    /// Roles and modifiers the classifier should try to honour.
    pub(crate) fn wanted_roles(&self) -> QueueRoles {
        self.required_roles | self.requested_roles
    }

    /// Required extensions, including those implied by the required roles.
    pub(crate) fn effective_required_extensions(&self) -> Vec<String> {
        let mut extensions = self.required_extensions.clone();
        if self.required_roles.contains(QueueRoles::PRESENT) {
            let swapchain = swapchain_extension_name();
            if !extensions.contains(&swapchain) {
                extensions.push(swapchain);
            }
        }
        extensions
    }

    /// Reject misuse before any hardware is queried.
    pub fn check(&self) -> Result<()> {
        if let Some(name) = self
            .required_extensions
            .iter()
            .chain(&self.requested_extensions)
            .find(|name| name.trim().is_empty())
        {
            return Err(GpuError::Configuration(format!(
                "extension name {name:?} is empty"
            )));
        }
        Ok(())
    }

    /// Check that a selection satisfies every Required item of this set.
    pub fn validate<C>(&self, selection: &Selection<C>) -> std::result::Result<(), Unmet> {
        if selection.properties.api_version < self.min_api_version {
            return Err(Unmet::ApiVersion {
                required: self.min_api_version,
                found: selection.properties.api_version,
            });
        }

        if !self.allow_any_type && selection.properties.device_type != self.preferred_type {
            return Err(Unmet::DeviceType {
                required: self.preferred_type,
                found: selection.properties.device_type,
            });
        }

        if let Some(missing) = self
            .effective_required_extensions()
            .into_iter()
            .find(|ext| !selection.extensions.contains(ext))
        {
            return Err(Unmet::Extension(missing));
        }

        let missing = self.required_features.difference(&selection.features);
        if !missing.is_empty() {
            return Err(Unmet::Features(missing));
        }

        if selection.device_local_memory < self.required_memory {
            return Err(Unmet::Memory {
                required: self.required_memory,
                available: selection.device_local_memory,
            });
        }

        let missing_roles = self.required_roles - selection.queues.satisfied_roles();
        if !missing_roles.is_empty() {
            return Err(Unmet::QueueRoles(missing_roles));
        }

        Ok(())
    }
}

pub(crate) fn swapchain_extension_name() -> String {
    ash::khr::swapchain::NAME.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{CoreFeatures, Vulkan12Features};

    #[test]
    fn builder_accumulates() {
        let set = RequirementSet::new()
            .require_extension("VK_KHR_a")
            .request_extension("VK_KHR_b")
            .require_extension("VK_KHR_c")
            .require_features(CoreFeatures::GEOMETRY_SHADER)
            .require_features(Vulkan12Features::BUFFER_DEVICE_ADDRESS)
            .require_memory(2 << 30)
            .require_memory(1 << 30)
            .request_memory(4 << 30)
            .require_api_version(vk::API_VERSION_1_3)
            .require_api_version(vk::API_VERSION_1_1);

        assert_eq!(set.required_extensions, vec!["VK_KHR_a", "VK_KHR_c"]);
        assert_eq!(set.requested_extensions, vec!["VK_KHR_b"]);
        assert_eq!(set.required_features.core, CoreFeatures::GEOMETRY_SHADER);
        assert_eq!(
            set.required_features.vulkan12,
            Vulkan12Features::BUFFER_DEVICE_ADDRESS
        );
        assert_eq!(set.required_memory, 2 << 30);
        assert_eq!(set.requested_memory, 4 << 30);
        assert_eq!(set.min_api_version, vk::API_VERSION_1_3);
    }

    #[test]
    fn role_flags() {
        let set = RequirementSet::new()
            .add_flags(QueueRoles::COMPUTE | QueueRoles::TRANSFER)
            .remove_flags(QueueRoles::TRANSFER)
            .request_flags(QueueRoles::DEDICATED_COMPUTE);
        assert_eq!(set.required_roles(), QueueRoles::GRAPHICS | QueueRoles::COMPUTE);
        assert_eq!(set.requested_roles(), QueueRoles::DEDICATED_COMPUTE);
        assert!(set.wanted_roles().contains(QueueRoles::DEDICATED_COMPUTE));

        let set = set.set_flags(QueueRoles::COMPUTE);
        assert_eq!(set.required_roles(), QueueRoles::COMPUTE);
    }

    #[test]
    fn present_implies_swapchain_extension() {
        let set = RequirementSet::new().add_flags(QueueRoles::PRESENT);
        assert_eq!(
            set.effective_required_extensions(),
            vec!["VK_KHR_swapchain".to_string()]
        );

        let set = RequirementSet::new()
            .require_extension("VK_KHR_swapchain")
            .add_flags(QueueRoles::PRESENT);
        assert_eq!(set.effective_required_extensions().len(), 1);
    }

    #[test]
    fn empty_extension_name_is_configuration_error() {
        let set = RequirementSet::new().request_extension("  ");
        assert!(matches!(set.check(), Err(GpuError::Configuration(_))));
        assert!(RequirementSet::new().check().is_ok());
    }

    #[test]
    fn weights_builder() {
        let weights = ScoreWeights::uniform()
            .with_preferred_type(7)
            .with_dedicated_queue(3);
        assert_eq!(weights.preferred_type, 7);
        assert_eq!(weights.dedicated_queue, 3);
        assert_eq!(weights.requested_extension, 0);
    }
}
