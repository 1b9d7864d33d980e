//! GPU error types.

use ash::vk;
use thiserror::Error;

use crate::catalog::DeviceType;
use crate::features::DeviceFeatures;
use crate::requirements::QueueRoles;

/// The specific Required constraint a candidate failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unmet {
    /// API version below the required minimum.
    #[error("API version {} is below the required {}", version(.found), version(.required))]
    ApiVersion { required: u32, found: u32 },

    /// Device type differs from the preferred one and other types are not allowed.
    #[error("device type {found:?} is not the required {required:?}")]
    DeviceType {
        required: DeviceType,
        found: DeviceType,
    },

    /// A required extension is not available.
    #[error("missing extension {0}")]
    Extension(String),

    /// A required instance layer is not available.
    #[error("missing layer {0}")]
    Layer(String),

    /// Required feature bits the candidate does not report.
    #[error("missing features {0}")]
    Features(DeviceFeatures),

    /// Largest device-local heap is smaller than required.
    #[error("largest device-local heap has {available} bytes, {required} required")]
    Memory { required: u64, available: u64 },

    /// No queue family can serve these required roles.
    #[error("no queue family for {0:?}")]
    QueueRoles(QueueRoles),

    /// Surface support was required but the candidate has none bound.
    #[error("no surface support")]
    Surface,

    /// None of the allow-listed surface formats is supported.
    #[error("no allowed surface format is supported")]
    SurfaceFormat,

    /// None of the allow-listed present modes is supported.
    #[error("no allowed present mode is supported")]
    PresentMode,

    /// The required image count lies outside the reported bounds.
    #[error("image count {required} outside supported range {min}..={max}")]
    ImageCount { required: u32, min: u32, max: u32 },

    /// The surface does not support the requested image usage.
    #[error("image usage {0:?} not supported")]
    ImageUsage(vk::ImageUsageFlags),
}

fn version(v: &u32) -> String {
    format!("{}.{}", vk::api_version_major(*v), vk::api_version_minor(*v))
}

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error, preserved verbatim from the failing call.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// A candidate failed one Required constraint.
    #[error("{candidate} rejected: {reason}")]
    RequirementUnmet { candidate: String, reason: Unmet },

    /// Every candidate was rejected.
    #[error("No suitable GPU found ({} candidate(s) rejected)", .rejections.len())]
    NoEligibleCandidate { rejections: Vec<GpuError> },

    /// Caller misuse detected before any hardware query.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),
}

impl GpuError {
    /// Build a rejection for the named candidate.
    pub fn unmet(candidate: impl Into<String>, reason: Unmet) -> Self {
        Self::RequirementUnmet {
            candidate: candidate.into(),
            reason,
        }
    }

    /// The rejection reason, if this error is a requirement rejection.
    pub fn unmet_reason(&self) -> Option<&Unmet> {
        match self {
            Self::RequirementUnmet { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages() {
        let err = GpuError::unmet("llvmpipe", Unmet::Extension("VK_KHR_swapchain".into()));
        insta::assert_snapshot!(err.to_string(), @"llvmpipe rejected: missing extension VK_KHR_swapchain");

        let err = GpuError::unmet(
            "Radeon",
            Unmet::ApiVersion {
                required: vk::API_VERSION_1_3,
                found: vk::API_VERSION_1_1,
            },
        );
        insta::assert_snapshot!(err.to_string(), @"Radeon rejected: API version 1.1 is below the required 1.3");

        let err = GpuError::NoEligibleCandidate {
            rejections: vec![
                GpuError::unmet("a", Unmet::Surface),
                GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST),
            ],
        };
        insta::assert_snapshot!(err.to_string(), @"No suitable GPU found (2 candidate(s) rejected)");
    }

    #[test]
    fn unmet_reason_only_for_rejections() {
        let err = GpuError::unmet("a", Unmet::PresentMode);
        assert_eq!(err.unmet_reason(), Some(&Unmet::PresentMode));
        assert!(GpuError::Configuration("x".into()).unmet_reason().is_none());
    }
}
