//! GPU capability negotiation and resource lifecycle for Vulkan.
//!
//! This crate provides:
//! - Capability catalogs snapshotted through a hardware query provider
//! - Requirement sets with required and requested constraints
//! - Queue family classification with dedicated/separate queue detection
//! - Device and swapchain negotiation with scoring and fallbacks
//! - A LIFO teardown ledger for everything created from a selection

pub mod catalog;
pub mod device;
pub mod error;
pub mod features;
pub mod instance;
pub mod negotiate;
pub mod provider;
pub mod queues;
pub mod requirements;
pub mod selector;
pub mod swapchain;
pub mod teardown;

#[cfg(test)]
mod fixtures;

pub use catalog::{
    CandidateProperties, CapabilityCatalog, DeviceType, GpuVendor, QueueFamily, SurfaceSupport,
};
pub use device::{create_device, LogicalDevice};
pub use error::{GpuError, Result, Unmet};
pub use features::{
    CoreFeatures, DeviceFeatures, FeatureChain, Vulkan11Features, Vulkan12Features,
    Vulkan13Features,
};
pub use instance::{Instance, InstanceBuilder, InstanceContext, LoaderSnapshot, ValidationLayers};
pub use negotiate::{negotiate, Selection, SelectionFlags};
pub use provider::{AshProvider, HardwareQueryProvider, StaticProvider};
pub use queues::{classify, FamilyCapabilities, QueueAssignment};
pub use requirements::{QueueRoles, RequirementSet, ScoreWeights};
pub use selector::PhysicalDeviceSelector;
pub use swapchain::{
    negotiate_swapchain, Swapchain, SwapchainBuilder, SwapchainFlags, SwapchainRequirements,
    SwapchainSelection,
};
pub use teardown::TeardownLedger;
