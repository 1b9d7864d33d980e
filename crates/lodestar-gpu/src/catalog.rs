//! Per-candidate capability snapshots.

use std::collections::HashSet;

use ash::vk;

use crate::error::Result;
use crate::features::DeviceFeatures;
use crate::provider::HardwareQueryProvider;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Arm,
    Qualcomm,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            0x13B5 => Self::Arm,
            0x5143 => Self::Qualcomm,
            other => Self::Other(other),
        }
    }
}

/// Physical device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    #[default]
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceType {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => Self::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => Self::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => Self::Virtual,
            vk::PhysicalDeviceType::CPU => Self::Cpu,
            _ => Self::Other,
        }
    }
}

/// Identity and version information of a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateProperties {
    pub name: String,
    pub vendor: GpuVendor,
    pub device_type: DeviceType,
    /// Highest API version the device supports.
    pub api_version: u32,
    pub driver_version: u32,
}

impl CandidateProperties {
    pub fn new(name: impl Into<String>, device_type: DeviceType, api_version: u32) -> Self {
        Self {
            name: name.into(),
            vendor: GpuVendor::Other(0),
            device_type,
            api_version,
            driver_version: 0,
        }
    }
}

/// One queue family as reported by the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub queue_count: u32,
    pub flags: vk::QueueFlags,
    /// Can present to the bound surface. Always `false` without a surface.
    pub present: bool,
}

impl QueueFamily {
    pub fn new(index: u32, flags: vk::QueueFlags) -> Self {
        Self {
            index,
            queue_count: 1,
            flags,
            present: false,
        }
    }

    #[must_use]
    pub fn with_present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    #[must_use]
    pub fn with_queue_count(mut self, queue_count: u32) -> Self {
        self.queue_count = queue_count;
        self
    }
}

/// What the bound surface supports on a candidate.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats, in driver order.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Read-only snapshot of what one candidate supports.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    pub properties: CandidateProperties,
    pub extensions: HashSet<String>,
    pub features: DeviceFeatures,
    pub memory_heaps: Vec<vk::MemoryHeap>,
    pub queue_families: Vec<QueueFamily>,
    /// `None` when no surface is bound to the query.
    pub surface: Option<SurfaceSupport>,
}

impl CapabilityCatalog {
    /// Snapshot a candidate, calling each provider accessor exactly once.
    pub fn query<P: HardwareQueryProvider>(provider: &P, candidate: P::Candidate) -> Result<Self> {
        let properties = provider.properties(candidate)?;
        let extensions = provider.extensions(candidate)?;
        let features = provider.features(candidate, properties.api_version)?;
        let memory_heaps = provider.memory_heaps(candidate)?;
        let queue_families = provider.queue_families(candidate)?;
        let surface = provider.surface_support(candidate)?;

        Ok(Self {
            properties,
            extensions,
            features,
            memory_heaps,
            queue_families,
            surface,
        })
    }

    /// An empty catalog for the given candidate; fill it with the `with_*` setters.
    pub fn new(properties: CandidateProperties) -> Self {
        Self {
            properties,
            extensions: HashSet::new(),
            features: DeviceFeatures::empty(),
            memory_heaps: Vec::new(),
            queue_families: Vec::new(),
            surface: None,
        }
    }

    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions.extend(extensions.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: DeviceFeatures) -> Self {
        self.features = self.features.union(&features);
        self
    }

    #[must_use]
    pub fn with_heap(mut self, size: u64, flags: vk::MemoryHeapFlags) -> Self {
        self.memory_heaps.push(vk::MemoryHeap { size, flags });
        self
    }

    #[must_use]
    pub fn with_queue_family(mut self, family: QueueFamily) -> Self {
        self.queue_families.push(family);
        self
    }

    #[must_use]
    pub fn with_surface(mut self, surface: SurfaceSupport) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn name(&self) -> &str {
        &self.properties.name
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Size of the largest device-local heap in bytes.
    pub fn largest_device_local_heap(&self) -> u64 {
        self.memory_heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .max()
            .unwrap_or(0)
    }

    /// Total device-local memory in MB.
    pub fn device_local_memory_mb(&self) -> u64 {
        self.memory_heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum()
    }

    /// Get a human-readable summary of the candidate.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.properties.name,
            self.properties.vendor,
            self.properties.device_type,
            vk::api_version_major(self.properties.api_version),
            vk::api_version_minor(self.properties.api_version),
            vk::api_version_patch(self.properties.api_version),
            self.device_local_memory_mb(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn device_type_from_vk() {
        assert_eq!(
            DeviceType::from(vk::PhysicalDeviceType::DISCRETE_GPU),
            DeviceType::Discrete
        );
        assert_eq!(DeviceType::from(vk::PhysicalDeviceType::CPU), DeviceType::Cpu);
        assert_eq!(DeviceType::from(vk::PhysicalDeviceType::OTHER), DeviceType::Other);
    }

    #[test]
    fn heap_accounting_ignores_host_heaps() {
        let catalog = CapabilityCatalog::new(CandidateProperties::new(
            "RTX",
            DeviceType::Discrete,
            vk::API_VERSION_1_3,
        ))
        .with_heap(8 * GB, vk::MemoryHeapFlags::DEVICE_LOCAL)
        .with_heap(32 * GB, vk::MemoryHeapFlags::empty())
        .with_heap(256 * 1024 * 1024, vk::MemoryHeapFlags::DEVICE_LOCAL);

        assert_eq!(catalog.largest_device_local_heap(), 8 * GB);
        assert_eq!(catalog.device_local_memory_mb(), 8 * 1024 + 256);
        assert_eq!(
            catalog.summary(),
            "RTX (Other(0), Discrete) - Vulkan 1.3.0 - 8448 MB VRAM"
        );
    }
}
