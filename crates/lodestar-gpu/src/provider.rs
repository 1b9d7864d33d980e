//! Hardware query providers.
//!
//! The negotiation engine never talks to Vulkan directly; it reads candidates
//! through [`HardwareQueryProvider`]. [`AshProvider`] answers from a live
//! instance, [`StaticProvider`] replays previously captured catalogs.

use std::collections::HashSet;

use ash::vk;

use crate::catalog::{
    CandidateProperties, CapabilityCatalog, DeviceType, GpuVendor, QueueFamily, SurfaceSupport,
};
use crate::error::{GpuError, Result};
use crate::features::{
    CoreFeatures, DeviceFeatures, Vulkan11Features, Vulkan12Features, Vulkan13Features,
};

/// Read-only access to the candidates of one enumeration pass.
///
/// Each accessor is called at most once per candidate per pass.
pub trait HardwareQueryProvider {
    /// Non-owning candidate handle.
    type Candidate: Copy;

    fn enumerate_candidates(&self) -> Result<Vec<Self::Candidate>>;

    fn properties(&self, candidate: Self::Candidate) -> Result<CandidateProperties>;

    fn extensions(&self, candidate: Self::Candidate) -> Result<HashSet<String>>;

    /// Feature bits, limited to the tiers `api_version` covers.
    fn features(&self, candidate: Self::Candidate, api_version: u32) -> Result<DeviceFeatures>;

    fn memory_heaps(&self, candidate: Self::Candidate) -> Result<Vec<vk::MemoryHeap>>;

    /// Queue families with `present` filled in when a surface is bound.
    fn queue_families(&self, candidate: Self::Candidate) -> Result<Vec<QueueFamily>>;

    /// Surface support, or `None` when no surface is bound.
    fn surface_support(&self, candidate: Self::Candidate) -> Result<Option<SurfaceSupport>>;
}

/// A surface together with the loader used to query it.
#[derive(Clone, Copy)]
struct BoundSurface<'a> {
    loader: &'a ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

/// Provider backed by a live Vulkan instance.
pub struct AshProvider<'a> {
    instance: &'a ash::Instance,
    instance_api_version: u32,
    surface: Option<BoundSurface<'a>>,
}

impl<'a> AshProvider<'a> {
    /// Create a provider over an instance created with `instance_api_version`.
    ///
    /// # Safety
    /// The instance must be valid for the lifetime of the provider.
    pub unsafe fn new(instance: &'a ash::Instance, instance_api_version: u32) -> Self {
        Self {
            instance,
            instance_api_version,
            surface: None,
        }
    }

    /// Bind a surface so present support and surface capabilities are queried.
    ///
    /// # Safety
    /// The surface must be valid and belong to the provider's instance.
    #[must_use]
    pub unsafe fn with_surface(
        mut self,
        loader: &'a ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Self {
        self.surface = Some(BoundSurface { loader, surface });
        self
    }
}

fn version_at_least(version: u32, major: u32, minor: u32) -> bool {
    let found = (vk::api_version_major(version), vk::api_version_minor(version));
    found >= (major, minor)
}

impl HardwareQueryProvider for AshProvider<'_> {
    type Candidate = vk::PhysicalDevice;

    fn enumerate_candidates(&self) -> Result<Vec<vk::PhysicalDevice>> {
        Ok(unsafe { self.instance.enumerate_physical_devices()? })
    }

    fn properties(&self, candidate: vk::PhysicalDevice) -> Result<CandidateProperties> {
        let properties = unsafe { self.instance.get_physical_device_properties(candidate) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(CandidateProperties {
            name,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_type: DeviceType::from(properties.device_type),
            api_version: properties.api_version,
            driver_version: properties.driver_version,
        })
    }

    fn extensions(&self, candidate: vk::PhysicalDevice) -> Result<HashSet<String>> {
        let extensions = unsafe {
            self.instance
                .enumerate_device_extension_properties(candidate)?
        };

        Ok(extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect())
    }

    fn features(&self, candidate: vk::PhysicalDevice, api_version: u32) -> Result<DeviceFeatures> {
        // Features2 needs a 1.1 instance; the per-version structs need a 1.2 device.
        if !version_at_least(self.instance_api_version, 1, 1) {
            let core = unsafe { self.instance.get_physical_device_features(candidate) };
            return Ok(CoreFeatures::from_vk(&core).into());
        }

        let effective = api_version.min(self.instance_api_version);
        let has_1_2 = version_at_least(effective, 1, 2);
        let has_1_3 = version_at_least(effective, 1, 3);

        let mut vulkan11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default();
        if has_1_2 {
            features2 = features2.push_next(&mut vulkan11).push_next(&mut vulkan12);
        }
        if has_1_3 {
            features2 = features2.push_next(&mut vulkan13);
        }

        unsafe {
            self.instance
                .get_physical_device_features2(candidate, &mut features2);
        }
        let core = CoreFeatures::from_vk(&features2.features);

        let mut features = DeviceFeatures::from(core);
        if has_1_2 {
            features.vulkan11 = Vulkan11Features::from_vk(&vulkan11);
            features.vulkan12 = Vulkan12Features::from_vk(&vulkan12);
        }
        if has_1_3 {
            features.vulkan13 = Vulkan13Features::from_vk(&vulkan13);
        }
        Ok(features)
    }

    fn memory_heaps(&self, candidate: vk::PhysicalDevice) -> Result<Vec<vk::MemoryHeap>> {
        let memory = unsafe {
            self.instance
                .get_physical_device_memory_properties(candidate)
        };
        Ok(memory
            .memory_heaps
            .iter()
            .take(memory.memory_heap_count as usize)
            .copied()
            .collect())
    }

    fn queue_families(&self, candidate: vk::PhysicalDevice) -> Result<Vec<QueueFamily>> {
        let properties = unsafe {
            self.instance
                .get_physical_device_queue_family_properties(candidate)
        };

        properties
            .iter()
            .enumerate()
            .map(|(index, family)| -> Result<QueueFamily> {
                let index = index as u32;
                let present = match self.surface {
                    Some(bound) => unsafe {
                        bound.loader.get_physical_device_surface_support(
                            candidate,
                            index,
                            bound.surface,
                        )?
                    },
                    None => false,
                };
                Ok(QueueFamily {
                    index,
                    queue_count: family.queue_count,
                    flags: family.queue_flags,
                    present,
                })
            })
            .collect()
    }

    fn surface_support(&self, candidate: vk::PhysicalDevice) -> Result<Option<SurfaceSupport>> {
        let Some(bound) = self.surface else {
            return Ok(None);
        };

        unsafe {
            let capabilities = bound
                .loader
                .get_physical_device_surface_capabilities(candidate, bound.surface)?;
            let formats = bound
                .loader
                .get_physical_device_surface_formats(candidate, bound.surface)?;
            let present_modes = bound
                .loader
                .get_physical_device_surface_present_modes(candidate, bound.surface)?;

            Ok(Some(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            }))
        }
    }
}

/// Provider that replays captured catalogs. Candidates are catalog indices.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    catalogs: Vec<CapabilityCatalog>,
}

impl StaticProvider {
    pub fn new(catalogs: Vec<CapabilityCatalog>) -> Self {
        Self { catalogs }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: CapabilityCatalog) -> Self {
        self.catalogs.push(catalog);
        self
    }

    fn catalog(&self, candidate: usize) -> Result<&CapabilityCatalog> {
        self.catalogs
            .get(candidate)
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
    }
}

impl HardwareQueryProvider for StaticProvider {
    type Candidate = usize;

    fn enumerate_candidates(&self) -> Result<Vec<usize>> {
        Ok((0..self.catalogs.len()).collect())
    }

    fn properties(&self, candidate: usize) -> Result<CandidateProperties> {
        Ok(self.catalog(candidate)?.properties.clone())
    }

    fn extensions(&self, candidate: usize) -> Result<HashSet<String>> {
        Ok(self.catalog(candidate)?.extensions.clone())
    }

    fn features(&self, candidate: usize, _api_version: u32) -> Result<DeviceFeatures> {
        Ok(self.catalog(candidate)?.features)
    }

    fn memory_heaps(&self, candidate: usize) -> Result<Vec<vk::MemoryHeap>> {
        Ok(self.catalog(candidate)?.memory_heaps.clone())
    }

    fn queue_families(&self, candidate: usize) -> Result<Vec<QueueFamily>> {
        Ok(self.catalog(candidate)?.queue_families.clone())
    }

    fn surface_support(&self, candidate: usize) -> Result<Option<SurfaceSupport>> {
        Ok(self.catalog(candidate)?.surface.clone())
    }
}
