//! Device feature bits, tiered by the Vulkan version that introduced them.

use std::fmt;

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Vulkan 1.0 core features (`VkPhysicalDeviceFeatures`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoreFeatures: u64 {
        const ROBUST_BUFFER_ACCESS = 1 << 0;
        const FULL_DRAW_INDEX_UINT32 = 1 << 1;
        const IMAGE_CUBE_ARRAY = 1 << 2;
        const INDEPENDENT_BLEND = 1 << 3;
        const GEOMETRY_SHADER = 1 << 4;
        const TESSELLATION_SHADER = 1 << 5;
        const SAMPLE_RATE_SHADING = 1 << 6;
        const DUAL_SRC_BLEND = 1 << 7;
        const LOGIC_OP = 1 << 8;
        const MULTI_DRAW_INDIRECT = 1 << 9;
        const DRAW_INDIRECT_FIRST_INSTANCE = 1 << 10;
        const DEPTH_CLAMP = 1 << 11;
        const DEPTH_BIAS_CLAMP = 1 << 12;
        const FILL_MODE_NON_SOLID = 1 << 13;
        const DEPTH_BOUNDS = 1 << 14;
        const WIDE_LINES = 1 << 15;
        const LARGE_POINTS = 1 << 16;
        const ALPHA_TO_ONE = 1 << 17;
        const MULTI_VIEWPORT = 1 << 18;
        const SAMPLER_ANISOTROPY = 1 << 19;
        const TEXTURE_COMPRESSION_ETC2 = 1 << 20;
        const TEXTURE_COMPRESSION_ASTC_LDR = 1 << 21;
        const TEXTURE_COMPRESSION_BC = 1 << 22;
        const OCCLUSION_QUERY_PRECISE = 1 << 23;
        const PIPELINE_STATISTICS_QUERY = 1 << 24;
        const VERTEX_PIPELINE_STORES_AND_ATOMICS = 1 << 25;
        const FRAGMENT_STORES_AND_ATOMICS = 1 << 26;
        const SHADER_IMAGE_GATHER_EXTENDED = 1 << 27;
        const SHADER_STORAGE_IMAGE_EXTENDED_FORMATS = 1 << 28;
        const SHADER_STORAGE_IMAGE_MULTISAMPLE = 1 << 29;
        const SHADER_CLIP_DISTANCE = 1 << 30;
        const SHADER_CULL_DISTANCE = 1 << 31;
        const SHADER_FLOAT64 = 1 << 32;
        const SHADER_INT64 = 1 << 33;
        const SHADER_INT16 = 1 << 34;
        const SPARSE_BINDING = 1 << 35;
        const VARIABLE_MULTISAMPLE_RATE = 1 << 36;
        const INHERITED_QUERIES = 1 << 37;
    }
}

bitflags! {
    /// Features promoted to core in Vulkan 1.1 (`VkPhysicalDeviceVulkan11Features`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Vulkan11Features: u32 {
        const STORAGE_BUFFER_16BIT_ACCESS = 1 << 0;
        const UNIFORM_AND_STORAGE_BUFFER_16BIT_ACCESS = 1 << 1;
        const STORAGE_PUSH_CONSTANT_16 = 1 << 2;
        const MULTIVIEW = 1 << 3;
        const VARIABLE_POINTERS_STORAGE_BUFFER = 1 << 4;
        const VARIABLE_POINTERS = 1 << 5;
        const PROTECTED_MEMORY = 1 << 6;
        const SAMPLER_YCBCR_CONVERSION = 1 << 7;
        const SHADER_DRAW_PARAMETERS = 1 << 8;
    }
}

bitflags! {
    /// Features promoted to core in Vulkan 1.2 (`VkPhysicalDeviceVulkan12Features`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Vulkan12Features: u32 {
        const SAMPLER_MIRROR_CLAMP_TO_EDGE = 1 << 0;
        const DRAW_INDIRECT_COUNT = 1 << 1;
        const STORAGE_BUFFER_8BIT_ACCESS = 1 << 2;
        const SHADER_BUFFER_INT64_ATOMICS = 1 << 3;
        const SHADER_FLOAT16 = 1 << 4;
        const SHADER_INT8 = 1 << 5;
        const DESCRIPTOR_INDEXING = 1 << 6;
        const SHADER_SAMPLED_IMAGE_ARRAY_NON_UNIFORM_INDEXING = 1 << 7;
        const DESCRIPTOR_BINDING_PARTIALLY_BOUND = 1 << 8;
        const DESCRIPTOR_BINDING_VARIABLE_DESCRIPTOR_COUNT = 1 << 9;
        const RUNTIME_DESCRIPTOR_ARRAY = 1 << 10;
        const SAMPLER_FILTER_MINMAX = 1 << 11;
        const SCALAR_BLOCK_LAYOUT = 1 << 12;
        const IMAGELESS_FRAMEBUFFER = 1 << 13;
        const UNIFORM_BUFFER_STANDARD_LAYOUT = 1 << 14;
        const SEPARATE_DEPTH_STENCIL_LAYOUTS = 1 << 15;
        const HOST_QUERY_RESET = 1 << 16;
        const TIMELINE_SEMAPHORE = 1 << 17;
        const BUFFER_DEVICE_ADDRESS = 1 << 18;
        const VULKAN_MEMORY_MODEL = 1 << 19;
        const SHADER_OUTPUT_VIEWPORT_INDEX = 1 << 20;
        const SHADER_OUTPUT_LAYER = 1 << 21;
    }
}

bitflags! {
    /// Features promoted to core in Vulkan 1.3 (`VkPhysicalDeviceVulkan13Features`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Vulkan13Features: u32 {
        const ROBUST_IMAGE_ACCESS = 1 << 0;
        const INLINE_UNIFORM_BLOCK = 1 << 1;
        const PIPELINE_CREATION_CACHE_CONTROL = 1 << 2;
        const PRIVATE_DATA = 1 << 3;
        const SHADER_DEMOTE_TO_HELPER_INVOCATION = 1 << 4;
        const SHADER_TERMINATE_INVOCATION = 1 << 5;
        const SUBGROUP_SIZE_CONTROL = 1 << 6;
        const COMPUTE_FULL_SUBGROUPS = 1 << 7;
        const SYNCHRONIZATION2 = 1 << 8;
        const SHADER_ZERO_INITIALIZE_WORKGROUP_MEMORY = 1 << 9;
        const DYNAMIC_RENDERING = 1 << 10;
        const SHADER_INTEGER_DOT_PRODUCT = 1 << 11;
        const MAINTENANCE4 = 1 << 12;
    }
}

/// Maps each flag of a tier to the matching `vk::Bool32` field of its ash struct.
macro_rules! vk_feature_fields {
    ($flags:ty, $vk:ty { $($flag:ident => $field:ident),* $(,)? }) => {
        impl $flags {
            /// Read the enabled bits from the Vulkan struct.
            pub fn from_vk(features: &$vk) -> Self {
                let mut flags = Self::empty();
                $(
                    if features.$field == vk::TRUE {
                        flags |= Self::$flag;
                    }
                )*
                flags
            }

            /// Write these bits into the Vulkan struct.
            pub fn write_vk(self, features: &mut $vk) {
                $(
                    features.$field = vk::Bool32::from(self.contains(Self::$flag));
                )*
            }
        }
    };
}

vk_feature_fields!(CoreFeatures, vk::PhysicalDeviceFeatures {
    ROBUST_BUFFER_ACCESS => robust_buffer_access,
    FULL_DRAW_INDEX_UINT32 => full_draw_index_uint32,
    IMAGE_CUBE_ARRAY => image_cube_array,
    INDEPENDENT_BLEND => independent_blend,
    GEOMETRY_SHADER => geometry_shader,
    TESSELLATION_SHADER => tessellation_shader,
    SAMPLE_RATE_SHADING => sample_rate_shading,
    DUAL_SRC_BLEND => dual_src_blend,
    LOGIC_OP => logic_op,
    MULTI_DRAW_INDIRECT => multi_draw_indirect,
    DRAW_INDIRECT_FIRST_INSTANCE => draw_indirect_first_instance,
    DEPTH_CLAMP => depth_clamp,
    DEPTH_BIAS_CLAMP => depth_bias_clamp,
    FILL_MODE_NON_SOLID => fill_mode_non_solid,
    DEPTH_BOUNDS => depth_bounds,
    WIDE_LINES => wide_lines,
    LARGE_POINTS => large_points,
    ALPHA_TO_ONE => alpha_to_one,
    MULTI_VIEWPORT => multi_viewport,
    SAMPLER_ANISOTROPY => sampler_anisotropy,
    TEXTURE_COMPRESSION_ETC2 => texture_compression_etc2,
    TEXTURE_COMPRESSION_ASTC_LDR => texture_compression_astc_ldr,
    TEXTURE_COMPRESSION_BC => texture_compression_bc,
    OCCLUSION_QUERY_PRECISE => occlusion_query_precise,
    PIPELINE_STATISTICS_QUERY => pipeline_statistics_query,
    VERTEX_PIPELINE_STORES_AND_ATOMICS => vertex_pipeline_stores_and_atomics,
    FRAGMENT_STORES_AND_ATOMICS => fragment_stores_and_atomics,
    SHADER_IMAGE_GATHER_EXTENDED => shader_image_gather_extended,
    SHADER_STORAGE_IMAGE_EXTENDED_FORMATS => shader_storage_image_extended_formats,
    SHADER_STORAGE_IMAGE_MULTISAMPLE => shader_storage_image_multisample,
    SHADER_CLIP_DISTANCE => shader_clip_distance,
    SHADER_CULL_DISTANCE => shader_cull_distance,
    SHADER_FLOAT64 => shader_float64,
    SHADER_INT64 => shader_int64,
    SHADER_INT16 => shader_int16,
    SPARSE_BINDING => sparse_binding,
    VARIABLE_MULTISAMPLE_RATE => variable_multisample_rate,
    INHERITED_QUERIES => inherited_queries,
});

vk_feature_fields!(Vulkan11Features, vk::PhysicalDeviceVulkan11Features<'_> {
    STORAGE_BUFFER_16BIT_ACCESS => storage_buffer16_bit_access,
    UNIFORM_AND_STORAGE_BUFFER_16BIT_ACCESS => uniform_and_storage_buffer16_bit_access,
    STORAGE_PUSH_CONSTANT_16 => storage_push_constant16,
    MULTIVIEW => multiview,
    VARIABLE_POINTERS_STORAGE_BUFFER => variable_pointers_storage_buffer,
    VARIABLE_POINTERS => variable_pointers,
    PROTECTED_MEMORY => protected_memory,
    SAMPLER_YCBCR_CONVERSION => sampler_ycbcr_conversion,
    SHADER_DRAW_PARAMETERS => shader_draw_parameters,
});

vk_feature_fields!(Vulkan12Features, vk::PhysicalDeviceVulkan12Features<'_> {
    SAMPLER_MIRROR_CLAMP_TO_EDGE => sampler_mirror_clamp_to_edge,
    DRAW_INDIRECT_COUNT => draw_indirect_count,
    STORAGE_BUFFER_8BIT_ACCESS => storage_buffer8_bit_access,
    SHADER_BUFFER_INT64_ATOMICS => shader_buffer_int64_atomics,
    SHADER_FLOAT16 => shader_float16,
    SHADER_INT8 => shader_int8,
    DESCRIPTOR_INDEXING => descriptor_indexing,
    SHADER_SAMPLED_IMAGE_ARRAY_NON_UNIFORM_INDEXING => shader_sampled_image_array_non_uniform_indexing,
    DESCRIPTOR_BINDING_PARTIALLY_BOUND => descriptor_binding_partially_bound,
    DESCRIPTOR_BINDING_VARIABLE_DESCRIPTOR_COUNT => descriptor_binding_variable_descriptor_count,
    RUNTIME_DESCRIPTOR_ARRAY => runtime_descriptor_array,
    SAMPLER_FILTER_MINMAX => sampler_filter_minmax,
    SCALAR_BLOCK_LAYOUT => scalar_block_layout,
    IMAGELESS_FRAMEBUFFER => imageless_framebuffer,
    UNIFORM_BUFFER_STANDARD_LAYOUT => uniform_buffer_standard_layout,
    SEPARATE_DEPTH_STENCIL_LAYOUTS => separate_depth_stencil_layouts,
    HOST_QUERY_RESET => host_query_reset,
    TIMELINE_SEMAPHORE => timeline_semaphore,
    BUFFER_DEVICE_ADDRESS => buffer_device_address,
    VULKAN_MEMORY_MODEL => vulkan_memory_model,
    SHADER_OUTPUT_VIEWPORT_INDEX => shader_output_viewport_index,
    SHADER_OUTPUT_LAYER => shader_output_layer,
});

vk_feature_fields!(Vulkan13Features, vk::PhysicalDeviceVulkan13Features<'_> {
    ROBUST_IMAGE_ACCESS => robust_image_access,
    INLINE_UNIFORM_BLOCK => inline_uniform_block,
    PIPELINE_CREATION_CACHE_CONTROL => pipeline_creation_cache_control,
    PRIVATE_DATA => private_data,
    SHADER_DEMOTE_TO_HELPER_INVOCATION => shader_demote_to_helper_invocation,
    SHADER_TERMINATE_INVOCATION => shader_terminate_invocation,
    SUBGROUP_SIZE_CONTROL => subgroup_size_control,
    COMPUTE_FULL_SUBGROUPS => compute_full_subgroups,
    SYNCHRONIZATION2 => synchronization2,
    SHADER_ZERO_INITIALIZE_WORKGROUP_MEMORY => shader_zero_initialize_workgroup_memory,
    DYNAMIC_RENDERING => dynamic_rendering,
    SHADER_INTEGER_DOT_PRODUCT => shader_integer_dot_product,
    MAINTENANCE4 => maintenance4,
});

/// Feature bits across all API tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFeatures {
    pub core: CoreFeatures,
    pub vulkan11: Vulkan11Features,
    pub vulkan12: Vulkan12Features,
    pub vulkan13: Vulkan13Features,
}

impl Default for DeviceFeatures {
    fn default() -> Self {
        Self::empty()
    }
}

impl DeviceFeatures {
    /// No features.
    pub const fn empty() -> Self {
        Self {
            core: CoreFeatures::empty(),
            vulkan11: Vulkan11Features::empty(),
            vulkan12: Vulkan12Features::empty(),
            vulkan13: Vulkan13Features::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
            && self.vulkan11.is_empty()
            && self.vulkan12.is_empty()
            && self.vulkan13.is_empty()
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.core.contains(other.core)
            && self.vulkan11.contains(other.vulkan11)
            && self.vulkan12.contains(other.vulkan12)
            && self.vulkan13.contains(other.vulkan13)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            core: self.core | other.core,
            vulkan11: self.vulkan11 | other.vulkan11,
            vulkan12: self.vulkan12 | other.vulkan12,
            vulkan13: self.vulkan13 | other.vulkan13,
        }
    }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            core: self.core & other.core,
            vulkan11: self.vulkan11 & other.vulkan11,
            vulkan12: self.vulkan12 & other.vulkan12,
            vulkan13: self.vulkan13 & other.vulkan13,
        }
    }

    /// Bits set in `self` but not in `available`.
    #[must_use]
    pub fn difference(&self, available: &Self) -> Self {
        Self {
            core: self.core - available.core,
            vulkan11: self.vulkan11 - available.vulkan11,
            vulkan12: self.vulkan12 - available.vulkan12,
            vulkan13: self.vulkan13 - available.vulkan13,
        }
    }

    /// Total number of set bits.
    pub fn count(&self) -> u32 {
        self.core.bits().count_ones()
            + self.vulkan11.bits().count_ones()
            + self.vulkan12.bits().count_ones()
            + self.vulkan13.bits().count_ones()
    }
}

impl From<CoreFeatures> for DeviceFeatures {
    fn from(core: CoreFeatures) -> Self {
        Self {
            core,
            ..Self::empty()
        }
    }
}

impl From<Vulkan11Features> for DeviceFeatures {
    fn from(vulkan11: Vulkan11Features) -> Self {
        Self {
            vulkan11,
            ..Self::empty()
        }
    }
}

impl From<Vulkan12Features> for DeviceFeatures {
    fn from(vulkan12: Vulkan12Features) -> Self {
        Self {
            vulkan12,
            ..Self::empty()
        }
    }
}

impl From<Vulkan13Features> for DeviceFeatures {
    fn from(vulkan13: Vulkan13Features) -> Self {
        Self {
            vulkan13,
            ..Self::empty()
        }
    }
}

impl fmt::Display for DeviceFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .core
            .iter_names()
            .map(|(name, _)| name)
            .chain(self.vulkan11.iter_names().map(|(name, _)| name))
            .chain(self.vulkan12.iter_names().map(|(name, _)| name))
            .chain(self.vulkan13.iter_names().map(|(name, _)| name))
            .collect();

        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

/// Owned feature structs for device creation.
///
/// Tiers with no enabled bits are left out of the `pNext` chain so a device
/// that only speaks Vulkan 1.0 or 1.1 never sees a struct it does not know.
pub struct FeatureChain {
    enabled: DeviceFeatures,
    core: vk::PhysicalDeviceFeatures,
    vulkan11: vk::PhysicalDeviceVulkan11Features<'static>,
    vulkan12: vk::PhysicalDeviceVulkan12Features<'static>,
    vulkan13: vk::PhysicalDeviceVulkan13Features<'static>,
}

impl FeatureChain {
    pub fn new(enabled: DeviceFeatures) -> Self {
        let mut chain = Self {
            enabled,
            core: vk::PhysicalDeviceFeatures::default(),
            vulkan11: vk::PhysicalDeviceVulkan11Features::default(),
            vulkan12: vk::PhysicalDeviceVulkan12Features::default(),
            vulkan13: vk::PhysicalDeviceVulkan13Features::default(),
        };
        enabled.core.write_vk(&mut chain.core);
        enabled.vulkan11.write_vk(&mut chain.vulkan11);
        enabled.vulkan12.write_vk(&mut chain.vulkan12);
        enabled.vulkan13.write_vk(&mut chain.vulkan13);
        chain
    }

    /// Build the `VkPhysicalDeviceFeatures2` head for `VkDeviceCreateInfo::pNext`.
    pub fn features2(&mut self) -> vk::PhysicalDeviceFeatures2<'_> {
        let mut features2 = vk::PhysicalDeviceFeatures2::default().features(self.core);
        if !self.enabled.vulkan11.is_empty() {
            features2 = features2.push_next(&mut self.vulkan11);
        }
        if !self.enabled.vulkan12.is_empty() {
            features2 = features2.push_next(&mut self.vulkan12);
        }
        if !self.enabled.vulkan13.is_empty() {
            features2 = features2.push_next(&mut self.vulkan13);
        }
        features2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difference_reports_only_missing_bits() {
        let required = DeviceFeatures::from(CoreFeatures::GEOMETRY_SHADER)
            .union(&Vulkan13Features::DYNAMIC_RENDERING.into());
        let available =
            DeviceFeatures::from(CoreFeatures::GEOMETRY_SHADER | CoreFeatures::SHADER_INT64);

        let missing = required.difference(&available);
        assert_eq!(missing, Vulkan13Features::DYNAMIC_RENDERING.into());
        assert!(!available.contains(&required));
        assert_eq!(missing.to_string(), "DYNAMIC_RENDERING");
    }

    #[test]
    fn vk_struct_mapping() {
        let core = vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            shader_int64: vk::TRUE,
            ..Default::default()
        };
        let flags = CoreFeatures::from_vk(&core);
        assert_eq!(flags, CoreFeatures::GEOMETRY_SHADER | CoreFeatures::SHADER_INT64);

        let mut v12 = vk::PhysicalDeviceVulkan12Features::default();
        (Vulkan12Features::BUFFER_DEVICE_ADDRESS | Vulkan12Features::SCALAR_BLOCK_LAYOUT)
            .write_vk(&mut v12);
        assert_eq!(v12.buffer_device_address, vk::TRUE);
        assert_eq!(v12.scalar_block_layout, vk::TRUE);
        assert_eq!(v12.descriptor_indexing, vk::FALSE);
    }

    #[test]
    fn empty_features_display() {
        assert_eq!(DeviceFeatures::empty().to_string(), "none");
        assert_eq!(DeviceFeatures::default().count(), 0);
    }
}
