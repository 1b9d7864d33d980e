//! Synthetic catalogs shared by the unit tests.

use ash::vk;

use crate::catalog::{
    CandidateProperties, CapabilityCatalog, DeviceType, QueueFamily, SurfaceSupport,
};

pub(crate) const GB: u64 = 1024 * 1024 * 1024;

pub(crate) const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
pub(crate) const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
pub(crate) const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

/// A Vulkan 1.3 device with one all-purpose family and 8 GB of VRAM.
pub(crate) fn gpu(name: &str, device_type: DeviceType) -> CapabilityCatalog {
    CapabilityCatalog::new(CandidateProperties::new(
        name,
        device_type,
        vk::API_VERSION_1_3,
    ))
    .with_extensions(["VK_KHR_swapchain"])
    .with_heap(8 * GB, vk::MemoryHeapFlags::DEVICE_LOCAL)
    .with_heap(16 * GB, vk::MemoryHeapFlags::empty())
    .with_queue_family(QueueFamily::new(0, G | C | T).with_queue_count(16))
}

/// Surface support with sRGB and UNORM BGRA formats and FIFO/MAILBOX modes.
pub(crate) fn surface(min_image_count: u32, max_image_count: u32) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count,
            max_image_count,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        },
        formats: vec![
            format(vk::Format::B8G8R8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

pub(crate) fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
        format,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}
