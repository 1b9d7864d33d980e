//! Logical device creation from a negotiated selection.

use std::ffi::CString;

use ash::vk;

use crate::error::{GpuError, Result};
use crate::features::{DeviceFeatures, FeatureChain};
use crate::negotiate::Selection;
use crate::queues::QueueAssignment;
use crate::requirements::QueueRoles;
use crate::teardown::TeardownLedger;

/// A logical device and the queues it was created with.
///
/// Destruction is registered with the ledger passed to [`create_device`].
pub struct LogicalDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    assignment: QueueAssignment,
    queues: Vec<(u32, vk::Queue)>,
    extensions: Vec<String>,
    features: DeviceFeatures,
}

impl LogicalDevice {
    /// Get the Vulkan device handle.
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device this device was created on.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue families chosen for each role.
    pub fn assignment(&self) -> &QueueAssignment {
        &self.assignment
    }

    /// Queue family assigned to a role.
    pub fn queue_family(&self, role: QueueRoles) -> Option<u32> {
        self.assignment.index(role)
    }

    /// Queue serving a role, if the role received a family.
    pub fn queue(&self, role: QueueRoles) -> Option<vk::Queue> {
        let family = self.queue_family(role)?;
        self.queues
            .iter()
            .find(|(index, _)| *index == family)
            .map(|&(_, queue)| queue)
    }

    /// Extensions the device was created with.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Features the device was created with.
    pub fn features(&self) -> &DeviceFeatures {
        &self.features
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }

    /// Wait for the device to go idle, then run every pending teardown.
    ///
    /// Returns the number of teardown actions that failed.
    pub fn shutdown(&self, ledger: &mut TeardownLedger) -> Result<usize> {
        self.wait_idle()?;
        Ok(ledger.flush())
    }
}

/// Create a logical device from a selection.
///
/// One queue is created per distinct assigned family. Device destruction is
/// pushed onto `ledger`.
///
/// # Safety
/// The instance must be valid and `selection` must come from a provider over
/// that instance.
pub unsafe fn create_device(
    instance: &ash::Instance,
    selection: &Selection<vk::PhysicalDevice>,
    ledger: &mut TeardownLedger,
) -> Result<LogicalDevice> {
    let families = selection.queues.unique_families();
    if families.is_empty() {
        return Err(GpuError::Configuration(format!(
            "{} has no assigned queue family",
            selection.name()
        )));
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = selection
        .extensions
        .iter()
        .map(|name| {
            CString::new(name.as_str()).map_err(|_| {
                GpuError::Configuration(format!("extension name {name:?} contains NUL"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let extension_names: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut chain = FeatureChain::new(selection.features);
    let mut features2 = chain.features2();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(selection.handle, &device_create_info, None)?;

    let queues = families
        .iter()
        .map(|&family| (family, device.get_device_queue(family, 0)))
        .collect();

    let raw_device = device.clone();
    ledger.push(format!("device {}", selection.name()), move || {
        unsafe { raw_device.destroy_device(None) };
        Ok(())
    });

    tracing::info!(
        "Created device on {} with families {:?} and {} extension(s)",
        selection.name(),
        families,
        selection.extensions.len(),
    );

    Ok(LogicalDevice {
        device,
        physical_device: selection.handle,
        assignment: selection.queues.clone(),
        queues,
        extensions: selection.extensions.clone(),
        features: selection.features,
    })
}
