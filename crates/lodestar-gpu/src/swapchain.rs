//! Swapchain negotiation and creation.

use ash::vk;
use bitflags::bitflags;

use crate::catalog::SurfaceSupport;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, Unmet};
use crate::provider::HardwareQueryProvider;
use crate::requirements::QueueRoles;
use crate::teardown::TeardownLedger;

/// Format accepted when the surface reports a single `UNDEFINED` entry and
/// nothing was requested.
const DEFAULT_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

const COMPOSITE_ALPHA_FALLBACK: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

/// Swapchain constraints.
///
/// Requested items are preferences in declaration order; allow-lists restrict
/// what may be chosen at all.
#[derive(Debug, Clone)]
pub struct SwapchainRequirements {
    requested_formats: Vec<vk::SurfaceFormatKHR>,
    allowed_formats: Vec<vk::SurfaceFormatKHR>,
    requested_present_modes: Vec<vk::PresentModeKHR>,
    allowed_present_modes: Option<Vec<vk::PresentModeKHR>>,
    requested_image_count: Option<u32>,
    required_image_count: Option<u32>,
    extent: vk::Extent2D,
    image_usage: vk::ImageUsageFlags,
    composite_alpha: Option<vk::CompositeAlphaFlagsKHR>,
}

impl Default for SwapchainRequirements {
    fn default() -> Self {
        Self {
            requested_formats: Vec::new(),
            allowed_formats: Vec::new(),
            requested_present_modes: Vec::new(),
            allowed_present_modes: None,
            requested_image_count: None,
            required_image_count: None,
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            composite_alpha: None,
        }
    }
}

impl SwapchainRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_surface_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.requested_formats.push(format);
        self
    }

    /// Restrict the formats that may be chosen. An empty allow-list allows any.
    pub fn allow_surface_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.allowed_formats.push(format);
        self
    }

    pub fn request_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.requested_present_modes.push(mode);
        self
    }

    pub fn allow_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.allowed_present_modes
            .get_or_insert_with(Vec::new)
            .push(mode);
        self
    }

    /// Replace the present-mode allow-list. Passing an empty list is a
    /// configuration error reported by [`check`](Self::check).
    pub fn allow_present_modes(
        mut self,
        modes: impl IntoIterator<Item = vk::PresentModeKHR>,
    ) -> Self {
        self.allowed_present_modes = Some(modes.into_iter().collect());
        self
    }

    /// Preferred image count, clamped into the surface limits.
    pub fn request_image_count(mut self, count: u32) -> Self {
        self.requested_image_count = Some(count);
        self
    }

    /// Exact image count; a surface that cannot provide it is rejected.
    pub fn require_image_count(mut self, count: u32) -> Self {
        self.required_image_count = Some(count);
        self
    }

    /// Extent used when the surface lets the swapchain pick its size.
    pub fn request_extent(mut self, width: u32, height: u32) -> Self {
        self.extent = vk::Extent2D { width, height };
        self
    }

    pub fn image_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.image_usage = usage;
        self
    }

    pub fn request_composite_alpha(mut self, alpha: vk::CompositeAlphaFlagsKHR) -> Self {
        self.composite_alpha = Some(alpha);
        self
    }

    /// Reject misuse before any surface is queried.
    pub fn check(&self) -> Result<()> {
        if self
            .allowed_present_modes
            .as_ref()
            .is_some_and(Vec::is_empty)
        {
            return Err(GpuError::Configuration(
                "present-mode allow-list is empty".into(),
            ));
        }
        if self.required_image_count == Some(0) {
            return Err(GpuError::Configuration(
                "required image count must be at least 1".into(),
            ));
        }
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(GpuError::Configuration(format!(
                "requested extent {}x{} is empty",
                self.extent.width, self.extent.height
            )));
        }
        Ok(())
    }

    fn format_allowed(&self, format: &vk::SurfaceFormatKHR) -> bool {
        self.allowed_formats.is_empty() || self.allowed_formats.contains(format)
    }

    fn present_mode_allowed(&self, mode: vk::PresentModeKHR) -> bool {
        self.allowed_present_modes
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&mode))
    }
}

bitflags! {
    /// Preferences a swapchain selection honoured without degrading.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SwapchainFlags: u32 {
        const REQUESTED_FORMAT = 1 << 0;
        const REQUESTED_PRESENT_MODE = 1 << 1;
        /// The requested image count fit the surface limits.
        const REQUESTED_IMAGE_COUNT = 1 << 2;
        /// The requested extent was used unclamped.
        const REQUESTED_EXTENT = 1 << 3;
        const REQUESTED_COMPOSITE_ALPHA = 1 << 4;
    }
}

/// Resolved swapchain configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapchainSelection {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub image_usage: vk::ImageUsageFlags,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub flags: SwapchainFlags,
}

/// Negotiate a swapchain configuration against what a surface supports.
pub fn negotiate_swapchain(
    support: &SurfaceSupport,
    requirements: &SwapchainRequirements,
) -> Result<SwapchainSelection> {
    requirements.check()?;
    resolve(support, requirements).map_err(|reason| GpuError::unmet("surface", reason))
}

fn resolve(
    support: &SurfaceSupport,
    requirements: &SwapchainRequirements,
) -> std::result::Result<SwapchainSelection, Unmet> {
    let caps = &support.capabilities;
    let mut flags = SwapchainFlags::empty();

    let missing_usage = requirements.image_usage & !caps.supported_usage_flags;
    if !missing_usage.is_empty() {
        return Err(Unmet::ImageUsage(missing_usage));
    }

    let (surface_format, exact) = choose_format(&support.formats, requirements)?;
    flags.set(SwapchainFlags::REQUESTED_FORMAT, exact);

    let (present_mode, exact) = choose_present_mode(&support.present_modes, requirements)?;
    flags.set(SwapchainFlags::REQUESTED_PRESENT_MODE, exact);

    let (image_count, exact) = choose_image_count(caps, requirements)?;
    flags.set(SwapchainFlags::REQUESTED_IMAGE_COUNT, exact);

    let extent = choose_extent(caps, requirements.extent);
    flags.set(SwapchainFlags::REQUESTED_EXTENT, extent == requirements.extent);

    let composite_alpha = match requirements.composite_alpha {
        Some(alpha) if caps.supported_composite_alpha.contains(alpha) => {
            flags |= SwapchainFlags::REQUESTED_COMPOSITE_ALPHA;
            alpha
        }
        _ => COMPOSITE_ALPHA_FALLBACK
            .into_iter()
            .find(|&alpha| caps.supported_composite_alpha.contains(alpha))
            .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE),
    };

    Ok(SwapchainSelection {
        surface_format,
        present_mode,
        image_count,
        extent,
        image_usage: requirements.image_usage,
        composite_alpha,
        pre_transform: caps.current_transform,
        flags,
    })
}

/// Pick a surface format. The flag tells whether a requested one was used.
fn choose_format(
    available: &[vk::SurfaceFormatKHR],
    requirements: &SwapchainRequirements,
) -> std::result::Result<(vk::SurfaceFormatKHR, bool), Unmet> {
    // The surface imposes no preference: take ours verbatim.
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            if let Some(&format) = requirements.requested_formats.first() {
                return Ok((format, true));
            }
            return Ok((
                requirements
                    .allowed_formats
                    .first()
                    .copied()
                    .unwrap_or(DEFAULT_FORMAT),
                false,
            ));
        }
    }

    if let Some(&format) = requirements
        .requested_formats
        .iter()
        .find(|f| available.contains(f) && requirements.format_allowed(f))
    {
        return Ok((format, true));
    }

    if let Some(&format) = requirements
        .allowed_formats
        .iter()
        .find(|f| available.contains(f))
    {
        return Ok((format, false));
    }

    if requirements.allowed_formats.is_empty() {
        if let Some(&format) = available.first() {
            return Ok((format, false));
        }
    }

    Err(Unmet::SurfaceFormat)
}

fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    requirements: &SwapchainRequirements,
) -> std::result::Result<(vk::PresentModeKHR, bool), Unmet> {
    if let Some(&mode) = requirements
        .requested_present_modes
        .iter()
        .find(|&&m| available.contains(&m) && requirements.present_mode_allowed(m))
    {
        return Ok((mode, true));
    }

    match &requirements.allowed_present_modes {
        Some(allowed) => allowed
            .iter()
            .find(|m| available.contains(m))
            .map(|&m| (m, false))
            .ok_or(Unmet::PresentMode),
        None => available
            .iter()
            .find(|&&m| m == vk::PresentModeKHR::FIFO)
            .or_else(|| available.first())
            .map(|&m| (m, false))
            .ok_or(Unmet::PresentMode),
    }
}

fn choose_image_count(
    caps: &vk::SurfaceCapabilitiesKHR,
    requirements: &SwapchainRequirements,
) -> std::result::Result<(u32, bool), Unmet> {
    let min = caps.min_image_count;
    // Zero means no upper limit.
    let max = if caps.max_image_count == 0 {
        u32::MAX
    } else {
        caps.max_image_count
    };

    if let Some(count) = requirements.required_image_count {
        if count < min || count > max {
            return Err(Unmet::ImageCount {
                required: count,
                min,
                max: caps.max_image_count,
            });
        }
        return Ok((count, true));
    }

    match requirements.requested_image_count {
        Some(count) => {
            let clamped = count.clamp(min, max);
            Ok((clamped, clamped == count))
        }
        None => Ok((min.saturating_add(1).min(max), false)),
    }
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: requested.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    }
}

/// Negotiates a swapchain for one candidate through a provider.
pub struct SwapchainBuilder<'p, P: HardwareQueryProvider> {
    provider: &'p P,
    candidate: P::Candidate,
    requirements: SwapchainRequirements,
}

impl<'p, P: HardwareQueryProvider> SwapchainBuilder<'p, P> {
    pub fn new(provider: &'p P, candidate: P::Candidate) -> Self {
        Self {
            provider,
            candidate,
            requirements: SwapchainRequirements::default(),
        }
    }

    pub fn with_requirements(mut self, requirements: SwapchainRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn request_surface_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.requirements = self.requirements.request_surface_format(format);
        self
    }

    pub fn allow_surface_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.requirements = self.requirements.allow_surface_format(format);
        self
    }

    pub fn request_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.requirements = self.requirements.request_present_mode(mode);
        self
    }

    pub fn allow_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.requirements = self.requirements.allow_present_mode(mode);
        self
    }

    pub fn allow_present_modes(
        mut self,
        modes: impl IntoIterator<Item = vk::PresentModeKHR>,
    ) -> Self {
        self.requirements = self.requirements.allow_present_modes(modes);
        self
    }

    pub fn request_image_count(mut self, count: u32) -> Self {
        self.requirements = self.requirements.request_image_count(count);
        self
    }

    pub fn require_image_count(mut self, count: u32) -> Self {
        self.requirements = self.requirements.require_image_count(count);
        self
    }

    pub fn request_extent(mut self, width: u32, height: u32) -> Self {
        self.requirements = self.requirements.request_extent(width, height);
        self
    }

    pub fn image_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.requirements = self.requirements.image_usage(usage);
        self
    }

    pub fn request_composite_alpha(mut self, alpha: vk::CompositeAlphaFlagsKHR) -> Self {
        self.requirements = self.requirements.request_composite_alpha(alpha);
        self
    }

    /// Query the surface and negotiate against it.
    pub fn build(&self) -> Result<SwapchainSelection> {
        self.requirements.check()?;

        let name = self.provider.properties(self.candidate)?.name;
        let support = self
            .provider
            .surface_support(self.candidate)?
            .ok_or_else(|| GpuError::unmet(&name, Unmet::Surface))?;

        let selection =
            resolve(&support, &self.requirements).map_err(|reason| GpuError::unmet(&name, reason))?;
        tracing::debug!(
            "Swapchain for {name}: {:?} {:?}, {} images, {}x{}",
            selection.surface_format.format,
            selection.present_mode,
            selection.image_count,
            selection.extent.width,
            selection.extent.height,
        );
        Ok(selection)
    }
}

/// A created swapchain and its image views.
///
/// Destruction is registered with the ledger passed to [`Swapchain::new`].
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain from a negotiated selection.
    ///
    /// Pass the previous swapchain as `old_swapchain` when recreating; it is
    /// retired, and stays registered with the ledger until flushed.
    ///
    /// # Safety
    /// The instance, device and surface must be valid, and the surface must be
    /// the one `selection` was negotiated against.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &LogicalDevice,
        surface: vk::SurfaceKHR,
        selection: &SwapchainSelection,
        old_swapchain: Option<vk::SwapchainKHR>,
        ledger: &mut TeardownLedger,
    ) -> Result<Self> {
        let graphics = device.queue_family(QueueRoles::GRAPHICS);
        let present = device.queue_family(QueueRoles::PRESENT);

        let shared_families: Vec<u32> = match (graphics, present) {
            (Some(g), Some(p)) if g != p => vec![g, p],
            _ => Vec::new(),
        };

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(selection.image_count)
            .image_format(selection.surface_format.format)
            .image_color_space(selection.surface_format.color_space)
            .image_extent(selection.extent)
            .image_array_layers(1)
            .image_usage(selection.image_usage)
            .pre_transform(selection.pre_transform)
            .composite_alpha(selection.composite_alpha)
            .present_mode(selection.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        create_info = if shared_families.is_empty() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&shared_families)
        };

        let loader = ash::khr::swapchain::Device::new(instance, device.handle());
        let handle = loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match loader.get_swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                loader.destroy_swapchain(handle, None);
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(selection.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            match device.handle().create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for &view in &image_views {
                        device.handle().destroy_image_view(view, None);
                    }
                    loader.destroy_swapchain(handle, None);
                    return Err(e.into());
                }
            }
        }

        let raw_device = device.handle().clone();
        let views = image_views.clone();
        ledger.push(format!("swapchain {handle:?}"), move || {
            unsafe {
                for &view in &views {
                    raw_device.destroy_image_view(view, None);
                }
                loader.destroy_swapchain(handle, None);
            }
            Ok(())
        });

        tracing::info!(
            "Created swapchain: {} images, {:?}, {}x{}",
            images.len(),
            selection.present_mode,
            selection.extent.width,
            selection.extent.height,
        );

        Ok(Self {
            handle,
            images,
            image_views,
            format: selection.surface_format.format,
            extent: selection.extent,
            present_mode: selection.present_mode,
        })
    }
}
