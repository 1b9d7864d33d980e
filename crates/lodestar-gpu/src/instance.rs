//! Vulkan instance creation.

use std::collections::HashSet;
use std::ffi::{c_void, CStr, CString};

use ash::vk;

use crate::error::{GpuError, Result, Unmet};
use crate::teardown::TeardownLedger;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Instance-level versions, extensions and layers the loader reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSnapshot {
    /// Highest instance API version the loader supports.
    pub api_version: u32,
    pub extensions: HashSet<String>,
    pub layers: HashSet<String>,
}

impl LoaderSnapshot {
    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn supports_layer(&self, name: &str) -> bool {
        self.layers.contains(name)
    }
}

/// A loaded Vulkan entry and its snapshot, taken once.
pub struct InstanceContext {
    entry: ash::Entry,
    snapshot: LoaderSnapshot,
}

impl InstanceContext {
    /// Load the system Vulkan library and snapshot it.
    pub fn load() -> Result<Self> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;
        Self::from_entry(entry)
    }

    /// Snapshot an already loaded entry.
    pub fn from_entry(entry: ash::Entry) -> Result<Self> {
        let api_version = unsafe { entry.try_enumerate_instance_version()? }
            .unwrap_or(vk::API_VERSION_1_0);

        let extensions = unsafe { entry.enumerate_instance_extension_properties(None)? }
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok().map(c_str_to_string))
            .collect();

        let layers = unsafe { entry.enumerate_instance_layer_properties()? }
            .iter()
            .filter_map(|layer| layer.layer_name_as_c_str().ok().map(c_str_to_string))
            .collect();

        Ok(Self {
            entry,
            snapshot: LoaderSnapshot {
                api_version,
                extensions,
                layers,
            },
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn snapshot(&self) -> &LoaderSnapshot {
        &self.snapshot
    }

    pub fn api_version(&self) -> u32 {
        self.snapshot.api_version
    }
}

fn c_str_to_string(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

/// How to treat the Khronos validation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLayers {
    Off,
    /// Enable when installed, otherwise warn and continue.
    Request,
    /// Fail instance creation when not installed.
    Require,
}

impl Default for ValidationLayers {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Request
        } else {
            Self::Off
        }
    }
}

/// A created instance and what it was created with.
pub struct Instance {
    pub handle: ash::Instance,
    /// Effective API version, capped at what the loader supports.
    pub api_version: u32,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

/// Builder for creating a Vulkan instance.
#[derive(Debug, Clone)]
pub struct InstanceBuilder {
    app_name: String,
    engine_name: String,
    api_version: u32,
    required_extensions: Vec<String>,
    requested_extensions: Vec<String>,
    validation: ValidationLayers,
    debug_messenger: bool,
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lodestar".to_string(),
            engine_name: "Lodestar".to_string(),
            api_version: vk::API_VERSION_1_3,
            required_extensions: Vec::new(),
            requested_extensions: Vec::new(),
            validation: ValidationLayers::default(),
            debug_messenger: cfg!(debug_assertions),
        }
    }
}

impl InstanceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = name.into();
        self
    }

    /// Desired API version; lowered to the loader's version when higher.
    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn require_extension(mut self, name: impl Into<String>) -> Self {
        self.required_extensions.push(name.into());
        self
    }

    pub fn request_extension(mut self, name: impl Into<String>) -> Self {
        self.requested_extensions.push(name.into());
        self
    }

    /// Set the validation layer policy.
    pub fn validation(mut self, validation: ValidationLayers) -> Self {
        self.validation = validation;
        self
    }

    /// Forward validation messages to `tracing`. Needs `VK_EXT_debug_utils`.
    pub fn debug_messenger(mut self, enable: bool) -> Self {
        self.debug_messenger = enable;
        self
    }

    /// Resolve the extension and layer lists against the loader snapshot.
    fn resolve(&self, loader: &LoaderSnapshot) -> Result<ResolvedInstance> {
        let mut extensions: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !extensions.iter().any(|ext| ext == name) {
                extensions.push(name.to_string());
            }
        };

        for name in &self.required_extensions {
            if name.trim().is_empty() {
                return Err(GpuError::Configuration(format!(
                    "extension name {name:?} is empty"
                )));
            }
            if !loader.supports_extension(name) {
                return Err(GpuError::unmet("instance", Unmet::Extension(name.clone())));
            }
            push(name);
        }

        for name in &self.requested_extensions {
            if loader.supports_extension(name) {
                push(name);
            } else {
                tracing::warn!("Instance extension {name} not available");
            }
        }

        let debug_utils = c_str_to_string(ash::ext::debug_utils::NAME);
        let debug_messenger = self.debug_messenger && loader.supports_extension(&debug_utils);
        if debug_messenger {
            push(&debug_utils);
        } else if self.debug_messenger {
            tracing::warn!("{debug_utils} not available, validation messages will not be logged");
        }

        let portability = c_str_to_string(ash::khr::portability_enumeration::NAME);
        let portability_enumeration = loader.supports_extension(&portability);
        if portability_enumeration {
            push(&portability);
        }

        let mut layers = Vec::new();
        match self.validation {
            ValidationLayers::Off => {}
            ValidationLayers::Request if !loader.supports_layer(VALIDATION_LAYER) => {
                tracing::warn!("Validation layer {VALIDATION_LAYER} not available");
            }
            ValidationLayers::Require if !loader.supports_layer(VALIDATION_LAYER) => {
                return Err(GpuError::unmet(
                    "instance",
                    Unmet::Layer(VALIDATION_LAYER.to_string()),
                ));
            }
            ValidationLayers::Request | ValidationLayers::Require => {
                layers.push(VALIDATION_LAYER.to_string());
            }
        }

        if self.api_version > loader.api_version {
            tracing::debug!(
                "Requested API {}.{} exceeds loader {}.{}, lowering",
                vk::api_version_major(self.api_version),
                vk::api_version_minor(self.api_version),
                vk::api_version_major(loader.api_version),
                vk::api_version_minor(loader.api_version),
            );
        }

        Ok(ResolvedInstance {
            api_version: self.api_version.min(loader.api_version),
            extensions,
            layers,
            debug_messenger,
            portability_enumeration,
        })
    }

    /// Create the instance, and its debug messenger when enabled.
    ///
    /// Destruction of both is pushed onto `ledger`.
    pub fn build(&self, ctx: &InstanceContext, ledger: &mut TeardownLedger) -> Result<Instance> {
        let resolved = self.resolve(&ctx.snapshot)?;

        let app_name = to_c_string(&self.app_name)?;
        let engine_name = to_c_string(&self.engine_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(resolved.api_version);

        let extensions = resolved
            .extensions
            .iter()
            .map(|name| to_c_string(name))
            .collect::<Result<Vec<_>>>()?;
        let extension_names: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let layers = resolved
            .layers
            .iter()
            .map(|name| to_c_string(name))
            .collect::<Result<Vec<_>>>()?;
        let layer_names: Vec<*const std::ffi::c_char> =
            layers.iter().map(|layer| layer.as_ptr()).collect();

        let create_flags = if resolved.portability_enumeration {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(create_flags);

        let handle = unsafe { ctx.entry.create_instance(&create_info, None)? };

        let raw_instance = handle.clone();
        ledger.push("instance", move || {
            unsafe { raw_instance.destroy_instance(None) };
            Ok(())
        });

        let debug_messenger = if resolved.debug_messenger {
            let loader = ash::ext::debug_utils::Instance::new(&ctx.entry, &handle);
            let messenger = unsafe { create_debug_messenger(&loader)? };
            ledger.push("debug messenger", move || {
                unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
                Ok(())
            });
            Some(messenger)
        } else {
            None
        };

        tracing::info!(
            "Created Vulkan {}.{} instance with {} extension(s), layers {:?}",
            vk::api_version_major(resolved.api_version),
            vk::api_version_minor(resolved.api_version),
            resolved.extensions.len(),
            resolved.layers,
        );

        Ok(Instance {
            handle,
            api_version: resolved.api_version,
            extensions: resolved.extensions,
            layers: resolved.layers,
            debug_messenger,
        })
    }
}

struct ResolvedInstance {
    api_version: u32,
    extensions: Vec<String>,
    layers: Vec<String>,
    debug_messenger: bool,
    portability_enumeration: bool,
}

fn to_c_string(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| GpuError::Configuration(format!("{name:?} contains NUL")))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{types:?}: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{types:?}: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", "{types:?}: {message}");
    } else {
        tracing::trace!(target: "vulkan", "{types:?}: {message}");
    }
    vk::FALSE
}

unsafe fn create_debug_messenger(
    loader: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    Ok(unsafe { loader.create_debug_utils_messenger(&create_info, None)? })
}
