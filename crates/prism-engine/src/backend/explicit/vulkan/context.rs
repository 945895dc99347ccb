//! Instance, surface, device, queue and command pool.

use std::ffi::{CStr, c_void};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{Entry, vk};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::config::ExplicitConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let message = unsafe {
        let p = (*data).p_message;
        if p.is_null() { "".into() } else { CStr::from_ptr(p).to_string_lossy() }
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "vulkan", "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!(target: "vulkan", "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!(target: "vulkan", "{message}");
    } else {
        log::trace!(target: "vulkan", "{message}");
    }
    vk::FALSE
}

pub struct Context {
    _entry: Entry,
    pub instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub command_pool: vk::CommandPool,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// `minUniformBufferOffsetAlignment`.
    pub uniform_alignment: u64,
    /// `maxImageDimension2D`.
    pub max_image_dimension: u32,
    /// Line polygon mode is available.
    pub fill_mode_non_solid: bool,
    pub window: Arc<Window>,
}

impl Context {
    pub fn new(window: Arc<Window>, config: &ExplicitConfig) -> Result<Self> {
        // SAFETY: the loaded library outlives every object created from it;
        // `_entry` is dropped last.
        let entry = unsafe { Entry::load() }.context("failed to load the Vulkan loader")?;

        let display = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .context("surface extensions unavailable")?
            .to_vec();

        let validation = config.validation && has_validation_layer(&entry);
        if config.validation && !validation {
            log::warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        }
        let layers = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let app = vk::ApplicationInfo::default()
            .application_name(c"prism")
            .engine_name(c"prism")
            .api_version(vk::API_VERSION_1_1);
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .context("failed to create Vulkan instance")?;

        let debug = if validation {
            let loader = debug_utils::Instance::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    log::warn!("debug messenger unavailable: {err}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display, window_handle, None)
        } {
            Ok(surface) => surface,
            Err(err) => {
                destroy_instance(&instance, debug.as_ref());
                return Err(anyhow!(err).context("failed to create window surface"));
            }
        };

        let device_parts = pick_physical_device(&instance, &surface_loader, surface, config)
            .and_then(|(physical, family)| {
                create_device(&instance, physical, family).map(|(d, f)| (physical, family, d, f))
            });
        let (physical, queue_family, device, fill_mode_non_solid) = match device_parts {
            Ok(parts) => parts,
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(&instance, debug.as_ref());
                return Err(err);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into());
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical) };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                }
                destroy_instance(&instance, debug.as_ref());
                return Err(anyhow!(err).context("failed to create command pool"));
            }
        };

        log::info!(
            "Vulkan device: {device_name} ({:?}), validation {}",
            properties.device_type,
            if debug.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            physical,
            device,
            queue,
            swapchain_loader,
            command_pool,
            memory_properties,
            uniform_alignment: properties.limits.min_uniform_buffer_offset_alignment.max(1),
            max_image_dimension: properties.limits.max_image_dimension2_d,
            fill_mode_non_solid,
            window,
        })
    }

    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.surface)?
        })
    }

    pub fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical, self.surface)?
        })
    }

    pub fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical, self.surface)?
        })
    }

    /// Destroys everything in reverse creation order.
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        destroy_instance(&self.instance, self.debug.as_ref());
    }
}

fn destroy_instance(
    instance: &ash::Instance,
    debug: Option<&(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
) {
    unsafe {
        if let Some((loader, messenger)) = debug {
            loader.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }
}

fn has_validation_layer(entry: &Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER))
        })
        .unwrap_or(false)
}

/// A device with a graphics queue that can present to `surface` and supports
/// swapchains. Discrete GPUs win when `prefer_discrete_gpu` is set.
fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    config: &ExplicitConfig,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("failed to enumerate physical devices")?;

    let mut candidates = Vec::new();
    for physical in devices {
        let has_swapchain = unsafe { instance.enumerate_device_extension_properties(physical) }
            .map(|exts| {
                exts.iter()
                    .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME))
            })
            .unwrap_or(false);
        if !has_swapchain {
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(physical) };
        let family = families.iter().enumerate().find_map(|(i, family)| {
            let i = i as u32;
            let presents = unsafe {
                surface_loader.get_physical_device_surface_support(physical, i, surface)
            }
            .unwrap_or(false);
            (family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents).then_some(i)
        });
        if let Some(family) = family {
            let kind = unsafe { instance.get_physical_device_properties(physical) }.device_type;
            candidates.push((physical, family, kind));
        }
    }

    if candidates.is_empty() {
        bail!("no Vulkan device can present to this window");
    }
    let discrete = candidates
        .iter()
        .find(|(_, _, kind)| *kind == vk::PhysicalDeviceType::DISCRETE_GPU);
    let preferred = match discrete {
        Some(discrete) if config.prefer_discrete_gpu => discrete,
        _ => &candidates[0],
    };
    Ok((preferred.0, preferred.1))
}

fn create_device(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
    family: u32,
) -> Result<(ash::Device, bool)> {
    let supported = unsafe { instance.get_physical_device_features(physical) };
    let fill_mode_non_solid = supported.fill_mode_non_solid == vk::TRUE;
    if !fill_mode_non_solid {
        log::warn!("fillModeNonSolid unsupported; wireframe draws filled");
    }
    let features = vk::PhysicalDeviceFeatures::default().fill_mode_non_solid(fill_mode_non_solid);

    let priorities = [1.0];
    let queues = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(family)
        .queue_priorities(&priorities)];
    let extensions = [swapchain::NAME.as_ptr()];
    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queues)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical, &info, None) }
        .context("failed to create logical device")?;
    Ok((device, fill_mode_non_solid))
}
