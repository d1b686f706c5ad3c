// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use lantern_render::RenderError;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback data struct for the call.
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else {
        tracing::debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// Prefers one family that does both; otherwise the first of each.
pub(crate) fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, q) in props.iter().enumerate() {
        let i = i as u32;
        if q.queue_count == 0 {
            continue;
        }
        let g = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let p = supports_present(i);
        if g && p {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if g && graphics.is_none() {
            graphics = Some(i);
        }
        if p && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

pub(crate) fn pick_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    wanted: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && mem.memory_types[i as usize].property_flags.contains(wanted)
    })
}

/// What the surface offers for a given physical device.
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Instance, surface, logical device, queues and the shared command pool.
/// Every GPU resource keeps an `Arc<Device>`, so this is destroyed last.
pub struct Device {
    _entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
}

impl Device {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
        validation: bool,
    ) -> Result<Arc<Self>> {
        // STRICT ORDER: instance, surface from this instance, then physical
        // device chosen against the surface, then the logical device.
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        unsafe {
            let entry = Entry::load().context("load Vulkan loader")?;
            let validation = validation && validation_layer_present(&entry);
            let instance = create_instance(&entry, dh, app_name, validation)?;

            let debug = if validation {
                let loader = debug_utils::Instance::new(&entry, &instance);
                let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                    s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                    message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    pfn_user_callback: Some(debug_callback),
                    ..Default::default()
                };
                let messenger = loader
                    .create_debug_utils_messenger(&ci, None)
                    .context("create_debug_utils_messenger")?;
                Some((loader, messenger))
            } else {
                None
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
                .context("ash_window::create_surface")?;

            let (phys, families) = pick_physical_device(&instance, &surface_loader, surface)?;
            let properties = instance.get_physical_device_properties(phys);
            let memory_properties = instance.get_physical_device_memory_properties(phys);
            let name = CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy();
            info!(
                "physical device: {name} (graphics family {}, present family {})",
                families.graphics, families.present
            );

            let device = create_logical_device(&instance, phys, families)?;
            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);
            let swapchain_loader = swapchain::Device::new(&instance, &device);

            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                queue_family_index: families.graphics,
                flags: vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .context("create_command_pool")?;

            Ok(Arc::new(Self {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                phys,
                properties,
                memory_properties,
                device,
                swapchain_loader,
                families,
                graphics_queue,
                present_queue,
                command_pool,
            }))
        }
    }

    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        unsafe { query_surface_support(&self.surface_loader, self.phys, self.surface) }
    }

    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> Result<u32> {
        pick_memory_type(&self.memory_properties, type_filter, properties).ok_or_else(|| {
            RenderError::NoSuitableMemoryType {
                type_filter,
                properties: format!("{properties:?}"),
            }
            .into()
        })
    }

    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        for &format in candidates {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.phys, format)
            };
            let supported = match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features,
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features,
                _ => vk::FormatFeatureFlags::empty(),
            };
            if supported.contains(features) {
                return Ok(format);
            }
        }
        Err(RenderError::NoSupportedFormat.into())
    }

    /// Raw buffer plus bound memory. Callers own both handles.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        unsafe {
            let bci = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            let buf = self.device.create_buffer(&bci, None).context("create_buffer")?;
            let req = self.device.get_buffer_memory_requirements(buf);
            let mem = release_on_err(self.allocate(req, properties), || {
                self.device.destroy_buffer(buf, None)
            })?;
            let bound = self.device.bind_buffer_memory(buf, mem, 0);
            release_on_err(bound, || {
                self.device.destroy_buffer(buf, None);
                self.device.free_memory(mem, None);
            })
            .context("bind_buffer_memory")?;
            Ok((buf, mem))
        }
    }

    pub fn create_image_with_info(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        unsafe {
            let image = self.device.create_image(info, None).context("create_image")?;
            let req = self.device.get_image_memory_requirements(image);
            let mem = release_on_err(self.allocate(req, properties), || {
                self.device.destroy_image(image, None)
            })?;
            let bound = self.device.bind_image_memory(image, mem, 0);
            release_on_err(bound, || {
                self.device.destroy_image(image, None);
                self.device.free_memory(mem, None);
            })
            .context("bind_image_memory")?;
            Ok((image, mem))
        }
    }

    unsafe fn allocate(
        &self,
        req: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, properties)?,
            ..Default::default()
        };
        Ok(unsafe { self.device.allocate_memory(&mai, None) }.context("allocate_memory")?)
    }

    /// Records `record` into a throwaway command buffer, submits it on the
    /// graphics queue and waits for completion.
    pub fn one_time_submit(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        unsafe {
            let ai = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: self.command_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let cmd = self.device.allocate_command_buffers(&ai)?[0];
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            let result = (|| -> Result<()> {
                self.device.begin_command_buffer(cmd, &bi)?;
                record(&self.device, cmd);
                self.device.end_command_buffer(cmd)?;
                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &cmd,
                    ..Default::default()
                };
                self.device
                    .queue_submit(self.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())?;
                self.device.queue_wait_idle(self.graphics_queue)?;
                Ok(())
            })();
            self.device
                .free_command_buffers(self.command_pool, std::slice::from_ref(&cmd));
            result.context("one-time command submit")
        }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        self.one_time_submit(|d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { d.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region)) };
        })
    }

    pub fn wait_idle(&self) -> Result<()> {
        let res = unsafe { self.device.device_wait_idle() };
        res.context("device_wait_idle")
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Runs `release` when `result` is an error, then hands the result back.
fn release_on_err<T, E>(result: Result<T, E>, release: impl FnOnce()) -> Result<T, E> {
    if result.is_err() {
        release();
    }
    result
}

unsafe fn validation_layer_present(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
    if !found {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed; continuing without");
    }
    found
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: raw_window_handle::RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<Instance> {
    let app = std::ffi::CString::new(app_name).unwrap_or_else(|_| c"lantern".to_owned());
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"lantern".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?)
}

unsafe fn query_surface_support(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceSupport> {
    unsafe {
        Ok(SurfaceSupport {
            capabilities: loader.get_physical_device_surface_capabilities(phys, surface)?,
            formats: loader.get_physical_device_surface_formats(phys, surface)?,
            present_modes: loader.get_physical_device_surface_present_modes(phys, surface)?,
        })
    }
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;
    info!("{} physical device(s) found", devices.len());
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let Some(families) = find_queue_families(&qprops, |i| unsafe {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        }) else {
            continue;
        };

        let exts = unsafe { instance.enumerate_device_extension_properties(phys) }?;
        let has_swapchain = exts
            .iter()
            .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == swapchain::NAME);
        if !has_swapchain {
            continue;
        }

        let support = unsafe { query_surface_support(surface_loader, phys, surface) }?;
        if support.formats.is_empty() || support.present_modes.is_empty() {
            continue;
        }
        return Ok((phys, families));
    }
    Err(RenderError::NoSuitableDevice.into())
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let unique: BTreeSet<u32> = [families.graphics, families.present].into_iter().collect();
    let qinfos: Vec<vk::DeviceQueueCreateInfo<'_>> = unique
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let supported = unsafe { instance.get_physical_device_features(phys) };
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: supported.sampler_anisotropy,
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    Ok(unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_a_family_that_does_both() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let f = find_queue_families(&props, |i| i != 0).unwrap();
        assert_eq!(f, QueueFamilies { graphics: 2, present: 2 });
    }

    #[test]
    fn falls_back_to_separate_families() {
        let props = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let f = find_queue_families(&props, |i| i == 1).unwrap();
        assert_eq!(f, QueueFamilies { graphics: 0, present: 1 });
    }

    #[test]
    fn no_present_support_means_no_device() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&props, |_| false).is_none());
    }

    #[test]
    fn memory_type_honours_filter_and_flags() {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        mem.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        mem.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        mem.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(pick_memory_type(&mem, 0b111, host), Some(1));
        assert_eq!(pick_memory_type(&mem, 0b100, host), Some(2));
        assert_eq!(
            pick_memory_type(&mem, 0b001, vk::MemoryPropertyFlags::HOST_COHERENT),
            None
        );
    }

    #[test]
    fn release_runs_only_on_error() {
        let mut released = 0;
        let ok: Result<u32, vk::Result> = release_on_err(Ok(7), || released += 1);
        assert_eq!(ok, Ok(7));
        assert_eq!(released, 0);

        let err: Result<(), vk::Result> =
            release_on_err(Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), || released += 1);
        assert_eq!(err, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(released, 1);
    }
}
