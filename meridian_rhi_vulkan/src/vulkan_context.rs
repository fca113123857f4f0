/// VulkanDeviceContext - Vulkan implementation of the DeviceContext trait
///
/// Headless: no surface or swapchain is created. Owns:
/// - the Vulkan instance and logical device
/// - the gpu-allocator allocator and the table of live buffers
/// - one immediate-submission slot (queue, command pool, command buffer,
///   fence) per distinct queue family used by Graphics, Compute and Copy

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use meridian_rhi::meridian::device::{
    AllocationHandle, BufferCreateDesc, BufferHandle, BufferResource, CommandRecording,
    DeviceConfig, DeviceContext, MemoryPropertyFlags, QueueKind,
};
use meridian_rhi::meridian::Result;
use meridian_rhi::{engine_bail, engine_debug, engine_err, engine_error, engine_info, engine_trace, engine_warn};
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::vulkan_conversion::{
    align_flush_offset, buffer_usage_to_vk, memory_location, select_queue_family,
};

const SOURCE: &str = "meridian::vulkan";

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

new_key_type! {
    /// Key of a live buffer in the context's buffer table
    struct BufferKey;
}

/// A live buffer and the memory bound to it
struct BufferEntry {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    name: String,
    size: u64,
    mapped: bool,
}

/// Queue plus the objects needed for blocking one-shot submissions
struct ImmediateQueue {
    family: u32,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    recording: bool,
}

/// Vulkan device context
pub struct VulkanDeviceContext {
    /// Vulkan entry (kept alive for the instance)
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,

    /// GPU memory allocator
    /// Wrapped in ManuallyDrop so it is dropped BEFORE the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,

    /// Live buffers, keyed by the allocation handle handed to resources
    buffers: Mutex<SlotMap<BufferKey, BufferEntry>>,

    /// One slot per distinct queue family
    queues: Vec<Mutex<ImmediateQueue>>,
    /// Index into `queues` for Graphics, Compute and Copy
    queue_slots: [usize; 3],
    /// Distinct queue family indices (buffers are shared concurrently between them)
    queue_families: Vec<u32>,

    non_coherent_atom_size: u64,

    /// Object naming (present when debug names are enabled and supported)
    debug_utils: Option<ash::ext::debug_utils::Device>,

    /// Validation messenger and its loader
    #[cfg(feature = "vulkan-validation")]
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slot_of(kind: QueueKind) -> usize {
    match kind {
        QueueKind::Graphics => 0,
        QueueKind::Compute => 1,
        QueueKind::Copy => 2,
    }
}

impl VulkanDeviceContext {
    /// Create a headless Vulkan device context
    ///
    /// # Arguments
    ///
    /// * `config` - Application info, validation and debug-name settings
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use meridian_rhi::meridian::device::{DeviceConfig, DeviceContext};
    /// use meridian_rhi_vulkan::VulkanDeviceContext;
    ///
    /// let ctx: Arc<dyn DeviceContext> = Arc::new(VulkanDeviceContext::new(DeviceConfig::default())?);
    /// # Ok::<(), meridian_rhi::meridian::Error>(())
    /// ```
    pub fn new(config: DeviceConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                engine_err!(SOURCE, InitializationFailed => "Failed to load Vulkan library: {:?}", e)
            })?;

            let available_extensions = entry
                .enumerate_instance_extension_properties(None)
                .map_err(|e| {
                    engine_err!(SOURCE, InitializationFailed => "Failed to enumerate instance extensions: {:?}", e)
                })?;
            let debug_utils_available = available_extensions.iter().any(|ext| {
                ext.extension_name_as_c_str()
                    .map_or(false, |name| name == ash::ext::debug_utils::NAME)
            });

            let validation = Self::validation_enabled(&entry, &config);
            let use_debug_utils = debug_utils_available && (validation || config.enable_debug_names);
            if config.enable_debug_names && !debug_utils_available {
                engine_warn!(SOURCE, "VK_EXT_debug_utils not available, debug names disabled");
            }

            // Application Info
            let app_name = CString::new(config.app_name.clone()).map_err(|_| {
                engine_err!(SOURCE, InitializationFailed => "Application name contains a NUL byte")
            })?;
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Meridian")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let mut extension_names = Vec::new();
            if use_debug_utils {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }
            let layer_names = if validation && debug_utils_available {
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                engine_err!(SOURCE, InitializationFailed => "Failed to create Vulkan instance: {:?}", e)
            })?;

            #[cfg(feature = "vulkan-validation")]
            let debug_messenger = if !layer_names.is_empty() {
                match Self::create_debug_messenger(&entry, &instance, &config) {
                    Ok(messenger) => Some(messenger),
                    Err(err) => {
                        instance.destroy_instance(None);
                        return Err(err);
                    }
                }
            } else {
                None
            };

            match Self::create_device(&instance, use_debug_utils && config.enable_debug_names) {
                Ok(parts) => {
                    engine_info!(SOURCE, "Vulkan device context ready ({} queue families, validation {})",
                        parts.queues.len(), if layer_names.is_empty() { "off" } else { "on" });
                    Ok(Self {
                        _entry: entry,
                        instance,
                        device: parts.device,
                        allocator: ManuallyDrop::new(Mutex::new(parts.allocator)),
                        buffers: Mutex::new(SlotMap::with_key()),
                        queues: parts.queues.into_iter().map(Mutex::new).collect(),
                        queue_slots: parts.queue_slots,
                        queue_families: parts.queue_families,
                        non_coherent_atom_size: parts.non_coherent_atom_size,
                        debug_utils: parts.debug_utils,
                        #[cfg(feature = "vulkan-validation")]
                        debug_messenger,
                    })
                }
                Err(err) => {
                    #[cfg(feature = "vulkan-validation")]
                    if let Some((debug_utils, messenger)) = debug_messenger {
                        crate::debug::cleanup_debug_config();
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                    Err(err)
                }
            }
        }
    }

    /// Whether validation layers should be enabled for this configuration
    unsafe fn validation_enabled(entry: &ash::Entry, config: &DeviceConfig) -> bool {
        if !config.enable_validation {
            return false;
        }
        if !cfg!(feature = "vulkan-validation") {
            engine_warn!(SOURCE, "Validation requested but meridian_rhi_vulkan was built without the 'vulkan-validation' feature");
            return false;
        }

        let layer_present = entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    layer.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER)
                })
            })
            .unwrap_or(false);
        if !layer_present {
            engine_warn!(SOURCE, "{:?} not installed, running without validation", VALIDATION_LAYER);
        }
        layer_present
    }

    #[cfg(feature = "vulkan-validation")]
    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
        config: &DeviceConfig,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        crate::debug::init_debug_config(crate::debug::DebugConfig {
            severity: config.debug_severity,
        });

        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(crate::debug::severity_flags(config.debug_severity))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&debug_info, None)
            .map_err(|e| {
                engine_err!(SOURCE, InitializationFailed => "Failed to create debug messenger: {:?}", e)
            })?;

        Ok((debug_utils, messenger))
    }

    /// Pick a physical device and create the logical device, allocator and queues
    unsafe fn create_device(instance: &ash::Instance, debug_names: bool) -> Result<DeviceParts> {
        let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
            engine_err!(SOURCE, InitializationFailed => "Failed to enumerate physical devices: {:?}", e)
        })?;

        // Prefer a discrete GPU, otherwise take the first one
        let physical_device = physical_devices
            .iter()
            .copied()
            .find(|&pd| {
                instance.get_physical_device_properties(pd).device_type
                    == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .or_else(|| physical_devices.first().copied())
            .ok_or_else(|| {
                engine_err!(SOURCE, InitializationFailed => "No Vulkan-capable GPU found")
            })?;

        let properties = instance.get_physical_device_properties(physical_device);
        engine_info!(SOURCE, "Using GPU '{}'",
            properties.device_name_as_c_str().map(|n| n.to_string_lossy()).unwrap_or_default());

        // Find Queue Families
        let families = instance.get_physical_device_queue_family_properties(physical_device);
        let graphics_family = select_queue_family(&families, QueueKind::Graphics).ok_or_else(|| {
            engine_err!(SOURCE, InitializationFailed => "No graphics queue family found")
        })?;
        let compute_family = select_queue_family(&families, QueueKind::Compute).unwrap_or(graphics_family);
        let copy_family = select_queue_family(&families, QueueKind::Copy).unwrap_or(graphics_family);
        engine_debug!(SOURCE, "Queue families: graphics={}, compute={}, copy={}",
            graphics_family, compute_family, copy_family);

        let mut queue_families = vec![graphics_family];
        for family in [compute_family, copy_family] {
            if !queue_families.contains(&family) {
                queue_families.push(family);
            }
        }
        let position = |family: u32| queue_families.iter().position(|&f| f == family).unwrap_or(0);
        let queue_slots = [position(graphics_family), position(compute_family), position(copy_family)];

        // Create Logical Device
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let device_create_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos);
        let device = instance
            .create_device(physical_device, &device_create_info, None)
            .map_err(|e| {
                engine_err!(SOURCE, InitializationFailed => "Failed to create logical device: {:?}", e)
            })?;

        // Create GPU allocator
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                device.destroy_device(None);
                engine_bail!(SOURCE, InitializationFailed => "Failed to create GPU allocator: {:?}", e);
            }
        };

        let mut queues = Vec::with_capacity(queue_families.len());
        for &family in &queue_families {
            match Self::create_immediate_queue(&device, family) {
                Ok(queue) => queues.push(queue),
                Err(err) => {
                    for queue in &queues {
                        Self::destroy_immediate_queue(&device, queue);
                    }
                    drop(allocator);
                    device.destroy_device(None);
                    return Err(err);
                }
            }
        }

        let debug_utils = debug_names.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        Ok(DeviceParts {
            device,
            allocator,
            queues,
            queue_slots,
            queue_families,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            debug_utils,
        })
    }

    unsafe fn create_immediate_queue(device: &ash::Device, family: u32) -> Result<ImmediateQueue> {
        let queue = device.get_device_queue(family, 0);

        // TRANSIENT + RESET for a reusable one-shot command buffer
        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = device.create_command_pool(&pool_create_info, None).map_err(|e| {
            engine_err!(SOURCE, InitializationFailed => "Failed to create command pool for family {}: {:?}", family, e)
        })?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match device.allocate_command_buffers(&allocate_info) {
            Ok(buffers) => buffers[0],
            Err(e) => {
                device.destroy_command_pool(command_pool, None);
                engine_bail!(SOURCE, InitializationFailed =>
                    "Failed to allocate command buffer for family {}: {:?}", family, e);
            }
        };

        let fence = match device.create_fence(&vk::FenceCreateInfo::default(), None) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_command_pool(command_pool, None);
                engine_bail!(SOURCE, InitializationFailed =>
                    "Failed to create fence for family {}: {:?}", family, e);
            }
        };

        Ok(ImmediateQueue {
            family,
            queue,
            command_pool,
            command_buffer,
            fence,
            recording: false,
        })
    }

    unsafe fn destroy_immediate_queue(device: &ash::Device, queue: &ImmediateQueue) {
        device.destroy_fence(queue.fence, None);
        // Frees the command buffer as well
        device.destroy_command_pool(queue.command_pool, None);
    }

    fn slot(&self, kind: QueueKind) -> &Mutex<ImmediateQueue> {
        &self.queues[self.queue_slots[slot_of(kind)]]
    }

    fn buffer_key(allocation: AllocationHandle) -> BufferKey {
        KeyData::from_ffi(allocation.as_raw()).into()
    }

    /// Queue family index used for `kind`
    pub fn queue_family(&self, kind: QueueKind) -> u32 {
        lock(self.slot(kind)).family
    }

    /// `VkPhysicalDeviceLimits::nonCoherentAtomSize` of the selected GPU
    pub fn non_coherent_atom_size(&self) -> u64 {
        self.non_coherent_atom_size
    }

    /// Number of buffers created and not yet destroyed
    pub fn live_buffer_count(&self) -> usize {
        lock(&self.buffers).len()
    }

    /// Free a buffer that was never inserted in the buffer table
    unsafe fn release_unregistered(&self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        if let Some(allocation) = allocation {
            if let Err(e) = lock(&*self.allocator).free(allocation) {
                engine_warn!(SOURCE, "Failed to free allocation: {:?}", e);
            }
        }
        self.device.destroy_buffer(buffer, None);
    }
}

/// Objects created together with the logical device
struct DeviceParts {
    device: ash::Device,
    allocator: Allocator,
    queues: Vec<ImmediateQueue>,
    queue_slots: [usize; 3],
    queue_families: Vec<u32>,
    non_coherent_atom_size: u64,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl DeviceContext for VulkanDeviceContext {
    fn create_buffer(&self, desc: &BufferCreateDesc<'_>) -> Result<BufferResource> {
        if desc.size == 0 {
            engine_bail!(SOURCE, AllocationFailure => "Buffer '{}': size must be non-zero", desc.name);
        }
        if let Some(data) = desc.initial_data {
            if !desc.memory_properties.contains(MemoryPropertyFlags::HOST_VISIBLE) {
                engine_bail!(SOURCE, AllocationFailure =>
                    "Buffer '{}': initial data requires host-visible memory", desc.name);
            }
            if data.len() as u64 != desc.size {
                engine_bail!(SOURCE, AllocationFailure =>
                    "Buffer '{}': initial data is {} bytes, buffer is {}", desc.name, data.len(), desc.size);
            }
        }

        unsafe {
            let mut buffer_create_info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(buffer_usage_to_vk(desc.usage))
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            if self.queue_families.len() > 1 {
                buffer_create_info = buffer_create_info
                    .sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&self.queue_families);
            }

            let buffer = self.device.create_buffer(&buffer_create_info, None).map_err(|e| {
                engine_err!(SOURCE, AllocationFailure =>
                    "Failed to create buffer '{}' of size {} bytes: {:?}", desc.name, desc.size, e)
            })?;

            // Allocate memory
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = lock(&*self.allocator).allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: memory_location(desc.memory_properties),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
            let mut allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.release_unregistered(buffer, None);
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    engine_bail!(SOURCE, AllocationFailure =>
                        "Out of GPU memory for buffer '{}' (required: {:.2} MB): {}", desc.name, size_mb, e);
                }
            };

            // Bind memory
            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.release_unregistered(buffer, Some(allocation));
                engine_bail!(SOURCE, AllocationFailure => "Failed to bind memory of buffer '{}': {:?}", desc.name, e);
            }

            // Initial contents
            if let Some(data) = desc.initial_data {
                match allocation.mapped_slice_mut() {
                    Some(mapped) => mapped[..data.len()].copy_from_slice(data),
                    None => {
                        self.release_unregistered(buffer, Some(allocation));
                        engine_bail!(SOURCE, AllocationFailure =>
                            "Buffer '{}': memory is not host-mapped", desc.name);
                    }
                }
            }

            let key = lock(&self.buffers).insert(BufferEntry {
                buffer,
                allocation: Some(allocation),
                name: desc.name.to_string(),
                size: desc.size,
                mapped: false,
            });

            let resource = BufferResource {
                buffer: BufferHandle::from_raw(buffer.as_raw()),
                allocation: AllocationHandle::from_raw(key.data().as_ffi()),
            };
            self.set_debug_name(resource.buffer, desc.name);

            engine_trace!(SOURCE, "Created buffer '{}' ({} bytes, {:?})", desc.name, desc.size, desc.memory_properties);
            Ok(resource)
        }
    }

    fn destroy_buffer(&self, resource: BufferResource) {
        let entry = lock(&self.buffers).remove(Self::buffer_key(resource.allocation));
        let Some(mut entry) = entry else {
            engine_error!(SOURCE, "destroy_buffer: unknown allocation {:?}", resource.allocation);
            return;
        };
        if entry.buffer.as_raw() != resource.buffer.as_raw() {
            engine_error!(SOURCE, "destroy_buffer: buffer {:?} does not own allocation {:?}",
                resource.buffer, resource.allocation);
        }

        unsafe {
            self.release_unregistered(entry.buffer, entry.allocation.take());
        }
        engine_trace!(SOURCE, "Destroyed buffer '{}' ({} bytes)", entry.name, entry.size);
    }

    fn map_memory(&self, allocation: AllocationHandle) -> Result<NonNull<u8>> {
        let mut buffers = lock(&self.buffers);
        let Some(entry) = buffers.get_mut(Self::buffer_key(allocation)) else {
            engine_bail!(SOURCE, MapFailure => "map_memory: unknown allocation {:?}", allocation);
        };

        // gpu-allocator keeps host-visible blocks persistently mapped
        let ptr = entry
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .ok_or_else(|| {
                engine_err!(SOURCE, MapFailure => "Buffer '{}' is not CPU-accessible", entry.name)
            })?;

        entry.mapped = true;
        Ok(ptr.cast::<u8>())
    }

    fn unmap_memory(&self, allocation: AllocationHandle) {
        if let Some(entry) = lock(&self.buffers).get_mut(Self::buffer_key(allocation)) {
            entry.mapped = false;
        }
    }

    fn flush_mapped_range(&self, allocation: AllocationHandle, offset: u64, size: u64) -> Result<()> {
        let buffers = lock(&self.buffers);
        let Some(entry) = buffers.get(Self::buffer_key(allocation)) else {
            engine_bail!(SOURCE, FlushFailure => "flush_mapped_range: unknown allocation {:?}", allocation);
        };
        if offset.checked_add(size).map_or(true, |end| end > entry.size) {
            engine_bail!(SOURCE, FlushFailure =>
                "Flush of '{}' [{}, +{}) exceeds buffer size {}", entry.name, offset, size, entry.size);
        }
        let Some(memory) = entry.allocation.as_ref() else {
            engine_bail!(SOURCE, FlushFailure => "Buffer '{}' has no allocation", entry.name);
        };

        unsafe {
            let range = vk::MappedMemoryRange::default()
                .memory(memory.memory())
                .offset(align_flush_offset(memory.offset() + offset, self.non_coherent_atom_size))
                .size(vk::WHOLE_SIZE);

            self.device.flush_mapped_memory_ranges(&[range]).map_err(|e| {
                engine_err!(SOURCE, FlushFailure => "Failed to flush '{}': {:?}", entry.name, e)
            })
        }
    }

    fn wait_all_device_work(&self) -> Result<()> {
        // vkDeviceWaitIdle needs exclusive access to every queue
        let _guards: Vec<_> = self.queues.iter().map(lock).collect();
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!(SOURCE, "Failed to wait idle: {:?}", e))
        }
    }

    fn begin_immediate(&self, queue: QueueKind) -> Result<CommandRecording> {
        let mut slot = lock(self.slot(queue));
        if slot.recording {
            engine_bail!(SOURCE, UsageViolation =>
                "begin_immediate({:?}): a recording is already open on queue family {}", queue, slot.family);
        }

        unsafe {
            self.device
                .reset_command_buffer(slot.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!(SOURCE, "Failed to reset immediate command buffer: {:?}", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(slot.command_buffer, &begin_info)
                .map_err(|e| engine_err!(SOURCE, "Failed to begin immediate command buffer: {:?}", e))?;
        }

        slot.recording = true;
        Ok(CommandRecording::new(queue, slot.command_buffer.as_raw()))
    }

    fn record_buffer_copy(
        &self,
        recording: &CommandRecording,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        let slot = lock(self.slot(recording.queue()));
        if !slot.recording || slot.command_buffer.as_raw() != recording.raw() {
            engine_error!(SOURCE, "record_buffer_copy: no open recording on {:?}", recording.queue());
            return;
        }

        let region = vk::BufferCopy::default().src_offset(0).dst_offset(0).size(size);
        unsafe {
            self.device.cmd_copy_buffer(
                slot.command_buffer,
                vk::Buffer::from_raw(src.as_raw()),
                vk::Buffer::from_raw(dst.as_raw()),
                &[region],
            );
        }
    }

    fn end_immediate(&self, recording: CommandRecording) -> Result<()> {
        let mut slot = lock(self.slot(recording.queue()));
        if !slot.recording {
            engine_bail!(SOURCE, UsageViolation => "end_immediate({:?}): no open recording", recording.queue());
        }
        slot.recording = false;

        unsafe {
            self.device
                .end_command_buffer(slot.command_buffer)
                .map_err(|e| engine_err!(SOURCE, "Failed to end immediate command buffer: {:?}", e))?;

            self.device
                .reset_fences(&[slot.fence])
                .map_err(|e| engine_err!(SOURCE, "Failed to reset immediate fence: {:?}", e))?;

            let command_buffers = [slot.command_buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            self.device
                .queue_submit(slot.queue, &[submit_info], slot.fence)
                .map_err(|e| engine_err!(SOURCE, "Failed to submit immediate commands: {:?}", e))?;

            self.device
                .wait_for_fences(&[slot.fence], true, u64::MAX)
                .map_err(|e| engine_err!(SOURCE, "Failed to wait for immediate fence: {:?}", e))?;
        }
        Ok(())
    }

    fn set_debug_name(&self, buffer: BufferHandle, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(object_name) = CString::new(name) else {
            engine_warn!(SOURCE, "Debug name {:?} contains a NUL byte, skipped", name);
            return;
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(vk::Buffer::from_raw(buffer.as_raw()))
            .object_name(&object_name);
        unsafe {
            if let Err(e) = debug_utils.set_debug_utils_object_name(&name_info) {
                engine_warn!(SOURCE, "Failed to name buffer '{}': {:?}", name, e);
            }
        }
    }
}

impl Drop for VulkanDeviceContext {
    fn drop(&mut self) {
        unsafe {
            // Wait for device to finish
            self.device.device_wait_idle().ok();

            // 1. Free buffers still alive (resources outliving the context)
            let buffers = self.buffers.get_mut().unwrap_or_else(PoisonError::into_inner);
            let leaked: Vec<BufferEntry> = buffers.drain().map(|(_, entry)| entry).collect();
            for mut entry in leaked {
                engine_warn!(SOURCE, "Buffer '{}' ({} bytes{}) still alive at context destruction, freeing",
                    entry.name, entry.size, if entry.mapped { ", mapped" } else { "" });
                self.release_unregistered(entry.buffer, entry.allocation.take());
            }

            // 2. Drop allocator: free VkDeviceMemory blocks BEFORE destroying device
            ManuallyDrop::drop(&mut self.allocator);

            // 3. Immediate submission objects
            for queue in &self.queues {
                Self::destroy_immediate_queue(&self.device, &lock(queue));
            }

            // 4. Stop forwarding validation messages, then destroy the messenger
            #[cfg(feature = "vulkan-validation")]
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                crate::debug::cleanup_debug_config();
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            // 5. Destroy device and instance
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
