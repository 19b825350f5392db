// Vulkan rendering instance + diagnostics (spec §4.2).
//
// vkforge contributors

use ash::extensions::ext;
use ash::{vk, Entry};

use crate::surface;
use crate::{CreateInfo, Error, Result};
use vkforge_utils::log;

use std::ffi::{CStr, CString};
use std::os::raw::c_void;

// this happy little debug callback is from the ash examples
// all it does is print any errors/warnings thrown.
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> u32 {
    log::error!(
        "[VK][{:?}][{:?}] {:?}",
        message_severity,
        message_types,
        CStr::from_ptr(p_callback_data.as_ref().unwrap().p_message)
    );
    vk::FALSE
}

/// A Vulkan Instance, the root object of spec §3's data model.
///
/// Holds the loaded library, the enabled extensions/layers, and the
/// optional diagnostics messenger. Everything created through
/// `LogicalDevice` is owned transitively by this and must be destroyed
/// before it.
pub struct Instance {
    /// Present only when validation was requested at `CreateInfo` build
    /// time (spec §4.2's diagnostics handler).
    debug: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    /// the entry just loads function pointers from the dynamic library
    pub(crate) loader: Entry,
    /// the big vulkan instance.
    pub(crate) inst: ash::Instance,
}

impl Instance {
    /// Builds a debug-utils create descriptor, looks up
    /// `vkCreateDebugUtilsMessengerEXT` via `Instance::function`, and
    /// invokes it (spec §4.2 steps 1-3).
    fn setup_debug(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let dr_loader = ext::DebugUtils::new(entry, instance);
        let callback = unsafe {
            dr_loader
                .create_debug_utils_messenger(&debug_info, None)
                .map_err(Error::from)?
        };
        Ok((dr_loader, callback))
    }

    /// Create a vkInstance, per spec §4.2: application name/version,
    /// required extensions, required validation layers.
    pub fn new(info: &CreateInfo) -> Result<Self> {
        let entry = Entry::linked();
        let app_name = CString::new(info.title.clone()).unwrap_or_else(|_| CString::new("vkforge").unwrap());

        let mut layer_names: Vec<CString> = Vec::new();
        if info.enable_validation {
            layer_names.push(CString::new("VK_LAYER_KHRONOS_validation").unwrap());
        }

        let layer_names_raw: Vec<*const i8> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let mut extension_names_raw = surface::required_instance_extensions(&info.surface_type);
        if info.enable_validation {
            extension_names_raw.push(ext::DebugUtils::name().as_ptr());
        }

        let appinfo = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            // spec §6: requests Vulkan 1.1 at instance creation.
            .api_version(vk::API_VERSION_1_1)
            .build();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&appinfo)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw)
            .build();

        let instance: ash::Instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(Error::from)?
        };

        let debug = if info.enable_validation {
            Some(Self::setup_debug(&entry, &instance)?)
        } else {
            None
        };

        Ok(Self {
            loader: entry,
            inst: instance,
            debug,
        })
    }

    /// `function(name)` lookup for extension entry points (spec §4.2).
    pub fn function(&self, name: &CStr) -> Option<vk::PFN_vkVoidFunction> {
        unsafe { self.loader.get_instance_proc_addr(self.inst.handle(), name.as_ptr()) }
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.inst
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, callback)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(callback, None);
            }
            self.inst.destroy_instance(None);
        }
    }
}
