//! EGL bootstrap over the GBM platform. libEGL is loaded dynamically at
//! startup; one GLES2 context is shared by every output, each of which gets
//! its own window surface on top of its GBM swapchain.

use std::ffi::c_void;

use gbm::AsRaw;
use khronos_egl as egl;

use crate::backend::kms::Card;
use crate::error::StartupError;

pub type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

/// EGL_PLATFORM_GBM_KHR, from EGL_KHR_platform_gbm.
const PLATFORM_GBM: egl::Enum = 0x31D7;

pub struct EglDevice {
    pub egl: EglInstance,
    pub display: egl::Display,
    pub config: egl::Config,
    pub context: egl::Context,
}

impl EglDevice {
    /// Load libEGL, bring up a display on the GBM device and create a GLES2
    /// context on a config whose native visual is XRGB8888 (so EGL renders
    /// into buffers the CRTC can scan out).
    pub fn new(gbm: &gbm::Device<Card>) -> Result<Self, StartupError> {
        let egl = unsafe { EglInstance::load_required() }?;

        let display = unsafe {
            egl.get_platform_display(
                PLATFORM_GBM,
                gbm.as_raw() as *mut c_void,
                &[egl::ATTRIB_NONE],
            )
        }?;
        let (major, minor) = egl.initialize(display)?;
        tracing::info!("EGL {major}.{minor} initialized on the GBM platform");

        egl.bind_api(egl::OPENGL_ES_API)?;

        #[rustfmt::skip]
        let attribs = [
            egl::SURFACE_TYPE, egl::WINDOW_BIT,
            egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT,
            egl::RED_SIZE, 8,
            egl::GREEN_SIZE, 8,
            egl::BLUE_SIZE, 8,
            egl::NONE,
        ];
        let mut configs = Vec::with_capacity(64);
        egl.choose_config(display, &attribs, &mut configs)?;
        let config = configs
            .into_iter()
            .find(|config| {
                egl.get_config_attrib(display, *config, egl::NATIVE_VISUAL_ID)
                    .map(|visual| visual as u32 == gbm::Format::Xrgb8888 as u32)
                    .unwrap_or(false)
            })
            .ok_or(StartupError::NoEglConfig)?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = egl.create_context(display, config, None, &context_attribs)?;

        Ok(Self {
            egl,
            display,
            config,
            context,
        })
    }

    /// An EGL window surface on top of an output's GBM surface.
    pub fn create_window_surface<T: 'static>(
        &self,
        gbm_surface: &gbm::Surface<T>,
    ) -> Result<egl::Surface, StartupError> {
        let surface = unsafe {
            self.egl.create_window_surface(
                self.display,
                self.config,
                gbm_surface.as_raw() as egl::NativeWindowType,
                None,
            )
        }?;
        Ok(surface)
    }

    pub fn make_current(&self, surface: egl::Surface) -> Result<(), egl::Error> {
        self.egl
            .make_current(self.display, Some(surface), Some(surface), Some(self.context))
    }

    pub fn unbind(&self) {
        let _ = self.egl.make_current(self.display, None, None, None);
    }

    pub fn swap_buffers(&self, surface: egl::Surface) -> Result<(), egl::Error> {
        self.egl.swap_buffers(self.display, surface)
    }

    pub fn destroy_surface(&self, surface: egl::Surface) {
        let _ = self.egl.destroy_surface(self.display, surface);
    }

    /// Final teardown; surfaces must already be gone.
    pub fn destroy(&self) {
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }

    pub fn proc_address(&self, name: &str) -> *const c_void {
        match self.egl.get_proc_address(name) {
            Some(f) => f as *const c_void,
            None => std::ptr::null(),
        }
    }
}
