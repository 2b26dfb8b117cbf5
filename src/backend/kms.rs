//! DRM-KMS backend: device probing, connector discovery, the GBM swapchain
//! per output and the SetCrtc/PageFlip scanout cycle. The page-flip event on
//! the DRM fd drives the frame loop; while a flip is in flight an output
//! ignores further render requests, which coalesces scheduling bursts.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;

use drm::control::{connector, crtc, framebuffer, Device as ControlDevice, Event, Mode, PageFlipFlags};
use drm::Device as DrmDevice;
use gbm::{AsRaw, BufferObject, BufferObjectFlags};
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::DisplayHandle;

use crate::config;
use crate::error::StartupError;
use crate::state::{OutputId, State};

/// The opened KMS node. drm-rs hands out the ioctl surface through the two
/// `Device` traits implemented on this newtype.
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl DrmDevice for Card {}
impl ControlDevice for Card {}

impl Card {
    fn open(path: &str) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC | libc::O_NONBLOCK)
            .open(path)?;
        Ok(Self(file))
    }

    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }
}

pub struct Gpu {
    pub card: Card,
    pub gbm: gbm::Device<Card>,
}

impl Gpu {
    /// Probe the candidate cards in order; the first one that grants master
    /// and supports dumb buffers wins. The error reflects why the last
    /// candidate was rejected.
    pub fn open() -> Result<Self, StartupError> {
        let mut last_error = StartupError::DrmOpen(io::Error::new(
            io::ErrorKind::NotFound,
            "no DRM device found",
        ));
        for path in config::DRM_CARDS {
            let card = match Card::open(path) {
                Ok(card) => card,
                Err(err) => {
                    tracing::debug!("skipping {path}: {err}");
                    last_error = StartupError::DrmOpen(err);
                    continue;
                }
            };
            if let Err(err) = card.acquire_master_lock() {
                tracing::warn!("cannot become DRM master on {path}: {err}");
                last_error = StartupError::DrmMaster(err);
                continue;
            }
            match card.get_driver_capability(drm::DriverCapability::DumbBuffer) {
                Ok(v) if v != 0 => {}
                _ => {
                    tracing::warn!("{path} lacks dumb buffer support");
                    last_error = StartupError::NoDumbBuffers;
                    continue;
                }
            }

            tracing::info!("using DRM device {path}");
            let gbm = gbm::Device::new(card.try_clone()?).map_err(StartupError::Gbm)?;
            return Ok(Self { card, gbm });
        }
        Err(last_error)
    }
}

/// One physical scanout destination: a connector bound to a CRTC, with a GBM
/// swapchain and an EGL window surface on top of it.
pub struct Output {
    pub id: OutputId,
    pub connector: connector::Handle,
    pub crtc: crtc::Handle,
    pub mode: Mode,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub refresh_mhz: i32,
    pub name: String,
    pub gbm_surface: gbm::Surface<()>,
    pub egl_surface: khronos_egl::Surface,
    fbs: HashMap<usize, framebuffer::Handle>,
    pub current_bo: Option<BufferObject<()>>,
    pub next_bo: Option<BufferObject<()>>,
    pub page_flip_pending: bool,
}

impl Output {
    /// DRM framebuffer for a swapchain buffer, created once per bo and
    /// cached (depth 24, bpp 32).
    fn framebuffer_for(&mut self, card: &Card, bo: &BufferObject<()>) -> io::Result<framebuffer::Handle> {
        let key = bo.as_raw() as usize;
        if let Some(fb) = self.fbs.get(&key) {
            return Ok(*fb);
        }
        let fb = card.add_framebuffer(bo, 24, 32)?;
        self.fbs.insert(key, fb);
        Ok(fb)
    }

    pub(crate) fn teardown(mut self, egl: &crate::backend::egl::EglDevice, gpu: &Gpu) {
        self.current_bo = None;
        self.next_bo = None;
        egl.destroy_surface(self.egl_surface);
        for fb in self.fbs.values() {
            let _ = gpu.card.destroy_framebuffer(*fb);
        }
    }
}

/// Enumerate connected connectors and light up an output on each: free
/// encoder, free CRTC, first advertised mode, GBM surface in XRGB8888 with
/// scanout|rendering usage, and a `wl_output` global for clients.
pub fn discover_outputs(
    gpu: &Gpu,
    egl: &crate::backend::egl::EglDevice,
    dh: &DisplayHandle,
) -> Result<Vec<Output>, StartupError> {
    let resources = gpu
        .card
        .resource_handles()
        .map_err(StartupError::DrmResources)?;

    let mut outputs = Vec::new();
    let mut used_crtcs = Vec::new();

    for conn_handle in resources.connectors() {
        let conn = match gpu.card.get_connector(*conn_handle, false) {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!("get_connector failed: {err}");
                continue;
            }
        };
        if conn.state() != connector::State::Connected || conn.modes().is_empty() {
            continue;
        }

        let crtc = conn
            .encoders()
            .iter()
            .filter_map(|enc| gpu.card.get_encoder(*enc).ok())
            .flat_map(|enc| resources.filter_crtcs(enc.possible_crtcs()))
            .find(|crtc| !used_crtcs.contains(crtc));
        let Some(crtc) = crtc else {
            tracing::warn!("no free CRTC for connector {conn_handle:?}");
            continue;
        };
        used_crtcs.push(crtc);

        let mode = conn.modes()[0];
        let (width, height) = mode.size();
        let name = format!("{}-{}", conn.interface().as_str(), conn.interface_id());

        let gbm_surface = gpu
            .gbm
            .create_surface::<()>(
                width as u32,
                height as u32,
                gbm::Format::Xrgb8888,
                BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
            )
            .map_err(StartupError::Gbm)?;
        let egl_surface = egl.create_window_surface(&gbm_surface)?;

        let id = OutputId(outputs.len() as u32 + 1);
        let _ = dh.create_global::<State, WlOutput, OutputId>(config::OUTPUT_VERSION, id);

        tracing::info!("output {name}: {width}x{height} @ {}", mode.vrefresh());
        outputs.push(Output {
            id,
            connector: *conn_handle,
            crtc,
            mode,
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
            refresh_mhz: mode.vrefresh() as i32 * 1000,
            name,
            gbm_surface,
            egl_surface,
            fbs: HashMap::new(),
            current_bo: None,
            next_bo: None,
            page_flip_pending: false,
        });
    }

    if outputs.is_empty() {
        return Err(StartupError::NoConnector);
    }
    Ok(outputs)
}

impl State {
    /// Composite one output and hand the result to the CRTC. The first frame
    /// uses SetCrtc to bind the framebuffer; later frames schedule a page
    /// flip and wait for the vblank event before touching the output again.
    pub(crate) fn render_output(&mut self, index: usize) {
        if index >= self.outputs.len() || self.outputs[index].page_flip_pending {
            return;
        }

        let time = self.now_ms();
        let egl_surface = self.outputs[index].egl_surface;
        let (width, height) = (self.outputs[index].width, self.outputs[index].height);

        if let Err(err) = self.egl.make_current(egl_surface) {
            tracing::warn!("eglMakeCurrent failed: {err}");
            return;
        }

        self.renderer.begin(width, height);

        // Window list order is insertion order; drawing front-to-back-most
        // first keeps the oldest window at the bottom of the stack.
        let draws: Vec<_> = self
            .windows
            .iter()
            .filter(|window| window.mapped)
            .filter_map(|window| {
                let surface = self.surfaces.get(&window.surface)?;
                if !surface.has_content {
                    return None;
                }
                let texture = surface.texture?;
                Some((texture, window.x, window.y, surface.tex_width, surface.tex_height))
            })
            .collect();
        for (texture, x, y, w, h) in draws {
            self.renderer
                .draw_texture(texture, x, y, w, h, width, height);
        }

        if let Err(err) = self.egl.swap_buffers(egl_surface) {
            tracing::warn!("eglSwapBuffers failed: {err}");
            return;
        }

        let output = &mut self.outputs[index];
        let bo = match unsafe { output.gbm_surface.lock_front_buffer() } {
            Ok(bo) => bo,
            Err(err) => {
                tracing::warn!("failed to lock GBM front buffer: {err}");
                return;
            }
        };
        let fb = match output.framebuffer_for(&self.gpu.card, &bo) {
            Ok(fb) => fb,
            Err(err) => {
                tracing::warn!("failed to create DRM framebuffer: {err}");
                return;
            }
        };

        if output.current_bo.is_none() {
            match self.gpu.card.set_crtc(
                output.crtc,
                Some(fb),
                (0, 0),
                &[output.connector],
                Some(output.mode),
            ) {
                Ok(()) => {
                    output.current_bo = Some(bo);
                    self.send_frame_done(time);
                }
                Err(err) => {
                    tracing::warn!("SetCrtc failed: {err}");
                }
            }
            return;
        }

        match self
            .gpu
            .card
            .page_flip(output.crtc, fb, PageFlipFlags::EVENT, None)
        {
            Ok(()) => {
                output.next_bo = Some(bo);
                output.page_flip_pending = true;
                self.send_frame_done(time);
            }
            Err(err) => {
                // Transient: drop this frame, the bo goes back to the
                // swapchain and the next commit retries.
                tracing::warn!("page flip failed: {err}");
            }
        }
    }

    /// Drain the DRM fd. Each page-flip completion releases the previously
    /// scanned-out buffer and immediately starts the next frame.
    pub(crate) fn on_drm_event(&mut self) {
        let crtcs: Vec<crtc::Handle> = match self.gpu.card.receive_events() {
            Ok(events) => events
                .filter_map(|event| match event {
                    Event::PageFlip(flip) => Some(flip.crtc),
                    _ => None,
                })
                .collect(),
            Err(err) => {
                tracing::warn!("reading DRM events failed: {err}");
                return;
            }
        };

        for crtc in crtcs {
            let Some(index) = self.outputs.iter().position(|o| o.crtc == crtc) else {
                continue;
            };
            let output = &mut self.outputs[index];
            output.page_flip_pending = false;
            // Dropping the old current_bo releases it to the GBM surface.
            output.current_bo = output.next_bo.take();
            self.render_output(index);
        }
    }
}
