use std::io;

/// Fatal conditions while bringing the compositor up. Anything that happens
/// after startup is either a protocol error (resolved by disconnecting the
/// offending client) or a transient hardware error (logged, frame dropped).
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no usable DRM device: {0}")]
    DrmOpen(io::Error),
    #[error("failed to become DRM master: {0}")]
    DrmMaster(io::Error),
    #[error("DRM device lacks dumb buffer support")]
    NoDumbBuffers,
    #[error("DRM resource enumeration failed: {0}")]
    DrmResources(io::Error),
    #[error("no connected connector with a usable mode")]
    NoConnector,
    #[error("GBM device creation failed: {0}")]
    Gbm(io::Error),
    #[error("failed to load libEGL: {0}")]
    EglLoad(#[from] khronos_egl::LoadError<libloading::Error>),
    #[error("EGL call failed: {0}")]
    Egl(#[from] khronos_egl::Error),
    #[error("no EGL config with an XRGB8888 native visual")]
    NoEglConfig,
    #[error("GLES renderer setup failed: {0}")]
    Renderer(String),
    #[error("XKB keymap compilation failed")]
    Keymap,
    #[error("keymap file creation failed: {0}")]
    KeymapFile(io::Error),
    #[error("libinput could not assign seat {0}")]
    Seat(String),
    #[error("failed to bind the Wayland socket: {0}")]
    Socket(String),
    #[error("wayland display creation failed: {0}")]
    Display(#[from] wayland_server::backend::InitError),
    #[error("event loop setup failed: {0}")]
    EventLoop(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
