//! Construction and the event loop. `PerchCompositor::new` brings the whole
//! stack up in dependency order (DRM → GBM → EGL → outputs → renderer →
//! XKB → libinput → socket), wires every fd into calloop and paints the
//! first frame; `run` then dispatches until the host calls
//! [`State::terminate`].

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use calloop::generic::Generic;
use calloop::{EventLoop, Interest, Mode, PostAction};
use wayland_server::{Display, ListeningSocket};

use crate::backend::egl::EglDevice;
use crate::backend::keyboard::XkbKeyboard;
use crate::backend::kms::{discover_outputs, Gpu};
use crate::backend::libinput;
use crate::config;
use crate::error::StartupError;
use crate::protocol::globals::{self, ClientState};
use crate::render::gles::GlRenderer;
use crate::state::State;

pub struct PerchCompositor {
    event_loop: EventLoop<'static, State>,
    state: State,
}

fn dup_fd(raw: i32) -> io::Result<OwnedFd> {
    unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()
}

impl PerchCompositor {
    pub fn new() -> Result<Self, StartupError> {
        let event_loop: EventLoop<State> =
            EventLoop::try_new().map_err(|err| StartupError::EventLoop(err.to_string()))?;
        let handle = event_loop.handle();
        let signal = event_loop.get_signal();

        let display: Display<State> = Display::new()?;
        let dh = display.handle();

        let gpu = Gpu::open()?;
        let egl = EglDevice::new(&gpu.gbm)?;
        let outputs = discover_outputs(&gpu, &egl, &dh)?;

        // Shader compilation needs a current context; any output will do.
        egl.make_current(outputs[0].egl_surface)?;
        let gl = unsafe { glow::Context::from_loader_function(|name| egl.proc_address(name)) };
        let renderer = GlRenderer::new(gl)?;

        let keyboard = XkbKeyboard::new()?;
        let libinput = libinput::create_context()?;

        let socket = ListeningSocket::bind_auto(config::SOCKET_BASENAME, config::SOCKET_RANGE)
            .map_err(|err| StartupError::Socket(err.to_string()))?;
        let socket_name = socket
            .socket_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        globals::create_globals(&dh);

        let socket_fd = dup_fd(socket.as_raw_fd())?;
        let drm_fd = dup_fd(gpu.card.as_fd().as_raw_fd())?;
        let input_fd = dup_fd(libinput.as_raw_fd())?;

        let mut state = State::new(
            dh, handle.clone(), signal, socket, socket_name, keyboard, libinput, renderer, egl,
            gpu, outputs,
        );

        handle
            .insert_source(
                Generic::new(socket_fd, Interest::READ, Mode::Level),
                |_, _, state: &mut State| {
                    while let Some(stream) = state.socket.accept().unwrap_or(None) {
                        if let Err(err) = state
                            .dh
                            .insert_client(stream, Arc::new(ClientState::default()))
                        {
                            tracing::warn!("failed to add client: {err}");
                        }
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| StartupError::EventLoop(err.to_string()))?;

        handle
            .insert_source(
                Generic::new(display, Interest::READ, Mode::Level),
                |_, display, state: &mut State| {
                    // SAFETY: the display is never dropped or replaced from
                    // inside its own callback.
                    if let Err(err) = unsafe { display.get_mut() }.dispatch_clients(state) {
                        tracing::warn!("client dispatch failed: {err}");
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| StartupError::EventLoop(err.to_string()))?;

        handle
            .insert_source(
                Generic::new(drm_fd, Interest::READ, Mode::Level),
                |_, _, state: &mut State| {
                    state.on_drm_event();
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| StartupError::EventLoop(err.to_string()))?;

        handle
            .insert_source(
                Generic::new(input_fd, Interest::READ, Mode::Level),
                |_, _, state: &mut State| {
                    state.dispatch_input();
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| StartupError::EventLoop(err.to_string()))?;

        // First frame: background only, binds each CRTC to its framebuffer.
        state
            .loop_handle
            .insert_idle(|state| state.schedule_frames());

        Ok(Self { event_loop, state })
    }

    /// The embedding surface: callback registration, window mutators,
    /// queries. Valid between `new` and drop.
    pub fn state(&mut self) -> &mut State {
        &mut self.state
    }

    /// Dispatch events until [`State::terminate`] is called.
    pub fn run(&mut self) -> io::Result<()> {
        self.state.running = true;
        tracing::info!(socket = %self.state.socket_name, "compositor running");

        while self.state.running {
            self.event_loop
                .dispatch(None::<Duration>, &mut self.state)?;
            let _ = self.state.dh.flush_clients();
        }

        let _ = self.state.dh.flush_clients();
        Ok(())
    }
}

impl Drop for PerchCompositor {
    fn drop(&mut self) {
        self.state.shutdown();
    }
}
