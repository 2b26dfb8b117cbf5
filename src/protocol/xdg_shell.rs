//! xdg-shell: toplevel windows over `wl_surface`. A window is created by
//! `get_xdg_surface`, becomes mapped on its first commit with content, and
//! round-trips server-proposed geometry through configure/ack serials.
//! Popups and positioners are accepted as inert objects.

use wayland_protocols::xdg::shell::server::{
    xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource};

use crate::callbacks::WindowEvent;
use crate::state::{State, SurfaceId, WindowId};

/// A top-level shell window. `width`/`height` of zero means "no size yet";
/// the first committed buffer's size is adopted in that case.
pub struct Window {
    pub id: WindowId,
    pub surface: SurfaceId,
    pub xdg_surface: xdg_surface::XdgSurface,
    pub toplevel: Option<xdg_toplevel::XdgToplevel>,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub title: Option<String>,
    pub app_id: Option<String>,
    pub fullscreen: bool,
    pub focused: bool,
    pub mapped: bool,
    pub pending_serial: u32,
    pub pending_configure: bool,
    pub initial_configure_sent: bool,
}

impl Window {
    fn new(id: WindowId, surface: SurfaceId, xdg_surface: xdg_surface::XdgSurface) -> Self {
        Self {
            id,
            surface,
            xdg_surface,
            toplevel: None,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            title: None,
            app_id: None,
            fullscreen: false,
            focused: false,
            mapped: false,
            pending_serial: 0,
            pending_configure: false,
            initial_configure_sent: false,
        }
    }
}

impl State {
    /// Propose geometry to the client: `xdg_toplevel.configure` with the
    /// current activation/fullscreen states, then `xdg_surface.configure`
    /// with a fresh serial the client must ack.
    pub(crate) fn send_configure(&mut self, id: WindowId, width: i32, height: i32) {
        let serial = self.next_serial();
        let Some(index) = self.window_index(id) else {
            return;
        };
        let window = &mut self.windows[index];
        let Some(toplevel) = window.toplevel.clone() else {
            return;
        };

        window.width = width;
        window.height = height;

        let mut states = Vec::new();
        if window.focused {
            states.extend_from_slice(&(xdg_toplevel::State::Activated as u32).to_ne_bytes());
        }
        if window.fullscreen {
            states.extend_from_slice(&(xdg_toplevel::State::Fullscreen as u32).to_ne_bytes());
        }
        toplevel.configure(width, height, states);

        window.pending_serial = serial;
        window.pending_configure = true;
        window.xdg_surface.configure(serial);
    }

    /// Drop a window from the list, firing UNMAP/DESTROY first if it was
    /// visible so callbacks still see its attributes.
    pub(crate) fn remove_window(&mut self, index: usize) {
        let id = self.windows[index].id;
        if self.windows[index].mapped {
            self.windows[index].mapped = false;
            self.emit_window_event(WindowEvent::Unmap, id);
            self.emit_window_event(WindowEvent::Destroy, id);
        }
        // Callbacks may have reshuffled the list; look the window up again.
        if let Some(index) = self.window_index(id) {
            self.windows.remove(index);
        }
        self.schedule_frames();
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_wm_base::XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let Some(surface_id) = surface.data::<SurfaceId>().copied() else {
                    resource.post_error(
                        xdg_wm_base::Error::InvalidSurfaceState,
                        "surface is not known to this compositor",
                    );
                    return;
                };
                if state.window_index_for_surface(surface_id).is_some() {
                    resource.post_error(
                        xdg_wm_base::Error::Role,
                        "surface already has an xdg_surface",
                    );
                    return;
                }

                let window_id = state.alloc_window_id();
                let xdg_surface = data_init.init(id, window_id);
                state
                    .windows
                    .push(Window::new(window_id, surface_id, xdg_surface));
                tracing::debug!(total = state.windows.len(), "xdg_surface created");
            }
            xdg_wm_base::Request::CreatePositioner { id } => {
                data_init.init(id, ());
            }
            xdg_wm_base::Request::Pong { .. } => {}
            xdg_wm_base::Request::Destroy => {}
            _ => {}
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, WindowId> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &xdg_surface::XdgSurface,
        request: xdg_surface::Request,
        data: &WindowId,
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                let toplevel = data_init.init(id, *data);
                if let Some(index) = state.window_index(*data) {
                    state.windows[index].toplevel = Some(toplevel);
                    tracing::debug!("xdg_toplevel created");
                }
            }
            xdg_surface::Request::GetPopup { id, .. } => {
                // Popup positioning is out of scope; the object is inert.
                data_init.init(id, ());
            }
            xdg_surface::Request::SetWindowGeometry { width, height, .. } => {
                if let Some(index) = state.window_index(*data) {
                    let window = &mut state.windows[index];
                    if window.width != width || window.height != height {
                        window.width = width;
                        window.height = height;
                    }
                }
            }
            xdg_surface::Request::AckConfigure { serial } => {
                if let Some(index) = state.window_index(*data) {
                    let window = &mut state.windows[index];
                    if window.pending_serial == serial {
                        window.pending_configure = false;
                    }
                }
            }
            xdg_surface::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &xdg_surface::XdgSurface,
        data: &WindowId,
    ) {
        if let Some(index) = state.window_index(*data) {
            state.remove_window(index);
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, WindowId> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &xdg_toplevel::XdgToplevel,
        request: xdg_toplevel::Request,
        data: &WindowId,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let id = *data;
        match request {
            xdg_toplevel::Request::SetTitle { title } => {
                if let Some(index) = state.window_index(id) {
                    state.windows[index].title = Some(title);
                    state.emit_window_event(WindowEvent::TitleChange, id);
                }
            }
            xdg_toplevel::Request::SetAppId { app_id } => {
                if let Some(index) = state.window_index(id) {
                    state.windows[index].app_id = Some(app_id);
                }
            }
            xdg_toplevel::Request::SetFullscreen { .. } => {
                if let Some(index) = state.window_index(id) {
                    state.windows[index].fullscreen = true;
                    state.emit_window_event(WindowEvent::Fullscreen, id);
                }
            }
            xdg_toplevel::Request::UnsetFullscreen => {
                if let Some(index) = state.window_index(id) {
                    state.windows[index].fullscreen = false;
                    state.emit_window_event(WindowEvent::Fullscreen, id);
                }
            }
            // The core never moves or resizes on its own; the host's
            // placement policy is notified and decides.
            xdg_toplevel::Request::Move { .. } => {
                state.emit_window_event(WindowEvent::RequestMove, id);
            }
            xdg_toplevel::Request::Resize { .. } => {
                state.emit_window_event(WindowEvent::RequestResize, id);
            }
            // Accepted and ignored.
            xdg_toplevel::Request::SetParent { .. }
            | xdg_toplevel::Request::ShowWindowMenu { .. }
            | xdg_toplevel::Request::SetMaxSize { .. }
            | xdg_toplevel::Request::SetMinSize { .. }
            | xdg_toplevel::Request::SetMaximized
            | xdg_toplevel::Request::UnsetMaximized
            | xdg_toplevel::Request::SetMinimized => {}
            xdg_toplevel::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &xdg_toplevel::XdgToplevel,
        data: &WindowId,
    ) {
        if let Some(index) = state.window_index(*data) {
            state.windows[index].toplevel = None;
        }
    }
}

impl Dispatch<xdg_positioner::XdgPositioner, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &xdg_positioner::XdgPositioner,
        _request: xdg_positioner::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

impl Dispatch<xdg_popup::XdgPopup, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &xdg_popup::XdgPopup,
        _request: xdg_popup::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}
