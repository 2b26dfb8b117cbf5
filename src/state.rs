//! Process-wide compositor state. Everything mutable lives here, owned by
//! [`crate::PerchCompositor`]; protocol dispatch, the backends and the
//! renderer all operate on `&mut State`. Cross-references between surfaces,
//! windows and outputs are plain ids into the tables below, so teardown of
//! one object cannot leave another holding a dangling pointer.

use std::collections::HashMap;
use std::time::Instant;

use calloop::{LoopHandle, LoopSignal};
use wayland_server::{DisplayHandle, ListeningSocket};
use wayland_server::protocol::{wl_keyboard::WlKeyboard, wl_pointer::WlPointer};

use crate::backend::egl::EglDevice;
use crate::backend::keyboard::XkbKeyboard;
use crate::backend::kms::{Gpu, Output};
use crate::callbacks::{self, CallbackTable, InputEvent, InputEventKind, OutputEvent, WindowEvent};
use crate::protocol::surface::Surface;
use crate::protocol::xdg_shell::Window;
use crate::render::gles::GlRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputId(pub(crate) u32);

pub struct State {
    pub(crate) dh: DisplayHandle,
    pub(crate) loop_handle: LoopHandle<'static, State>,
    pub(crate) signal: LoopSignal,
    pub(crate) running: bool,
    pub(crate) start: Instant,
    pub(crate) socket: ListeningSocket,
    pub(crate) socket_name: String,
    serial: u32,

    pub(crate) surfaces: HashMap<SurfaceId, Surface>,
    next_surface_id: u32,
    pub(crate) windows: Vec<Window>,
    next_window_id: u32,
    pub(crate) outputs: Vec<Output>,

    pub(crate) keyboards: Vec<WlKeyboard>,
    pub(crate) pointers: Vec<WlPointer>,
    pub(crate) keyboard_focus: Option<SurfaceId>,
    pub(crate) pointer_focus: Option<SurfaceId>,
    pub(crate) pointer_x: f64,
    pub(crate) pointer_y: f64,
    pub(crate) pressed_keys: Vec<u32>,

    pub(crate) keyboard: XkbKeyboard,
    pub(crate) libinput: input::Libinput,
    pub(crate) callbacks: CallbackTable<State>,

    // Graphics stack, declared last so the fallback drop order is
    // renderer, outputs, EGL, GBM/DRM.
    pub(crate) renderer: GlRenderer,
    pub(crate) egl: EglDevice,
    pub(crate) gpu: Gpu,
    shut_down: bool,
}

impl AsMut<CallbackTable<State>> for State {
    fn as_mut(&mut self) -> &mut CallbackTable<State> {
        &mut self.callbacks
    }
}

impl State {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dh: DisplayHandle,
        loop_handle: LoopHandle<'static, State>,
        signal: LoopSignal,
        socket: ListeningSocket,
        socket_name: String,
        keyboard: XkbKeyboard,
        libinput: input::Libinput,
        renderer: GlRenderer,
        egl: EglDevice,
        gpu: Gpu,
        outputs: Vec<Output>,
    ) -> Self {
        Self {
            dh,
            loop_handle,
            signal,
            running: false,
            start: Instant::now(),
            socket,
            socket_name,
            serial: 0,
            surfaces: HashMap::new(),
            next_surface_id: 1,
            windows: Vec::new(),
            next_window_id: 1,
            outputs,
            keyboards: Vec::new(),
            pointers: Vec::new(),
            keyboard_focus: None,
            pointer_focus: None,
            pointer_x: 0.0,
            pointer_y: 0.0,
            pressed_keys: Vec::new(),
            keyboard,
            libinput,
            callbacks: CallbackTable::default(),
            renderer,
            egl,
            gpu,
            shut_down: false,
        }
    }

    /// Fresh serial for events the client echoes back (enter, configure).
    pub(crate) fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    pub(crate) fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    pub(crate) fn alloc_surface_id(&mut self) -> SurfaceId {
        let id = SurfaceId(self.next_surface_id);
        self.next_surface_id += 1;
        id
    }

    pub(crate) fn alloc_window_id(&mut self) -> WindowId {
        let id = WindowId(self.next_window_id);
        self.next_window_id += 1;
        id
    }

    pub(crate) fn window_index(&self, id: WindowId) -> Option<usize> {
        self.windows.iter().position(|w| w.id == id)
    }

    pub(crate) fn window_index_for_surface(&self, surface: SurfaceId) -> Option<usize> {
        self.windows.iter().position(|w| w.surface == surface)
    }

    pub(crate) fn emit_window_event(&mut self, event: WindowEvent, window: WindowId) {
        callbacks::emit_window(self, event, window);
    }

    pub(crate) fn emit_input_event(&mut self, event: InputEventKind, input: &InputEvent) {
        callbacks::emit_input(self, event, input);
    }

    /// Render every output. Outputs with a page flip in flight return
    /// immediately, which coalesces bursts of scheduling requests.
    pub(crate) fn schedule_frames(&mut self) {
        for index in 0..self.outputs.len() {
            self.render_output(index);
        }
    }

    // ---- Embedding API ----------------------------------------------------

    /// Register a window event callback.
    pub fn on_window_event(&mut self, event: WindowEvent, cb: impl FnMut(&mut State, WindowId) + 'static) {
        self.callbacks.add_window(event, cb);
    }

    /// Register an input event callback.
    pub fn on_input_event(&mut self, event: InputEventKind, cb: impl FnMut(&mut State, &InputEvent) + 'static) {
        self.callbacks.add_input(event, cb);
    }

    /// Register an output event callback.
    pub fn on_output_event(&mut self, event: OutputEvent, cb: impl FnMut(&mut State, OutputId) + 'static) {
        self.callbacks.add_output(event, cb);
    }

    /// Name of the listening socket under `$XDG_RUNTIME_DIR`, e.g. `wayland-1`.
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    /// Ask the event loop to exit; `run` returns after the current iteration.
    pub fn terminate(&mut self) {
        self.running = false;
        self.signal.stop();
    }

    pub fn pointer_x(&self) -> i32 {
        self.pointer_x as i32
    }

    pub fn pointer_y(&self) -> i32 {
        self.pointer_y as i32
    }

    /// Mapped windows in stacking order (bottom first).
    pub fn windows(&self) -> Vec<WindowId> {
        self.windows.iter().filter(|w| w.mapped).map(|w| w.id).collect()
    }

    pub fn window_x(&self, id: WindowId) -> i32 {
        self.window_index(id).map_or(0, |i| self.windows[i].x)
    }

    pub fn window_y(&self, id: WindowId) -> i32 {
        self.window_index(id).map_or(0, |i| self.windows[i].y)
    }

    pub fn window_width(&self, id: WindowId) -> i32 {
        self.window_index(id).map_or(0, |i| self.windows[i].width)
    }

    pub fn window_height(&self, id: WindowId) -> i32 {
        self.window_index(id).map_or(0, |i| self.windows[i].height)
    }

    pub fn window_title(&self, id: WindowId) -> Option<&str> {
        self.window_index(id).and_then(|i| self.windows[i].title.as_deref())
    }

    pub fn window_app_id(&self, id: WindowId) -> Option<&str> {
        self.window_index(id).and_then(|i| self.windows[i].app_id.as_deref())
    }

    pub fn window_is_fullscreen(&self, id: WindowId) -> bool {
        self.window_index(id).is_some_and(|i| self.windows[i].fullscreen)
    }

    pub fn window_is_focused(&self, id: WindowId) -> bool {
        self.window_index(id).is_some_and(|i| self.windows[i].focused)
    }

    /// Move a window. Takes effect on the next composited frame.
    pub fn move_window(&mut self, id: WindowId, x: i32, y: i32) {
        let Some(index) = self.window_index(id) else { return };
        self.windows[index].x = x;
        self.windows[index].y = y;
        self.emit_window_event(WindowEvent::Move, id);
        self.schedule_frames();
    }

    /// Propose a new size to the client via the configure protocol.
    pub fn resize_window(&mut self, id: WindowId, width: i32, height: i32) {
        if self.window_index(id).is_none() {
            return;
        }
        self.send_configure(id, width, height);
        self.emit_window_event(WindowEvent::Resize, id);
    }

    /// Give a window keyboard focus, unfocusing the previous holder.
    pub fn focus_window(&mut self, id: WindowId) {
        let Some(index) = self.window_index(id) else { return };
        if self.windows[index].focused {
            return;
        }

        if let Some(old) = self.windows.iter().position(|w| w.focused) {
            self.windows[old].focused = false;
            let old_id = self.windows[old].id;
            let (w, h) = (self.windows[old].width, self.windows[old].height);
            self.send_configure(old_id, w, h);
            self.emit_window_event(WindowEvent::Unfocus, old_id);
        }

        let Some(index) = self.window_index(id) else { return };
        self.windows[index].focused = true;
        let surface = self.windows[index].surface;
        let (w, h) = (self.windows[index].width, self.windows[index].height);
        self.send_configure(id, w, h);
        self.set_keyboard_focus(Some(surface));
        self.emit_window_event(WindowEvent::Focus, id);
    }

    /// Ask the client to close; it decides whether to tear the window down.
    pub fn close_window(&mut self, id: WindowId) {
        let Some(index) = self.window_index(id) else { return };
        if let Some(toplevel) = &self.windows[index].toplevel {
            toplevel.close();
        }
    }

    pub fn set_fullscreen(&mut self, id: WindowId, fullscreen: bool) {
        let Some(index) = self.window_index(id) else { return };
        if self.windows[index].fullscreen == fullscreen {
            return;
        }
        self.windows[index].fullscreen = fullscreen;
        let (w, h) = (self.windows[index].width, self.windows[index].height);
        self.send_configure(id, w, h);
        self.emit_window_event(WindowEvent::Fullscreen, id);
    }

    pub fn outputs(&self) -> Vec<OutputId> {
        self.outputs.iter().map(|o| o.id).collect()
    }

    fn output_index(&self, id: OutputId) -> Option<usize> {
        self.outputs.iter().position(|o| o.id == id)
    }

    pub fn output_x(&self, id: OutputId) -> i32 {
        self.output_index(id).map_or(0, |i| self.outputs[i].x)
    }

    pub fn output_y(&self, id: OutputId) -> i32 {
        self.output_index(id).map_or(0, |i| self.outputs[i].y)
    }

    pub fn output_width(&self, id: OutputId) -> i32 {
        self.output_index(id).map_or(0, |i| self.outputs[i].width)
    }

    pub fn output_height(&self, id: OutputId) -> i32 {
        self.output_index(id).map_or(0, |i| self.outputs[i].height)
    }

    pub fn output_name(&self, id: OutputId) -> Option<&str> {
        self.output_index(id).map(|i| self.outputs[i].name.as_str())
    }

    // ---- Teardown ---------------------------------------------------------

    /// Release the graphics stack in reverse construction order. Safe to
    /// call more than once; also invoked from the compositor's `Drop`.
    pub(crate) fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        // GL object deletion needs a current context.
        if let Some(output) = self.outputs.first() {
            if self.egl.make_current(output.egl_surface).is_ok() {
                for surface in self.surfaces.values_mut() {
                    if let Some(texture) = surface.texture.take() {
                        self.renderer.delete_texture(texture);
                    }
                }
                self.renderer.destroy();
            }
        }
        self.egl.unbind();

        for output in self.outputs.drain(..) {
            output.teardown(&self.egl, &self.gpu);
        }
        self.egl.destroy();

        tracing::info!("compositor shut down");
    }
}
