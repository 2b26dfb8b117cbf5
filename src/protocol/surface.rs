//! `wl_surface` and its double-buffered state. Requests stage changes into
//! `pending`; `commit` promotes them into `current` atomically, uploads the
//! attached buffer into the surface texture, releases the buffer, maps the
//! backing window on the first commit that carries content, and schedules a
//! frame on every output.
//!
//! `wl_region`, `wl_subcompositor` and `wl_subsurface` also live here: they
//! are accepted so clients can use them, but their state is never consulted.

use wayland_server::protocol::{
    wl_buffer::WlBuffer, wl_callback::WlCallback, wl_region, wl_subcompositor, wl_subsurface,
    wl_surface,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource};

use crate::callbacks::WindowEvent;
use crate::protocol::shm::ShmBufferData;
use crate::state::{State, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Bounding box of two damage rectangles.
    pub fn union(self, other: Rect) -> Rect {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        Rect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }
}

/// One half of the double-buffered surface state. Generic over the frame
/// callback handle so the promotion step can be exercised in tests.
pub struct SurfaceState<C = WlCallback> {
    pub buffer: Option<WlBuffer>,
    pub buffer_attached: bool,
    pub attach_x: i32,
    pub attach_y: i32,
    pub damage: Option<Rect>,
    pub frame_callbacks: Vec<C>,
}

impl<C> Default for SurfaceState<C> {
    fn default() -> Self {
        Self {
            buffer: None,
            buffer_attached: false,
            attach_x: 0,
            attach_y: 0,
            damage: None,
            frame_callbacks: Vec::new(),
        }
    }
}

/// The atomic part of commit. Returns true when a newly attached buffer
/// (possibly null) was promoted; upload and release only happen then, so a
/// second commit without an intervening attach is a no-op for the buffer.
pub(crate) fn promote<C>(pending: &mut SurfaceState<C>, current: &mut SurfaceState<C>) -> bool {
    let newly_attached = pending.buffer_attached;
    if newly_attached {
        current.buffer = pending.buffer.take();
        current.attach_x = pending.attach_x;
        current.attach_y = pending.attach_y;
        pending.buffer_attached = false;
    }
    if let Some(damage) = pending.damage.take() {
        current.damage = Some(match current.damage {
            Some(existing) => existing.union(damage),
            None => damage,
        });
    }
    current.frame_callbacks.append(&mut pending.frame_callbacks);
    newly_attached
}

/// Server-side shadow of a client drawable.
pub struct Surface {
    pub resource: wl_surface::WlSurface,
    pub pending: SurfaceState,
    pub current: SurfaceState,
    pub texture: Option<glow::NativeTexture>,
    pub tex_width: i32,
    pub tex_height: i32,
    pub has_content: bool,
}

impl Surface {
    pub(crate) fn new(resource: wl_surface::WlSurface) -> Self {
        Self {
            resource,
            pending: SurfaceState::default(),
            current: SurfaceState::default(),
            texture: None,
            tex_width: 0,
            tex_height: 0,
            has_content: false,
        }
    }
}

impl State {
    pub(crate) fn commit_surface(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };

        let newly_attached = promote(&mut surface.pending, &mut surface.current);
        if newly_attached {
            match surface.current.buffer.clone() {
                Some(buffer) if buffer.is_alive() => {
                    if let Some(data) = buffer.data::<ShmBufferData>() {
                        let bound = self
                            .outputs
                            .first()
                            .is_some_and(|output| self.egl.make_current(output.egl_surface).is_ok());
                        let pool = data.pool.lock().unwrap();
                        let len = data.stride as usize * data.height as usize;
                        match pool.bytes(data.offset as usize, len) {
                            Some(bytes) => {
                                if bound {
                                    self.renderer.upload(
                                        &mut surface.texture,
                                        data.width,
                                        data.height,
                                        data.stride,
                                        bytes,
                                    );
                                }
                                surface.tex_width = data.width;
                                surface.tex_height = data.height;
                                surface.has_content = true;
                            }
                            None => {
                                drop(pool);
                                surface.resource.post_error(
                                    wl_surface::Error::InvalidSize,
                                    "attached buffer no longer fits its pool",
                                );
                                return;
                            }
                        }
                        drop(pool);
                        buffer.release();
                    }
                    surface.current.damage = None;
                }
                _ => {
                    // Null (or already destroyed) attach: the surface goes
                    // back to showing nothing.
                    surface.current.buffer = None;
                    surface.has_content = false;
                }
            }
        }

        let has_content = surface.has_content;
        let (tex_w, tex_h) = (surface.tex_width, surface.tex_height);

        if let Some(index) = self.window_index_for_surface(id) {
            let window = &mut self.windows[index];
            let window_id = window.id;
            if !has_content && window.toplevel.is_some() && !window.initial_configure_sent {
                window.initial_configure_sent = true;
                let (w, h) = (window.width, window.height);
                self.send_configure(window_id, w, h);
            } else if has_content && !window.mapped {
                if window.width == 0 || window.height == 0 {
                    window.width = tex_w;
                    window.height = tex_h;
                }
                window.mapped = true;
                window.initial_configure_sent = true;
                self.emit_window_event(WindowEvent::Create, window_id);
                self.emit_window_event(WindowEvent::Map, window_id);
            }
        }

        self.schedule_frames();
    }

    /// Deliver `done` to every outstanding frame callback. Called once per
    /// rendered output swap; the callback resources are destroyed by the
    /// `done` event itself.
    pub(crate) fn send_frame_done(&mut self, time_ms: u32) {
        for surface in self.surfaces.values_mut() {
            for callback in surface.current.frame_callbacks.drain(..) {
                callback.done(time_ms);
            }
        }
    }

    fn remove_surface(&mut self, id: SurfaceId) {
        // Focus ids are cleared before the surface record goes away.
        if self.keyboard_focus == Some(id) {
            self.keyboard_focus = None;
        }
        if self.pointer_focus == Some(id) {
            self.pointer_focus = None;
        }
        if let Some(index) = self.window_index_for_surface(id) {
            self.remove_window(index);
        }
        if let Some(surface) = self.surfaces.get_mut(&id) {
            if let Some(texture) = surface.texture.take() {
                let bound = self
                    .outputs
                    .first()
                    .is_some_and(|output| self.egl.make_current(output.egl_surface).is_ok());
                if bound {
                    self.renderer.delete_texture(texture);
                }
            }
        }
        self.surfaces.remove(&id);
        self.schedule_frames();
    }
}

impl Dispatch<wl_surface::WlSurface, SurfaceId> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceId,
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                if resource.version() >= 5 && (x != 0 || y != 0) {
                    resource.post_error(
                        wl_surface::Error::InvalidOffset,
                        "attach offsets must be zero on version 5 and above",
                    );
                    return;
                }
                if let Some(surface) = state.surfaces.get_mut(data) {
                    surface.pending.buffer = buffer;
                    surface.pending.attach_x = x;
                    surface.pending.attach_y = y;
                    surface.pending.buffer_attached = true;
                }
            }
            wl_surface::Request::Damage { x, y, width, height }
            | wl_surface::Request::DamageBuffer { x, y, width, height } => {
                if let Some(surface) = state.surfaces.get_mut(data) {
                    let rect = Rect { x, y, width, height };
                    surface.pending.damage = Some(match surface.pending.damage {
                        Some(existing) => existing.union(rect),
                        None => rect,
                    });
                }
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, ());
                if let Some(surface) = state.surfaces.get_mut(data) {
                    surface.pending.frame_callbacks.push(callback);
                } else {
                    callback.done(state.now_ms());
                }
            }
            wl_surface::Request::Commit => {
                state.commit_surface(*data);
            }
            // Accepted, not honored beyond the defaults.
            wl_surface::Request::SetOpaqueRegion { .. }
            | wl_surface::Request::SetInputRegion { .. }
            | wl_surface::Request::SetBufferTransform { .. }
            | wl_surface::Request::SetBufferScale { .. }
            | wl_surface::Request::Offset { .. } => {}
            wl_surface::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_surface::WlSurface,
        data: &SurfaceId,
    ) {
        state.remove_surface(*data);
    }
}

impl Dispatch<WlCallback, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlCallback,
        _request: <WlCallback as Resource>::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

impl Dispatch<wl_region::WlRegion, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_region::WlRegion,
        request: wl_region::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Add { .. }
            | wl_region::Request::Subtract { .. }
            | wl_region::Request::Destroy => {}
            _ => {}
        }
    }
}

impl Dispatch<wl_subcompositor::WlSubcompositor, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_subcompositor::WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_subcompositor::Request::GetSubsurface { id, .. } => {
                // Subsurfaces are tracked as inert objects and flattened
                // away: they are never composited.
                data_init.init(id, ());
            }
            wl_subcompositor::Request::Destroy => {}
            _ => {}
        }
    }
}

impl Dispatch<wl_subsurface::WlSubsurface, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_subsurface::WlSubsurface,
        _request: wl_subsurface::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: i32, y: i32, width: i32, height: i32) -> Rect {
        Rect { x, y, width, height }
    }

    #[test]
    fn should_clear_pending_flags_on_promotion() {
        let mut pending = SurfaceState::<u32>::default();
        let mut current = SurfaceState::<u32>::default();
        pending.buffer_attached = true;
        pending.attach_x = 3;
        pending.attach_y = 4;
        pending.damage = Some(rect(0, 0, 10, 10));
        pending.frame_callbacks.push(7);

        assert!(promote(&mut pending, &mut current));
        assert!(!pending.buffer_attached);
        assert!(pending.damage.is_none());
        assert!(pending.frame_callbacks.is_empty());
        assert_eq!(current.attach_x, 3);
        assert_eq!(current.damage, Some(rect(0, 0, 10, 10)));
        assert_eq!(current.frame_callbacks, vec![7]);
    }

    #[test]
    fn should_splice_callbacks_after_existing_ones() {
        let mut pending = SurfaceState::<u32>::default();
        let mut current = SurfaceState::<u32>::default();
        current.frame_callbacks.push(1);
        pending.frame_callbacks.extend([2, 3]);

        promote(&mut pending, &mut current);
        assert_eq!(current.frame_callbacks, vec![1, 2, 3]);
    }

    #[test]
    fn should_make_a_second_commit_without_attach_a_noop() {
        let mut pending = SurfaceState::<u32>::default();
        let mut current = SurfaceState::<u32>::default();
        pending.buffer_attached = true;
        assert!(promote(&mut pending, &mut current));
        // No new attach staged: nothing to upload or release.
        assert!(!promote(&mut pending, &mut current));
    }

    #[test]
    fn should_union_damage_rectangles() {
        let merged = rect(0, 0, 10, 10).union(rect(20, 5, 10, 10));
        assert_eq!(merged, rect(0, 0, 30, 15));
    }
}
