//! `wl_seat` and its keyboard/pointer devices, plus the focus routing rules:
//! leave precedes enter, keyboard enter precedes the modifier broadcast, and
//! events only reach devices belonging to the focused surface's client.

use wayland_server::protocol::{
    wl_keyboard::{self, WlKeyboard},
    wl_pointer::{self, WlPointer},
    wl_seat,
    wl_surface::WlSurface,
    wl_touch,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource};

use crate::config;
use crate::state::{State, SurfaceId};

fn same_client(a: &impl Resource, b: &impl Resource) -> bool {
    match (a.client(), b.client()) {
        (Some(a), Some(b)) => a.id() == b.id(),
        _ => false,
    }
}

impl State {
    /// Keyboards belonging to `surface`'s client, as clones so the caller
    /// does not hold a borrow on the device list.
    fn keyboards_for(&self, surface: &WlSurface) -> Vec<WlKeyboard> {
        self.keyboards
            .iter()
            .filter(|kb| kb.is_alive() && same_client(*kb, surface))
            .cloned()
            .collect()
    }

    fn pointers_for(&self, surface: &WlSurface) -> Vec<WlPointer> {
        self.pointers
            .iter()
            .filter(|p| p.is_alive() && same_client(*p, surface))
            .cloned()
            .collect()
    }

    /// Move keyboard focus. Synchronous: leave to the old surface's client,
    /// then enter (with the pressed-key array) and modifiers to the new one.
    pub(crate) fn set_keyboard_focus(&mut self, new: Option<SurfaceId>) {
        if self.keyboard_focus == new {
            return;
        }

        if let Some(old) = self.keyboard_focus.take() {
            let serial = self.next_serial();
            if let Some(surface) = self.surfaces.get(&old).map(|s| s.resource.clone()) {
                for kb in self.keyboards_for(&surface) {
                    kb.leave(serial, &surface);
                }
            }
        }

        let Some(id) = new else { return };
        if !self.surfaces.contains_key(&id) {
            return;
        }

        self.keyboard_focus = Some(id);
        let serial = self.next_serial();
        let keys: Vec<u8> = self
            .pressed_keys
            .iter()
            .flat_map(|k| k.to_ne_bytes())
            .collect();
        let (depressed, latched, locked, group) = self.keyboard.wire_modifiers();
        let surface = self.surfaces[&id].resource.clone();
        for kb in self.keyboards_for(&surface) {
            kb.enter(serial, &surface, keys.clone());
            kb.modifiers(serial, depressed, latched, locked, group);
        }
    }

    /// Move pointer focus: leave the old surface, enter the new one at the
    /// surface-local cursor position, then a frame to close the batch.
    pub(crate) fn set_pointer_focus(&mut self, new: Option<SurfaceId>) {
        if self.pointer_focus == new {
            return;
        }

        if let Some(old) = self.pointer_focus.take() {
            let serial = self.next_serial();
            if let Some(surface) = self.surfaces.get(&old).map(|s| s.resource.clone()) {
                for pointer in self.pointers_for(&surface) {
                    pointer.leave(serial, &surface);
                    if pointer.version() >= 5 {
                        pointer.frame();
                    }
                }
            }
        }

        let Some(id) = new else { return };
        if !self.surfaces.contains_key(&id) {
            return;
        }

        self.pointer_focus = Some(id);
        let serial = self.next_serial();
        let (sx, sy) = self.surface_local_pointer(id);
        let surface = self.surfaces[&id].resource.clone();
        for pointer in self.pointers_for(&surface) {
            pointer.enter(serial, &surface, sx, sy);
            if pointer.version() >= 5 {
                pointer.frame();
            }
        }
    }

    /// Cursor position in the coordinate space of `surface`'s window.
    pub(crate) fn surface_local_pointer(&self, surface: SurfaceId) -> (f64, f64) {
        match self.window_index_for_surface(surface) {
            Some(index) => (
                self.pointer_x - self.windows[index].x as f64,
                self.pointer_y - self.windows[index].y as f64,
            ),
            None => (self.pointer_x, self.pointer_y),
        }
    }

    pub(crate) fn send_key_to_focus(&mut self, keycode: u32, pressed: bool, mods_changed: bool) {
        let Some(focus) = self.keyboard_focus else { return };
        let serial = self.next_serial();
        let mods_serial = self.next_serial();
        let time = self.now_ms();
        let (depressed, latched, locked, group) = self.keyboard.wire_modifiers();

        let Some(surface) = self.surfaces.get(&focus).map(|s| s.resource.clone()) else {
            return;
        };
        let key_state = if pressed {
            wl_keyboard::KeyState::Pressed
        } else {
            wl_keyboard::KeyState::Released
        };
        for kb in self.keyboards_for(&surface) {
            kb.key(serial, time, keycode, key_state);
            if mods_changed {
                kb.modifiers(mods_serial, depressed, latched, locked, group);
            }
        }
    }

    pub(crate) fn send_button_to_focus(&mut self, button: u32, pressed: bool) {
        let Some(focus) = self.pointer_focus else { return };
        let serial = self.next_serial();
        let time = self.now_ms();
        let Some(surface) = self.surfaces.get(&focus).map(|s| s.resource.clone()) else {
            return;
        };
        let button_state = if pressed {
            wl_pointer::ButtonState::Pressed
        } else {
            wl_pointer::ButtonState::Released
        };
        for pointer in self.pointers_for(&surface) {
            pointer.button(serial, time, button, button_state);
            if pointer.version() >= 5 {
                pointer.frame();
            }
        }
    }

    pub(crate) fn send_motion_to_focus(&mut self) {
        let Some(focus) = self.pointer_focus else { return };
        let time = self.now_ms();
        let (sx, sy) = self.surface_local_pointer(focus);
        let Some(surface) = self.surfaces.get(&focus).map(|s| s.resource.clone()) else {
            return;
        };
        for pointer in self.pointers_for(&surface) {
            pointer.motion(time, sx, sy);
            if pointer.version() >= 5 {
                pointer.frame();
            }
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, ());
                state.keyboard.send_keymap(&keyboard);
                if keyboard.version() >= 4 {
                    keyboard.repeat_info(config::KEY_REPEAT_RATE, config::KEY_REPEAT_DELAY);
                }
                state.keyboards.push(keyboard);
            }
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, ());
                state.pointers.push(pointer);
            }
            wl_seat::Request::GetTouch { id } => {
                // Touch is not in our advertised capabilities; the object
                // is created to keep the client alive but stays silent.
                data_init.init(id, ());
            }
            wl_seat::Request::Release => {}
            _ => {}
        }
    }
}

impl Dispatch<WlKeyboard, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlKeyboard,
        request: wl_keyboard::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_keyboard::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlKeyboard,
        _data: &(),
    ) {
        state.keyboards.retain(|kb| kb.id() != resource.id());
    }
}

impl Dispatch<WlPointer, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            // Received and ignored: the cursor is not composited.
            wl_pointer::Request::SetCursor { .. } => {}
            wl_pointer::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlPointer,
        _data: &(),
    ) {
        state.pointers.retain(|p| p.id() != resource.id());
    }
}

impl Dispatch<wl_touch::WlTouch, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_touch::WlTouch,
        _request: wl_touch::Request,
        _data: &(),
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}
