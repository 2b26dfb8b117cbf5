//! libinput integration: a udev-backed context on the configured seat, and
//! the translation of its events into focus routing, wire events and
//! embedding callbacks. Device nodes are opened directly, so the compositor
//! needs the privileges of a real seat (typically: run from a TTY as root or
//! with the `input`/`video` groups).

use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use input::event::device::DeviceEvent;
use input::event::keyboard::{KeyState, KeyboardEvent, KeyboardEventTrait};
use input::event::pointer::{ButtonState, PointerEvent};
use input::event::{Event, EventTrait};
use input::{Libinput, LibinputInterface};
use libc::{O_RDONLY, O_RDWR, O_WRONLY};

use crate::callbacks::{InputEvent, InputEventKind};
use crate::config;
use crate::error::StartupError;
use crate::state::{State, SurfaceId};

struct Interface;

impl LibinputInterface for Interface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        OpenOptions::new()
            .custom_flags(flags)
            .read((flags & O_RDONLY != 0) | (flags & O_RDWR != 0))
            .write((flags & O_WRONLY != 0) | (flags & O_RDWR != 0))
            .open(path)
            .map(Into::into)
            .map_err(|err| err.raw_os_error().unwrap_or(-1))
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(File::from(fd));
    }
}

pub fn create_context() -> Result<Libinput, StartupError> {
    let mut libinput = Libinput::new_with_udev(Interface);
    libinput
        .udev_assign_seat(config::SEAT_NAME)
        .map_err(|()| StartupError::Seat(config::SEAT_NAME.to_string()))?;
    Ok(libinput)
}

/// Keep the cursor inside the given output rectangle.
pub(crate) fn clamp_pointer(x: f64, y: f64, ox: i32, oy: i32, width: i32, height: i32) -> (f64, f64) {
    (
        x.clamp(ox as f64, (ox + width - 1) as f64),
        y.clamp(oy as f64, (oy + height - 1) as f64),
    )
}

impl State {
    /// Drain libinput after fd readiness. The context handle is refcounted,
    /// so a clone lets the events borrow it while `self` is handed to the
    /// per-event handlers.
    pub(crate) fn dispatch_input(&mut self) {
        let mut libinput = self.libinput.clone();
        if let Err(err) = libinput.dispatch() {
            tracing::warn!("libinput dispatch failed: {err}");
            return;
        }

        for event in &mut libinput {
            match event {
                Event::Device(DeviceEvent::Added(added)) => {
                    tracing::info!("input device added: {}", added.device().name());
                }
                Event::Keyboard(KeyboardEvent::Key(key)) => {
                    let pressed = key.key_state() == KeyState::Pressed;
                    self.on_keyboard_key(key.key(), pressed);
                }
                Event::Pointer(PointerEvent::Motion(motion)) => {
                    self.on_pointer_motion(motion.dx(), motion.dy());
                }
                Event::Pointer(PointerEvent::Button(button)) => {
                    let pressed = button.button_state() == ButtonState::Pressed;
                    self.on_pointer_button(button.button(), pressed);
                }
                _ => {}
            }
        }
    }

    fn input_snapshot(&self) -> InputEvent {
        InputEvent {
            keycode: 0,
            keysym: 0,
            modifiers: self.keyboard.modifiers,
            button: 0,
            pointer_x: self.pointer_x as i32,
            pointer_y: self.pointer_y as i32,
        }
    }

    fn on_keyboard_key(&mut self, keycode: u32, pressed: bool) {
        let (keysym, mods_changed) = self.keyboard.process_key(keycode, pressed);
        if pressed {
            if !self.pressed_keys.contains(&keycode) {
                self.pressed_keys.push(keycode);
            }
        } else {
            self.pressed_keys.retain(|k| *k != keycode);
        }

        self.send_key_to_focus(keycode, pressed, mods_changed);

        let event = InputEvent {
            keycode,
            keysym,
            ..self.input_snapshot()
        };
        let kind = if pressed {
            InputEventKind::KeyPress
        } else {
            InputEventKind::KeyRelease
        };
        self.emit_input_event(kind, &event);
    }

    fn on_pointer_motion(&mut self, dx: f64, dy: f64) {
        let (mut x, mut y) = (self.pointer_x + dx, self.pointer_y + dy);
        if let Some(output) = self.outputs.first() {
            (x, y) = clamp_pointer(x, y, output.x, output.y, output.width, output.height);
        }
        self.pointer_x = x;
        self.pointer_y = y;

        let under = self.surface_under(x, y);
        self.set_pointer_focus(under);
        self.send_motion_to_focus();

        let event = self.input_snapshot();
        self.emit_input_event(InputEventKind::PointerMotion, &event);
    }

    fn on_pointer_button(&mut self, button: u32, pressed: bool) {
        self.send_button_to_focus(button, pressed);

        let event = InputEvent {
            button,
            ..self.input_snapshot()
        };
        let kind = if pressed {
            InputEventKind::ButtonPress
        } else {
            InputEventKind::ButtonRelease
        };
        self.emit_input_event(kind, &event);
    }

    /// Topmost mapped window under the cursor.
    pub(crate) fn surface_under(&self, x: f64, y: f64) -> Option<SurfaceId> {
        self.windows
            .iter()
            .rev()
            .find(|window| {
                window.mapped
                    && x >= window.x as f64
                    && y >= window.y as f64
                    && x < (window.x + window.width) as f64
                    && y < (window.y + window.height) as f64
            })
            .map(|window| window.surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_clamp_the_pointer_to_the_output_rectangle() {
        assert_eq!(clamp_pointer(-5.0, 10.0, 0, 0, 1920, 1080), (0.0, 10.0));
        assert_eq!(clamp_pointer(5000.0, 2000.0, 0, 0, 1920, 1080), (1919.0, 1079.0));
        assert_eq!(clamp_pointer(100.5, 200.5, 0, 0, 1920, 1080), (100.5, 200.5));
    }

    #[test]
    fn should_clamp_relative_to_the_output_position() {
        assert_eq!(clamp_pointer(0.0, 0.0, 100, 50, 800, 600), (100.0, 50.0));
        assert_eq!(clamp_pointer(1000.0, 700.0, 100, 50, 800, 600), (899.0, 649.0));
    }
}
