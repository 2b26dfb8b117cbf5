//! XKB state for the single seat keyboard: the default keymap compiled from
//! system rules, serialized once into an unlinked temp file for clients, and
//! a modifier bitmap derived from the four canonical modifiers.

use std::fs::File;
use std::io::Write;

use wayland_server::protocol::wl_keyboard::{KeymapFormat, WlKeyboard};
use xkbcommon::xkb;

use crate::callbacks::Modifiers;
use crate::config;
use crate::error::StartupError;

pub struct XkbKeyboard {
    _context: xkb::Context,
    state: xkb::State,
    keymap_file: File,
    keymap_size: u32,
    pub modifiers: Modifiers,
}

impl XkbKeyboard {
    pub fn new() -> Result<Self, StartupError> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            "",
            "",
            "",
            "",
            None,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or(StartupError::Keymap)?;
        let state = xkb::State::new(&keymap);

        // Serialized once; every keyboard resource gets the same fd.
        let text = keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1);
        let mut keymap_file = tempfile::tempfile().map_err(StartupError::KeymapFile)?;
        keymap_file
            .write_all(text.as_bytes())
            .and_then(|()| keymap_file.write_all(&[0]))
            .map_err(StartupError::KeymapFile)?;
        let keymap_size = text.len() as u32 + 1;

        Ok(Self {
            _context: context,
            state,
            keymap_file,
            keymap_size,
            modifiers: Modifiers::empty(),
        })
    }

    /// Feed one evdev key event through XKB. Returns the keysym for the
    /// embedding callback and whether the modifier bitmap changed.
    pub(crate) fn process_key(&mut self, evdev_keycode: u32, pressed: bool) -> (u32, bool) {
        let keycode: xkb::Keycode = (evdev_keycode + config::XKB_KEYCODE_OFFSET).into();
        let direction = if pressed {
            xkb::KeyDirection::Down
        } else {
            xkb::KeyDirection::Up
        };
        let keysym = self.state.key_get_one_sym(keycode).raw();
        self.state.update_key(keycode, direction);

        let modifiers = self.current_modifiers();
        let changed = modifiers != self.modifiers;
        self.modifiers = modifiers;
        (keysym, changed)
    }

    fn current_modifiers(&self) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        let pairs = [
            (xkb::MOD_NAME_SHIFT, Modifiers::SHIFT),
            (xkb::MOD_NAME_CTRL, Modifiers::CTRL),
            (xkb::MOD_NAME_ALT, Modifiers::ALT),
            (xkb::MOD_NAME_LOGO, Modifiers::SUPER),
        ];
        for (name, flag) in pairs {
            if self
                .state
                .mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE)
            {
                modifiers |= flag;
            }
        }
        modifiers
    }

    /// The raw XKB masks `wl_keyboard.modifiers` carries.
    pub(crate) fn wire_modifiers(&self) -> (u32, u32, u32, u32) {
        (
            self.state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            self.state.serialize_mods(xkb::STATE_MODS_LATCHED),
            self.state.serialize_mods(xkb::STATE_MODS_LOCKED),
            self.state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        )
    }

    pub(crate) fn send_keymap(&self, keyboard: &WlKeyboard) {
        use std::os::fd::AsFd;
        keyboard.keymap(
            KeymapFormat::XkbV1,
            self.keymap_file.as_fd(),
            self.keymap_size,
        );
    }

    #[cfg(test)]
    pub(crate) fn keymap_len(&self) -> u32 {
        self.keymap_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // evdev keycodes, see input-event-codes.h
    const KEY_ESC: u32 = 1;
    const KEY_LEFTSHIFT: u32 = 42;
    const KEY_LEFTMETA: u32 = 125;

    #[test]
    fn should_compile_and_serialize_the_default_keymap() {
        let keyboard = XkbKeyboard::new().unwrap();
        assert!(keyboard.keymap_len() > 1);
    }

    #[test]
    fn should_track_modifier_state_across_press_and_release() {
        let mut keyboard = XkbKeyboard::new().unwrap();
        assert_eq!(keyboard.modifiers, Modifiers::empty());

        keyboard.process_key(KEY_LEFTSHIFT, true);
        assert_eq!(keyboard.modifiers, Modifiers::SHIFT);

        keyboard.process_key(KEY_LEFTMETA, true);
        assert_eq!(keyboard.modifiers, Modifiers::SHIFT | Modifiers::SUPER);

        keyboard.process_key(KEY_LEFTSHIFT, false);
        keyboard.process_key(KEY_LEFTMETA, false);
        assert_eq!(keyboard.modifiers, Modifiers::empty());
    }

    #[test]
    fn should_resolve_escape_to_its_keysym() {
        let mut keyboard = XkbKeyboard::new().unwrap();
        let (keysym, _) = keyboard.process_key(KEY_ESC, true);
        assert_eq!(keysym, 0xff1b);
    }
}
