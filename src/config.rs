//! Compile-time knobs. Everything here is a plain constant; there is no
//! runtime configuration surface beyond `$XDG_RUNTIME_DIR` (consumed by the
//! socket) and the embedding API.

/// KMS nodes probed in order at startup.
pub const DRM_CARDS: &[&str] = &["/dev/dri/card0", "/dev/dri/card1"];

/// Seat assigned to the libinput udev context and advertised on `wl_seat`.
pub const SEAT_NAME: &str = "seat0";

/// Basename for the listening socket; the runtime appends the first free
/// index in `SOCKET_RANGE`, yielding `wayland-1`, `wayland-2`, ...
pub const SOCKET_BASENAME: &str = "wayland";
pub const SOCKET_RANGE: std::ops::Range<usize> = 1..33;

/// Background color of every output, RGBA.
pub const CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.3, 1.0];

/// Key repeat settings sent to v4+ keyboards, per `wl_keyboard.repeat_info`.
pub const KEY_REPEAT_RATE: i32 = 25;
pub const KEY_REPEAT_DELAY: i32 = 600;

/// Offset between evdev keycodes (as delivered by libinput) and XKB keycodes.
pub const XKB_KEYCODE_OFFSET: u32 = 8;

/// Protocol versions advertised for our globals.
pub const COMPOSITOR_VERSION: u32 = 6;
pub const SHM_VERSION: u32 = 1;
pub const SUBCOMPOSITOR_VERSION: u32 = 1;
pub const DATA_DEVICE_MANAGER_VERSION: u32 = 3;
pub const SEAT_VERSION: u32 = 7;
pub const OUTPUT_VERSION: u32 = 3;
pub const XDG_WM_BASE_VERSION: u32 = 3;
