//! Embedding-side event surface: the host registers closures per event kind
//! and the compositor invokes them synchronously from the code path that
//! generated the event (a window maps, a key is pressed, ...).

use crate::state::{OutputId, State, WindowId};

/// Window lifecycle and geometry events delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Create,
    Destroy,
    Map,
    Unmap,
    Focus,
    Unfocus,
    Move,
    Resize,
    Fullscreen,
    TitleChange,
    RequestMove,
    RequestResize,
}

const WINDOW_EVENT_KINDS: usize = 12;

/// Input events delivered to the host alongside an [`InputEvent`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEventKind {
    KeyPress,
    KeyRelease,
    ButtonPress,
    ButtonRelease,
    PointerMotion,
}

const INPUT_EVENT_KINDS: usize = 5;

/// Output events. Declared for API completeness; the core enumerates
/// connectors once at startup and never fires these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Connect,
    Disconnect,
    ModeChange,
}

const OUTPUT_EVENT_KINDS: usize = 3;

bitflags::bitflags! {
    /// Modifier bitmap reported with key and button events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const SUPER = 1 << 3;
    }
}

/// Snapshot of one input event, valid for the duration of the callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputEvent {
    pub keycode: u32,
    pub keysym: u32,
    pub modifiers: Modifiers,
    pub button: u32,
    pub pointer_x: i32,
    pub pointer_y: i32,
}

pub type WindowCallback = Box<dyn FnMut(&mut State, WindowId)>;
pub type InputCallback = Box<dyn FnMut(&mut State, &InputEvent)>;
pub type OutputCallback = Box<dyn FnMut(&mut State, OutputId)>;

/// Per-event-kind callback lists. Generic over the context handed to the
/// closures so the registry itself can be exercised without a live display.
pub struct CallbackTable<S> {
    window: [Vec<Box<dyn FnMut(&mut S, WindowId)>>; WINDOW_EVENT_KINDS],
    input: [Vec<Box<dyn FnMut(&mut S, &InputEvent)>>; INPUT_EVENT_KINDS],
    output: [Vec<Box<dyn FnMut(&mut S, OutputId)>>; OUTPUT_EVENT_KINDS],
}

impl<S> Default for CallbackTable<S> {
    fn default() -> Self {
        Self {
            window: std::array::from_fn(|_| Vec::new()),
            input: std::array::from_fn(|_| Vec::new()),
            output: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl<S> CallbackTable<S> {
    pub fn add_window(&mut self, event: WindowEvent, cb: impl FnMut(&mut S, WindowId) + 'static) {
        self.window[event as usize].push(Box::new(cb));
    }

    pub fn add_input(&mut self, event: InputEventKind, cb: impl FnMut(&mut S, &InputEvent) + 'static) {
        self.input[event as usize].push(Box::new(cb));
    }

    pub fn add_output(&mut self, event: OutputEvent, cb: impl FnMut(&mut S, OutputId) + 'static) {
        self.output[event as usize].push(Box::new(cb));
    }
}

// Dispatch temporarily moves the list out of the table so callbacks may
// re-enter the state (register more callbacks, mutate windows, terminate).
// Anything registered for the same event during dispatch is appended after
// the original entries and fires from the next occurrence on.

pub(crate) fn emit_window<S: AsMut<CallbackTable<S>>>(state: &mut S, event: WindowEvent, window: WindowId) {
    let mut list = std::mem::take(&mut state.as_mut().window[event as usize]);
    for cb in list.iter_mut() {
        cb(state, window);
    }
    let registered = std::mem::replace(&mut state.as_mut().window[event as usize], list);
    state.as_mut().window[event as usize].extend(registered);
}

pub(crate) fn emit_input<S: AsMut<CallbackTable<S>>>(state: &mut S, event: InputEventKind, input: &InputEvent) {
    let mut list = std::mem::take(&mut state.as_mut().input[event as usize]);
    for cb in list.iter_mut() {
        cb(state, input);
    }
    let registered = std::mem::replace(&mut state.as_mut().input[event as usize], list);
    state.as_mut().input[event as usize].extend(registered);
}

#[allow(dead_code)]
pub(crate) fn emit_output<S: AsMut<CallbackTable<S>>>(state: &mut S, event: OutputEvent, output: OutputId) {
    let mut list = std::mem::take(&mut state.as_mut().output[event as usize]);
    for cb in list.iter_mut() {
        cb(state, output);
    }
    let registered = std::mem::replace(&mut state.as_mut().output[event as usize], list);
    state.as_mut().output[event as usize].extend(registered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Ctx {
        table: CallbackTable<Ctx>,
        hits: u32,
    }

    impl AsMut<CallbackTable<Ctx>> for Ctx {
        fn as_mut(&mut self) -> &mut CallbackTable<Ctx> {
            &mut self.table
        }
    }

    #[test]
    fn should_dispatch_registered_callbacks_in_order() {
        let mut ctx = Ctx::default();
        let order = Rc::new(Cell::new(0u32));
        let first = order.clone();
        let second = order.clone();
        ctx.table.add_window(WindowEvent::Create, move |_, _| {
            assert_eq!(first.get(), 0);
            first.set(1);
        });
        ctx.table.add_window(WindowEvent::Create, move |_, _| {
            assert_eq!(second.get(), 1);
            second.set(2);
        });

        emit_window(&mut ctx, WindowEvent::Create, WindowId(1));
        assert_eq!(order.get(), 2);
    }

    #[test]
    fn should_only_fire_matching_event_kind() {
        let mut ctx = Ctx::default();
        ctx.table.add_window(WindowEvent::Destroy, |ctx, _| ctx.hits += 1);
        emit_window(&mut ctx, WindowEvent::Create, WindowId(1));
        assert_eq!(ctx.hits, 0);
        emit_window(&mut ctx, WindowEvent::Destroy, WindowId(1));
        assert_eq!(ctx.hits, 1);
    }

    #[test]
    fn should_allow_callbacks_to_mutate_state_and_reregister() {
        let mut ctx = Ctx::default();
        ctx.table.add_input(InputEventKind::KeyPress, |ctx, _| {
            ctx.hits += 1;
            ctx.table.add_input(InputEventKind::KeyPress, |ctx, _| ctx.hits += 10);
        });

        let ev = InputEvent::default();
        emit_input(&mut ctx, InputEventKind::KeyPress, &ev);
        // The nested registration fires from the next event on.
        assert_eq!(ctx.hits, 1);
        emit_input(&mut ctx, InputEventKind::KeyPress, &ev);
        assert_eq!(ctx.hits, 12);
    }

    #[test]
    fn should_expose_the_documented_modifier_bits() {
        assert_eq!(Modifiers::SHIFT.bits(), 1);
        assert_eq!(Modifiers::CTRL.bits(), 2);
        assert_eq!(Modifiers::ALT.bits(), 4);
        assert_eq!(Modifiers::SUPER.bits(), 8);
    }
}
