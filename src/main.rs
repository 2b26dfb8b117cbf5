//! Example host: a master/stack tiling window manager in ~100 lines on top
//! of the perch embedding API. Super+Escape quits.

use perch::{InputEventKind, Modifiers, PerchCompositor, State, WindowEvent};

/// XKB keysym for Escape.
const KEY_ESCAPE: u32 = 0xff1b;

/// Master/stack layout: first window fills the left half, the rest split
/// the right half evenly. A single window gets the whole screen.
fn layout(count: usize, screen_width: i32, screen_height: i32) -> Vec<(i32, i32, i32, i32)> {
    match count {
        0 => Vec::new(),
        1 => vec![(0, 0, screen_width, screen_height)],
        _ => {
            let master_width = screen_width / 2;
            let stack_height = screen_height / (count as i32 - 1);
            let mut slots = vec![(0, 0, master_width, screen_height)];
            for index in 1..count {
                slots.push((
                    master_width,
                    (index as i32 - 1) * stack_height,
                    screen_width - master_width,
                    stack_height,
                ));
            }
            slots
        }
    }
}

fn tile(state: &mut State) {
    let windows = state.windows();
    let Some(&output) = state.outputs().first() else {
        return;
    };
    let slots = layout(
        windows.len(),
        state.output_width(output),
        state.output_height(output),
    );
    for (window, (x, y, width, height)) in windows.into_iter().zip(slots) {
        state.move_window(window, x, y);
        state.resize_window(window, width, height);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut compositor = match PerchCompositor::new() {
        Ok(compositor) => compositor,
        Err(err) => {
            eprintln!("perch: failed to start: {err}");
            std::process::exit(1);
        }
    };

    let state = compositor.state();
    state.on_window_event(WindowEvent::Create, |state, window| {
        tracing::info!(title = ?state.window_title(window), "window created");
        state.focus_window(window);
        tile(state);
    });
    state.on_window_event(WindowEvent::Destroy, |state, _| tile(state));
    state.on_input_event(InputEventKind::KeyPress, |state, input| {
        if input.modifiers.contains(Modifiers::SUPER) && input.keysym == KEY_ESCAPE {
            state.terminate();
        }
    });

    println!("perch: running on {}", state.socket_name());
    if let Err(err) = compositor.run() {
        eprintln!("perch: event loop error: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::layout;

    #[test]
    fn should_give_a_single_window_the_whole_screen() {
        assert_eq!(layout(1, 1920, 1080), vec![(0, 0, 1920, 1080)]);
    }

    #[test]
    fn should_split_master_and_stack() {
        let slots = layout(3, 1920, 1080);
        assert_eq!(slots[0], (0, 0, 960, 1080));
        assert_eq!(slots[1], (960, 0, 960, 540));
        assert_eq!(slots[2], (960, 540, 960, 540));
    }
}
