use std::os::unix::fs::FileTypeExt;

use wayland_server::ListeningSocket;

#[test]
fn should_bind_an_auto_named_socket_under_the_runtime_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("XDG_RUNTIME_DIR", dir.path());

    let socket =
        ListeningSocket::bind_auto(perch::config::SOCKET_BASENAME, perch::config::SOCKET_RANGE)
            .unwrap();
    let name = socket
        .socket_name()
        .expect("auto-bound sockets carry a name")
        .to_string_lossy()
        .into_owned();
    assert!(name.starts_with(perch::config::SOCKET_BASENAME));

    let path = dir.path().join(&name);
    assert!(
        path.metadata()
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false),
        "{path:?} is not a socket"
    );
}

#[test]
fn should_pick_the_next_free_socket_name() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("XDG_RUNTIME_DIR", dir.path());

    let first =
        ListeningSocket::bind_auto(perch::config::SOCKET_BASENAME, perch::config::SOCKET_RANGE)
            .unwrap();
    let second =
        ListeningSocket::bind_auto(perch::config::SOCKET_BASENAME, perch::config::SOCKET_RANGE)
            .unwrap();

    assert_ne!(first.socket_name(), second.socket_name());
}
