//! `wl_output` advertisement. One global per physical output; binding one
//! describes the connector's position, mode and scale to the client.

use wayland_server::protocol::wl_output::{self, WlOutput};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource};

use crate::state::{OutputId, State};

impl GlobalDispatch<WlOutput, OutputId> for State {
    fn bind(
        state: &mut Self,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<WlOutput>,
        global_data: &OutputId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let output = data_init.init(resource, *global_data);

        let Some(info) = state.outputs.iter().find(|o| o.id == *global_data) else {
            return;
        };

        output.geometry(
            info.x,
            info.y,
            0,
            0,
            wl_output::Subpixel::Unknown,
            "perch".to_string(),
            info.name.clone(),
            wl_output::Transform::Normal,
        );
        output.mode(
            wl_output::Mode::Current | wl_output::Mode::Preferred,
            info.width,
            info.height,
            info.refresh_mhz,
        );
        if output.version() >= 2 {
            output.scale(1);
            output.done();
        }
    }
}

impl Dispatch<WlOutput, OutputId> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlOutput,
        request: wl_output::Request,
        _data: &OutputId,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_output::Request::Release => {}
            _ => {}
        }
    }
}
