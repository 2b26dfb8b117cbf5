//! GLES2 compositing: one shader program that maps pixel-space quads to
//! NDC (y-flipped), one shared VBO, and a lazily created texture per
//! surface. Buffers are uploaded as BGRA with `UNPACK_ROW_LENGTH` honoring
//! the client's stride, which needs GL_EXT_unpack_subimage, present on
//! every Mesa GLES2 implementation this targets.

use glow::HasContext;

use crate::config;
use crate::error::StartupError;

/// From GL_EXT_texture_format_BGRA8888; matches ARGB8888/XRGB8888 memory
/// layout on little-endian.
const GL_BGRA_EXT: u32 = 0x80E1;

const VERTEX_SHADER: &str = "\
attribute vec2 pos;
attribute vec2 texcoord;
uniform vec2 screen_size;
uniform vec2 surface_pos;
uniform vec2 surface_size;
varying vec2 v_texcoord;

void main() {
    vec2 pixel = surface_pos + pos * surface_size;
    vec2 ndc = (pixel / screen_size) * 2.0 - 1.0;
    gl_Position = vec4(ndc.x, -ndc.y, 0.0, 1.0);
    v_texcoord = texcoord;
}
";

const FRAGMENT_SHADER: &str = "\
precision mediump float;
varying vec2 v_texcoord;
uniform sampler2D tex;

void main() {
    gl_FragColor = texture2D(tex, v_texcoord);
}
";

// x, y, u, v per vertex, drawn as a TRIANGLE_STRIP.
#[rustfmt::skip]
const QUAD: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0,
    1.0, 0.0, 1.0, 0.0,
    0.0, 1.0, 0.0, 1.0,
    1.0, 1.0, 1.0, 1.0,
];

pub struct GlRenderer {
    gl: glow::Context,
    program: glow::NativeProgram,
    vbo: glow::NativeBuffer,
    u_screen_size: glow::NativeUniformLocation,
    u_surface_pos: glow::NativeUniformLocation,
    u_surface_size: glow::NativeUniformLocation,
}

impl GlRenderer {
    /// Build the composite program. The EGL context must be current.
    pub fn new(gl: glow::Context) -> Result<Self, StartupError> {
        unsafe {
            let vertex = compile_shader(&gl, glow::VERTEX_SHADER, VERTEX_SHADER)?;
            let fragment = compile_shader(&gl, glow::FRAGMENT_SHADER, FRAGMENT_SHADER)?;

            let program = gl.create_program().map_err(StartupError::Renderer)?;
            gl.attach_shader(program, vertex);
            gl.attach_shader(program, fragment);
            gl.bind_attrib_location(program, 0, "pos");
            gl.bind_attrib_location(program, 1, "texcoord");
            gl.link_program(program);
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                return Err(StartupError::Renderer(format!("link failed: {log}")));
            }
            gl.detach_shader(program, vertex);
            gl.detach_shader(program, fragment);
            gl.delete_shader(vertex);
            gl.delete_shader(fragment);

            let locate = |name: &str| {
                gl.get_uniform_location(program, name)
                    .ok_or_else(|| StartupError::Renderer(format!("missing uniform {name}")))
            };
            let u_screen_size = locate("screen_size")?;
            let u_surface_pos = locate("surface_pos")?;
            let u_surface_size = locate("surface_size")?;

            let vbo = gl.create_buffer().map_err(StartupError::Renderer)?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            let bytes = std::slice::from_raw_parts(
                QUAD.as_ptr() as *const u8,
                std::mem::size_of_val(&QUAD),
            );
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STATIC_DRAW);

            Ok(Self {
                gl,
                program,
                vbo,
                u_screen_size,
                u_surface_pos,
                u_surface_size,
            })
        }
    }

    /// Start an output pass: clear and prepare alpha blending.
    pub fn begin(&self, width: i32, height: i32) {
        let [r, g, b, a] = config::CLEAR_COLOR;
        unsafe {
            self.gl.viewport(0, 0, width, height);
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
            self.gl.enable(glow::BLEND);
            self.gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);
        }
    }

    /// Upload a client buffer into the surface texture, creating it on first
    /// use. `stride` is in bytes and may exceed `width * 4`.
    pub fn upload(
        &self,
        texture: &mut Option<glow::NativeTexture>,
        width: i32,
        height: i32,
        stride: i32,
        data: &[u8],
    ) {
        unsafe {
            let tex = match *texture {
                Some(tex) => tex,
                None => {
                    let tex = match self.gl.create_texture() {
                        Ok(tex) => tex,
                        Err(err) => {
                            tracing::warn!("texture creation failed: {err}");
                            return;
                        }
                    };
                    self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
                    self.gl.tex_parameter_i32(
                        glow::TEXTURE_2D,
                        glow::TEXTURE_MIN_FILTER,
                        glow::LINEAR as i32,
                    );
                    self.gl.tex_parameter_i32(
                        glow::TEXTURE_2D,
                        glow::TEXTURE_MAG_FILTER,
                        glow::LINEAR as i32,
                    );
                    self.gl.tex_parameter_i32(
                        glow::TEXTURE_2D,
                        glow::TEXTURE_WRAP_S,
                        glow::CLAMP_TO_EDGE as i32,
                    );
                    self.gl.tex_parameter_i32(
                        glow::TEXTURE_2D,
                        glow::TEXTURE_WRAP_T,
                        glow::CLAMP_TO_EDGE as i32,
                    );
                    *texture = Some(tex);
                    tex
                }
            };

            self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            self.gl
                .pixel_store_i32(glow::UNPACK_ROW_LENGTH, stride / 4);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                GL_BGRA_EXT as i32,
                width,
                height,
                0,
                GL_BGRA_EXT,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(data)),
            );
            self.gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, 0);
        }
    }

    /// Draw one surface quad at its window position, natural texture size.
    pub fn draw_texture(
        &self,
        texture: glow::NativeTexture,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        screen_width: i32,
        screen_height: i32,
    ) {
        unsafe {
            self.gl.use_program(Some(self.program));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            self.gl
                .vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 16, 0);
            self.gl.enable_vertex_attrib_array(0);
            self.gl
                .vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 16, 8);
            self.gl.enable_vertex_attrib_array(1);

            self.gl.uniform_2_f32(
                Some(&self.u_screen_size),
                screen_width as f32,
                screen_height as f32,
            );
            self.gl
                .uniform_2_f32(Some(&self.u_surface_pos), x as f32, y as f32);
            self.gl
                .uniform_2_f32(Some(&self.u_surface_size), width as f32, height as f32);

            self.gl.active_texture(glow::TEXTURE0);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
        }
    }

    pub fn delete_texture(&self, texture: glow::NativeTexture) {
        unsafe { self.gl.delete_texture(texture) };
    }

    /// Delete the program and VBO. The context must still be current.
    pub fn destroy(&self) {
        unsafe {
            self.gl.delete_buffer(self.vbo);
            self.gl.delete_program(self.program);
        }
    }
}

unsafe fn compile_shader(
    gl: &glow::Context,
    kind: u32,
    source: &str,
) -> Result<glow::NativeShader, StartupError> {
    let shader = gl.create_shader(kind).map_err(StartupError::Renderer)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(StartupError::Renderer(format!("shader compile failed: {log}")));
    }
    Ok(shader)
}
