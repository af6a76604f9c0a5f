//! WGSL generation for the stencil kernels.
//!
//! One shader is generated per `(bucket, exact)` pair. The exact variant
//! bakes its tap counts in as constants and drops the tap offset; the
//! within variant reads kernel extent and offset from the uniforms. Both
//! size the coefficient array for the bucket's largest kernel, packed into
//! `vec4`s as uniform arrays require a 16-byte stride.
//!
//! # Bind Group 0
//!
//! - Binding 0: params (uniform) - `StencilUniforms`
//! - Binding 1: coeffs (uniform) - `array<vec4<f32>, N>`
//! - Binding 2: src (storage, read) - source tile
//! - Binding 3: dst (storage, read_write) - destination tile
//!
//! # Workgroup Size
//!
//! `[8, 8, 1]`, one invocation per output element.

use crate::bucket::RadiusBucket;
use crate::stencil::Specialization;

/// Entry point of every generated stencil shader.
pub const STENCIL_ENTRY_POINT: &str = "stencil_main";

/// Workgroup edge length in both dimensions.
pub const STENCIL_WORKGROUP_EDGE: u32 = 8;

/// Number of `vec4` coefficient slots reserved for `bucket`.
pub fn coefficient_vec4s(bucket: RadiusBucket) -> usize {
    let taps = bucket.rows.exact_extent() * bucket.cols.exact_extent();
    taps.div_ceil(4)
}

/// Generates the stencil shader for `spec`.
pub fn generate_stencil_shader(spec: &Specialization) -> String {
    let taps_x = spec.bucket.cols.exact_extent();
    let taps_y = spec.bucket.rows.exact_extent();
    let (rows, cols, tap_x, tap_y) = if spec.exact {
        ("TAPS_Y", "TAPS_X", "0u", "0u")
    } else {
        (
            "params.kernel_height",
            "params.kernel_width",
            "params.tap_x",
            "params.tap_y",
        )
    };

    format!(
        r#"// {label}
struct Params {{
    out_width: u32,
    out_height: u32,
    src_pitch: u32,
    dst_pitch: u32,
    kernel_width: u32,
    kernel_height: u32,
    tap_x: u32,
    tap_y: u32,
}}

const TAPS_X: u32 = {taps_x}u;
const TAPS_Y: u32 = {taps_y}u;
const COEFF_VEC4S: u32 = {vec4s}u;

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<uniform> coeffs: array<vec4<f32>, COEFF_VEC4S>;
@group(0) @binding(2) var<storage, read> src: array<f32>;
@group(0) @binding(3) var<storage, read_write> dst: array<f32>;

fn coeff(k: u32) -> f32 {{
    return coeffs[k / 4u][k % 4u];
}}

@compute @workgroup_size({edge}, {edge}, 1)
fn {entry}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let x = gid.x;
    let y = gid.y;
    if (x >= params.out_width || y >= params.out_height) {{
        return;
    }}

    var acc: f32 = 0.0;
    for (var ky = 0u; ky < {rows}; ky++) {{
        let base = (y + {tap_y} + ky) * params.src_pitch + x + {tap_x};
        for (var kx = 0u; kx < {cols}; kx++) {{
            acc += coeff(ky * {cols} + kx) * src[base + kx];
        }}
    }}
    dst[y * params.dst_pitch + x] = acc;
}}
"#,
        label = spec,
        taps_x = taps_x,
        taps_y = taps_y,
        vec4s = coefficient_vec4s(spec.bucket),
        edge = STENCIL_WORKGROUP_EDGE,
        entry = STENCIL_ENTRY_POINT,
        rows = rows,
        cols = cols,
        tap_x = tap_x,
        tap_y = tap_y,
    )
}
