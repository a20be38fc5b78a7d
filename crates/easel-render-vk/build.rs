use std::{env, fs, path::PathBuf};

// Spinning triangle drawn into the canvas. Geometry is generated from
// gl_VertexIndex so the pipeline has no vertex input.
const TRI_VERT: &str = r#"
#version 450
layout(push_constant) uniform Push { float angle; float aspect; } pc;
layout(location = 0) out vec3 vColor;

const vec2 POS[3] = vec2[](vec2(0.0, -0.6), vec2(0.55, 0.45), vec2(-0.55, 0.45));
const vec3 COL[3] = vec3[](vec3(1.0, 0.3, 0.2), vec3(0.2, 1.0, 0.4), vec3(0.3, 0.4, 1.0));

void main() {
    float c = cos(pc.angle);
    float s = sin(pc.angle);
    vec2 p = mat2(c, s, -s, c) * POS[gl_VertexIndex];
    p.x /= pc.aspect;
    vColor = COL[gl_VertexIndex];
    gl_Position = vec4(p, 0.5, 1.0);
}
"#;

const TRI_FRAG: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

// Textured quad covering pc.rect (x0, y0, x1, y1 in NDC).
const QUAD_VERT: &str = r#"
#version 450
layout(push_constant) uniform Push { vec4 rect; } pc;
layout(location = 0) out vec2 vUv;

const vec2 CORNERS[6] = vec2[](
    vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(1.0, 1.0),
    vec2(0.0, 0.0), vec2(1.0, 1.0), vec2(0.0, 1.0)
);

void main() {
    vec2 t = CORNERS[gl_VertexIndex];
    vUv = t;
    gl_Position = vec4(mix(pc.rect.xy, pc.rect.zw, t), 0.0, 1.0);
}
"#;

const QUAD_FRAG: &str = r#"
#version 450
layout(set = 0, binding = 0) uniform sampler2D canvas;
layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(canvas, vUv);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        ("tri.vert", TRI_VERT, shaderc::ShaderKind::Vertex),
        ("tri.frag", TRI_FRAG, shaderc::ShaderKind::Fragment),
        ("quad.vert", QUAD_VERT, shaderc::ShaderKind::Vertex),
        ("quad.frag", QUAD_FRAG, shaderc::ShaderKind::Fragment),
    ];
    for (name, src, kind) in shaders {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
