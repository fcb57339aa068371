use super::render_pipeline::ParticleRenderPipeline;

const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.03,
    a: 1.0,
};

/// Clears `texture_view` and draws the particle arena over it.
pub(super) fn record_particle_pass(
    encoder: &mut wgpu::CommandEncoder,
    texture_view: &wgpu::TextureView,
    pipeline: &ParticleRenderPipeline,
    bind_group: &wgpu::BindGroup,
    render_dispatch: &wgpu::Buffer,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("particle render pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: texture_view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(BACKGROUND),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    pipeline.draw(&mut render_pass, bind_group, render_dispatch);
}
