use super::GpuContext;
use crate::convert::{self, RGBA_BYTES};
use crate::sink::TextureAllocator;
use anyhow::{Context, Result};
use common::Frame;
use std::sync::Arc;

/// Row pitch in bytes for `width` RGBA8 texels, padded for buffer copies
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * RGBA_BYTES as u32;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// A sampled texture holding one video frame
pub struct GpuVideoTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

impl GpuVideoTexture {
    /// Create an empty RGBA8 texture with a linear, clamped sampler
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("GPU Video Texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("GPU Video Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            width,
            height,
        }
    }

    /// Read texture data back to CPU as tightly packed RGBA8
    pub fn read_rgba(&self, context: &GpuContext) -> Result<Vec<u8>> {
        let device = &context.device;
        let unpadded_bytes_per_row = self.width * RGBA_BYTES as u32;
        let padded_bytes_per_row = padded_bytes_per_row(self.width);

        let buffer_size = (padded_bytes_per_row * self.height) as wgpu::BufferAddress;

        // Create staging buffer for GPU -> CPU copy
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GPU Texture Read Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GPU Texture Read Encoder"),
        });

        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );

        context.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        context.wait_idle()?;

        rx.recv()
            .context("Failed to receive buffer mapping result")?
            .context("Failed to map GPU buffer")?;

        let data = buffer_slice.get_mapped_range();

        // Remove row padding
        let mut rgba = Vec::with_capacity((unpadded_bytes_per_row * self.height) as usize);
        for row in data.chunks(padded_bytes_per_row as usize) {
            rgba.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }

        drop(data);
        staging_buffer.unmap();

        Ok(rgba)
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Check a requested size against the device limits
fn check_size(context: &GpuContext, width: u32, height: u32) -> Result<()> {
    let max = context.limits.max_texture_dimension_2d;
    if width == 0 || height == 0 {
        anyhow::bail!("Invalid texture size {}x{}", width, height);
    }
    if width > max || height > max {
        anyhow::bail!(
            "Texture size {}x{} exceeds device limit of {}x{}",
            width,
            height,
            max,
            max
        );
    }
    Ok(())
}

/// Uploads frames with `Queue::write_texture`
pub struct DirectUpload {
    context: Arc<GpuContext>,
    /// Converted pixels, reused across frames
    scratch: Vec<u8>,
}

impl DirectUpload {
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self {
            context,
            scratch: Vec::new(),
        }
    }
}

impl TextureAllocator for DirectUpload {
    type Texture = GpuVideoTexture;

    fn allocate(&mut self, width: u32, height: u32) -> Result<GpuVideoTexture> {
        check_size(&self.context, width, height)?;
        Ok(GpuVideoTexture::new(&self.context.device, width, height))
    }

    fn write(&mut self, texture: &GpuVideoTexture, frame: &Frame<'_>) -> Result<()> {
        let bytes_per_row = texture.width * RGBA_BYTES as u32;
        self.scratch
            .resize((bytes_per_row * texture.height) as usize, 0);
        convert::convert_to_rgba8(frame, &mut self.scratch, bytes_per_row as usize);

        self.context.queue.write_texture(
            texture.texture.as_image_copy(),
            &self.scratch,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(texture.height),
            },
            extent(texture.width, texture.height),
        );
        Ok(())
    }

    fn destroy(&mut self, texture: GpuVideoTexture) {
        texture.texture.destroy();
    }
}

/// Uploads frames through a staging buffer and a buffer-to-texture copy
pub struct StagedUpload {
    context: Arc<GpuContext>,
}

impl StagedUpload {
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self { context }
    }
}

impl TextureAllocator for StagedUpload {
    type Texture = GpuVideoTexture;

    fn allocate(&mut self, width: u32, height: u32) -> Result<GpuVideoTexture> {
        check_size(&self.context, width, height)?;
        Ok(GpuVideoTexture::new(&self.context.device, width, height))
    }

    fn write(&mut self, texture: &GpuVideoTexture, frame: &Frame<'_>) -> Result<()> {
        let device = &self.context.device;
        let padded_bytes_per_row = padded_bytes_per_row(texture.width);
        let size = (padded_bytes_per_row * texture.height) as wgpu::BufferAddress;

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GPU Video Upload Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });

        {
            let mut mapped = staging_buffer.get_mapped_range_mut(..);
            convert::convert_to_rgba8(frame, &mut mapped, padded_bytes_per_row as usize);
        }
        staging_buffer.unmap();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GPU Video Upload Encoder"),
        });

        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(texture.height),
                },
            },
            texture.texture.as_image_copy(),
            extent(texture.width, texture.height),
        );

        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn destroy(&mut self, texture: GpuVideoTexture) {
        texture.texture.destroy();
    }
}
