/// GPU texture module using wgpu
///
/// Decoded frames are converted to RGBA8 and uploaded into a sampled
/// texture by one of two strategies:
/// - `DirectUpload`: `Queue::write_texture` from tightly packed rows
/// - `StagedUpload`: fill a mapped staging buffer, then record a
///   buffer-to-texture copy
///
/// Architecture:
/// - `context`: wgpu device/queue management
/// - `texture`: video texture, upload strategies and readback
pub mod context;
pub mod texture;

pub use context::GpuContext;
pub use texture::{DirectUpload, GpuVideoTexture, StagedUpload};

use crate::config::UploadPath;
use crate::sink::{SlotSink, TextureSink};
use common::Frame;
use std::sync::Arc;

/// GPU capabilities relevant to texture upload
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub adapter_name: String,
    pub backend: String,
    pub max_texture_size: u32,
    /// Whether buffer-to-texture copies are the better upload path
    pub prefers_staged_upload: bool,
}

impl GpuCapabilities {
    pub fn log_info(&self) {
        log::info!("GPU Capabilities:");
        log::info!("  Adapter: {}", self.adapter_name);
        log::info!("  Backend: {}", self.backend);
        log::info!(
            "  Max Texture Size: {}x{}",
            self.max_texture_size,
            self.max_texture_size
        );
        log::info!(
            "  Preferred Upload: {}",
            if self.prefers_staged_upload {
                "staged"
            } else {
                "direct"
            }
        );
    }

    /// Turn `Auto` into a concrete upload path for this adapter
    pub fn resolve(&self, requested: UploadPath) -> UploadPath {
        match requested {
            UploadPath::Auto if self.prefers_staged_upload => UploadPath::Staged,
            UploadPath::Auto => UploadPath::Direct,
            path => path,
        }
    }
}

/// Texture sink backed by one of the wgpu upload strategies
pub enum GpuTextureSink {
    Direct(SlotSink<DirectUpload>),
    Staged(SlotSink<StagedUpload>),
}

/// Create a texture sink, picking the upload strategy once
pub fn create_sink(context: Arc<GpuContext>, requested: UploadPath) -> GpuTextureSink {
    let capabilities = context.capabilities();
    let path = capabilities.resolve(requested);
    log::info!(
        "Using {} texture upload ({} requested, {} backend)",
        path.name(),
        requested.name(),
        capabilities.backend
    );

    match path {
        UploadPath::Staged => GpuTextureSink::Staged(SlotSink::new(StagedUpload::new(context))),
        UploadPath::Direct | UploadPath::Auto => {
            GpuTextureSink::Direct(SlotSink::new(DirectUpload::new(context)))
        }
    }
}

impl GpuTextureSink {
    /// The current texture, if one is allocated
    pub fn texture(&self) -> Option<&GpuVideoTexture> {
        match self {
            Self::Direct(sink) => sink.texture(),
            Self::Staged(sink) => sink.texture(),
        }
    }

    pub fn upload_path(&self) -> UploadPath {
        match self {
            Self::Direct(_) => UploadPath::Direct,
            Self::Staged(_) => UploadPath::Staged,
        }
    }

    fn inner(&self) -> &dyn TextureSink {
        match self {
            Self::Direct(sink) => sink,
            Self::Staged(sink) => sink,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TextureSink {
        match self {
            Self::Direct(sink) => sink,
            Self::Staged(sink) => sink,
        }
    }
}

impl TextureSink for GpuTextureSink {
    fn upload(&mut self, frame: &Frame<'_>) -> bool {
        self.inner_mut().upload(frame)
    }

    fn handle(&self) -> u32 {
        self.inner().handle()
    }

    fn width(&self) -> u32 {
        self.inner().width()
    }

    fn height(&self) -> u32 {
        self.inner().height()
    }

    fn release(&mut self) {
        self.inner_mut().release();
    }

    fn reallocations(&self) -> u64 {
        self.inner().reallocations()
    }
}
