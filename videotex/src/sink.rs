//! Texture sinks
//!
//! A [`TextureSink`] owns one GPU texture and keeps it matching the last
//! video frame handed to it. [`SlotSink`] holds the reuse logic every sink
//! shares: the texture object is kept while frame dimensions stay the same
//! and replaced when they change. The actual GPU calls live behind
//! [`TextureAllocator`].

use anyhow::Result;
use common::Frame;
use std::sync::atomic::{AtomicU32, Ordering};

/// Destination for displayed video frames
pub trait TextureSink {
    /// Upload a video frame, reallocating the texture if its size changed
    ///
    /// Returns `false` when the frame was rejected or the upload failed.
    /// Failures are logged; the texture keeps its previous contents.
    fn upload(&mut self, frame: &Frame<'_>) -> bool;

    /// Handle of the current texture, 0 when none is allocated
    fn handle(&self) -> u32;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Destroy the texture if one is allocated
    fn release(&mut self);

    /// Number of textures created so far
    fn reallocations(&self) -> u64 {
        0
    }
}

/// Creates, fills and destroys textures for a [`SlotSink`]
pub trait TextureAllocator {
    type Texture;

    /// Create a texture of exactly `width` x `height`
    fn allocate(&mut self, width: u32, height: u32) -> Result<Self::Texture>;

    /// Replace the full contents of `texture` with `frame`
    fn write(&mut self, texture: &Self::Texture, frame: &Frame<'_>) -> Result<()>;

    fn destroy(&mut self, texture: Self::Texture);
}

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

/// Hand out a process-wide unique, non-zero texture handle
fn next_handle() -> u32 {
    loop {
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        if handle != 0 {
            return handle;
        }
    }
}

struct Slot<T> {
    handle: u32,
    width: u32,
    height: u32,
    texture: T,
}

/// Texture sink that reuses one texture object while dimensions are stable
pub struct SlotSink<A: TextureAllocator> {
    allocator: A,
    slot: Option<Slot<A::Texture>>,
    reallocations: u64,
}

impl<A: TextureAllocator> SlotSink<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            slot: None,
            reallocations: 0,
        }
    }

    /// The current texture, if one is allocated
    pub fn texture(&self) -> Option<&A::Texture> {
        self.slot.as_ref().map(|slot| &slot.texture)
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    fn ensure_slot(&mut self, width: u32, height: u32) -> Result<()> {
        let reusable = matches!(&self.slot, Some(slot) if slot.width == width && slot.height == height);
        if !reusable {
            if let Some(old) = self.slot.take() {
                log::debug!(
                    "Texture {} resized {}x{} -> {}x{}, reallocating",
                    old.handle,
                    old.width,
                    old.height,
                    width,
                    height
                );
                self.allocator.destroy(old.texture);
            }

            let texture = self.allocator.allocate(width, height)?;
            let handle = next_handle();
            self.reallocations += 1;
            log::debug!("Allocated texture {} ({}x{})", handle, width, height);

            self.slot = Some(Slot {
                handle,
                width,
                height,
                texture,
            });
        }

        Ok(())
    }
}

impl<A: TextureAllocator> TextureSink for SlotSink<A> {
    fn upload(&mut self, frame: &Frame<'_>) -> bool {
        if !frame.has_enough_data() {
            log::error!(
                "Rejecting {}x{} {} frame: stride {} and {} bytes do not cover {} bytes per row",
                frame.width,
                frame.height,
                frame.depth.name(),
                frame.stride,
                frame.data.len(),
                frame.row_bytes()
            );
            return false;
        }

        if let Err(e) = self.ensure_slot(frame.width, frame.height) {
            log::error!(
                "Failed to allocate {}x{} texture: {:#}",
                frame.width,
                frame.height,
                e
            );
            return false;
        }

        let Some(slot) = self.slot.as_ref() else {
            return false;
        };
        match self.allocator.write(&slot.texture, frame) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to upload frame to texture {}: {:#}", slot.handle, e);
                false
            }
        }
    }

    fn handle(&self) -> u32 {
        self.slot.as_ref().map_or(0, |slot| slot.handle)
    }

    fn width(&self) -> u32 {
        self.slot.as_ref().map_or(0, |slot| slot.width)
    }

    fn height(&self) -> u32 {
        self.slot.as_ref().map_or(0, |slot| slot.height)
    }

    fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            log::debug!("Destroying texture {}", slot.handle);
            self.allocator.destroy(slot.texture);
        }
    }

    fn reallocations(&self) -> u64 {
        self.reallocations
    }
}
