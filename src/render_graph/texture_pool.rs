//! Pooled render targets shared by every evaluation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TexturePool                         │
//! │                                                          │
//! │  active: textures handed out for the current evaluation  │
//! │  free:   FxHashMap<PoolKey, Vec<PooledTexture>>          │
//! │                                                          │
//! │  acquire()      during an evaluation                     │
//! │  release_all()  after submit, stamps the submission      │
//! │  cancel()       after a failed evaluation                │
//! │  trim()         drops textures idle for too long         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every pooled texture remembers the last submission that used it. A free
//! texture is only handed out again once the device reports that submission
//! as completed, so a frame still in flight never has its targets reused.

use rustc_hash::FxHashMap;

use crate::device::{GpuDevice, TextureDesc, TextureHandle};
use crate::error::DeviceError;

/// Textures are only interchangeable when every creation parameter matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PoolKey {
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    sample_count: u32,
    usage: wgpu::TextureUsages,
}

impl PoolKey {
    fn from_desc(desc: &TextureDesc) -> Self {
        Self {
            format: desc.format,
            width: desc.width,
            height: desc.height,
            sample_count: desc.sample_count,
            usage: desc.usage,
        }
    }
}

#[derive(Debug)]
struct PooledTexture {
    handle: TextureHandle,
    key: PoolKey,
    /// Submission that last referenced this texture; 0 if never submitted.
    last_submission: u64,
    /// Evaluations this texture has sat in the free list.
    idle_evaluations: u32,
}

/// Render target pool keyed by format, size, sample count and usage.
#[derive(Debug, Default)]
pub struct TexturePool {
    active: Vec<PooledTexture>,
    free: FxHashMap<PoolKey, Vec<PooledTexture>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a texture matching `desc`, reusing a free one whose last
    /// submission has completed, else creating a new one.
    pub fn acquire<D: GpuDevice + ?Sized>(&mut self, device: &D, desc: &TextureDesc) -> Result<TextureHandle, DeviceError> {
        let key = PoolKey::from_desc(desc);
        let completed = device.completed_submission();
        let reusable = self.free.get_mut(&key).and_then(|bucket| {
            bucket
                .iter()
                .position(|t| t.last_submission <= completed)
                .map(|i| bucket.swap_remove(i))
        });

        let texture = match reusable {
            Some(mut texture) => {
                texture.idle_evaluations = 0;
                texture
            }
            None => {
                let handle = device.create_texture(desc)?;
                log::debug!(
                    "texture pool: allocated {} {}x{} {:?} x{}",
                    desc.label,
                    desc.width,
                    desc.height,
                    desc.format,
                    desc.sample_count
                );
                PooledTexture {
                    handle,
                    key,
                    last_submission: 0,
                    idle_evaluations: 0,
                }
            }
        };
        let handle = texture.handle;
        self.active.push(texture);
        Ok(handle)
    }

    /// Returns every active texture to the free list, stamped with
    /// `submission`. Textures that stayed free age by one evaluation.
    pub fn release_all(&mut self, submission: u64) {
        for texture in self.free.values_mut().flatten() {
            texture.idle_evaluations += 1;
        }
        for mut texture in self.active.drain(..) {
            texture.last_submission = submission;
            self.free.entry(texture.key).or_default().push(texture);
        }
    }

    /// Returns active textures untouched, for an evaluation that was
    /// discarded before submission.
    pub fn cancel(&mut self) {
        for texture in self.active.drain(..) {
            self.free.entry(texture.key).or_default().push(texture);
        }
    }

    /// Destroys free textures idle for more than `max_idle` evaluations whose
    /// last submission has completed.
    pub fn trim<D: GpuDevice + ?Sized>(&mut self, device: &D, max_idle: u32) {
        let completed = device.completed_submission();
        let mut dropped = 0;
        for bucket in self.free.values_mut() {
            bucket.retain(|t| {
                let keep = t.idle_evaluations <= max_idle || t.last_submission > completed;
                if !keep {
                    device.destroy_texture(t.handle);
                    dropped += 1;
                }
                keep
            });
        }
        self.free.retain(|_, bucket| !bucket.is_empty());
        if dropped > 0 {
            log::debug!("texture pool: trimmed {dropped} idle textures");
        }
    }

    /// Destroys every free texture.
    pub fn clear<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        for texture in self.free.drain().flat_map(|(_, bucket)| bucket) {
            device.destroy_texture(texture.handle);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}
