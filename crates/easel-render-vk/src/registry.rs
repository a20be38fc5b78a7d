// SPDX-License-Identifier: CEPL-1.0
//! Textures made bindable for the UI layer.
//!
//! The UI refers to textures by [`TextureId`]. A [`TextureSlot`] tracks the
//! id shown by one widget; `supersede` swaps in a new texture and frees the
//! previous binding, so callers never pair register/unregister by hand.
use crate::device::{GpuDevice, Texture};
use crate::error::GpuResult;
use ash::vk;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisteredTexture {
    pub binding: vk::DescriptorSet,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    /// [`Texture::serial`] of the registered texture.
    pub serial: u64,
}

/// Id currently shown by one consumer.
#[derive(Debug, Default)]
pub struct TextureSlot {
    current: Option<TextureId>,
}

impl TextureSlot {
    pub fn current(&self) -> Option<TextureId> {
        self.current
    }
}

pub struct TextureRegistry<D: GpuDevice> {
    device: Rc<D>,
    sampler: vk::Sampler,
    next: u64,
    entries: HashMap<TextureId, RegisteredTexture>,
}

impl<D: GpuDevice> TextureRegistry<D> {
    /// Every binding samples through `sampler`, which must outlive the registry.
    pub fn new(device: Rc<D>, sampler: vk::Sampler) -> Self {
        Self {
            device,
            sampler,
            next: 1,
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, texture: &Texture) -> GpuResult<TextureId> {
        let binding = self
            .device
            .create_texture_binding(texture.view, self.sampler)?;
        let id = TextureId(self.next);
        self.next += 1;
        self.entries.insert(
            id,
            RegisteredTexture {
                binding,
                view: texture.view,
                extent: texture.extent,
                serial: texture.serial,
            },
        );
        trace!(?id, "texture registered");
        Ok(id)
    }

    /// Unknown ids are ignored.
    pub fn unregister(&mut self, id: TextureId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.device.destroy_texture_binding(entry.binding);
            trace!(?id, "texture unregistered");
        }
    }

    pub fn get(&self, id: TextureId) -> Option<&RegisteredTexture> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Points `slot` at `texture`. The binding is reused while the texture
    /// stays the same one; anything else gets a new binding and the old one
    /// is freed. Sameness goes by serial, since a rebuilt texture can come
    /// back with the raw view handle of the one it replaced.
    ///
    /// The previous binding must no longer be referenced by pending work.
    /// Canvas rebuilds idle the device, which covers the usual case.
    pub fn supersede(&mut self, slot: &mut TextureSlot, texture: &Texture) -> GpuResult<TextureId> {
        if let Some(id) = slot.current {
            if self.entries.get(&id).is_some_and(|e| e.serial == texture.serial) {
                return Ok(id);
            }
        }
        let id = self.register(texture)?;
        if let Some(old) = slot.current.replace(id) {
            self.unregister(old);
        }
        Ok(id)
    }

    pub fn release(&mut self, slot: &mut TextureSlot) {
        if let Some(id) = slot.current.take() {
            self.unregister(id);
        }
    }
}

impl<D: GpuDevice> Drop for TextureRegistry<D> {
    fn drop(&mut self) {
        for (_, entry) in self.entries.drain() {
            self.device.destroy_texture_binding(entry.binding);
        }
    }
}
