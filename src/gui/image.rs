use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;

use crate::prepare::{PreparedImage, TargetSize};
use crate::state::{CacheEntry, ViewerState};

pub const MAX_TEXTURE_SIDE: u32 = 8192;

/// Display box for `rect`, in physical pixels.
pub(super) fn target_for_rect(rect: egui::Rect, pixels_per_point: f32) -> TargetSize {
    let w = (rect.width() * pixels_per_point).round().max(1.0) as u32;
    let h = (rect.height() * pixels_per_point).round().max(1.0) as u32;
    TargetSize::new(w.min(MAX_TEXTURE_SIDE), h.min(MAX_TEXTURE_SIDE))
}

/// Holds back size changes until the window stops moving.
pub(super) struct ResizeSettler {
    settle: Duration,
    pending: Option<(TargetSize, Instant)>,
}

impl ResizeSettler {
    pub(super) fn new(settle: Duration) -> Self {
        Self { settle, pending: None }
    }

    /// Returns the size to apply once `observed` has been stable long enough.
    pub(super) fn observe(&mut self, observed: TargetSize, current: TargetSize, now: Instant) -> Option<TargetSize> {
        if observed == current {
            self.pending = None;
            return None;
        }
        match self.pending {
            Some((size, since)) if size == observed => {
                if now.duration_since(since) >= self.settle {
                    self.pending = None;
                    Some(observed)
                } else {
                    None
                }
            }
            _ => {
                self.pending = Some((observed, now));
                None
            }
        }
    }

    pub(super) fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    pub(super) fn settle(&self) -> Duration {
        self.settle
    }
}

struct CachedTexture {
    pixels: Arc<[u8]>,
    handle: egui::TextureHandle,
}

/// GPU textures mirroring the viewer's ready images, keyed by pair identity.
#[derive(Default)]
pub(super) struct TextureCache {
    textures: HashMap<PathBuf, CachedTexture>,
}

impl TextureCache {
    /// Texture for `img`, uploading it if the pixels changed.
    pub(super) fn get_or_upload(&mut self, ctx: &egui::Context, id: &PathBuf, img: &PreparedImage) -> &egui::TextureHandle {
        let stale = self.textures.get(id).is_none_or(|t| !Arc::ptr_eq(&t.pixels, &img.pixels));
        if stale {
            let color_image = egui::ColorImage::from_rgba_unmultiplied(
                [img.width as usize, img.height as usize],
                &img.pixels,
            );
            let name = format!("sheet_{}", id.display());
            let handle = ctx.load_texture(name, color_image, Default::default());
            self.textures.insert(id.clone(), CachedTexture { pixels: img.pixels.clone(), handle });
        }
        &self.textures[id].handle
    }

    /// Drop textures whose image left the viewer cache.
    pub(super) fn sync(&mut self, state: &ViewerState) {
        self.textures.retain(|id, _| matches!(state.cached(id), Some(CacheEntry::Ready(_))));
    }
}

/// Paint `texture` centred in `rect` at its native pixel size.
pub(super) fn render_texture(ui: &mut egui::Ui, texture: &egui::TextureHandle, rect: egui::Rect) {
    let ppp = ui.ctx().pixels_per_point();
    let [w, h] = texture.size();
    let mut size = egui::vec2(w as f32 / ppp, h as f32 / ppp);

    // Stale images from a larger box are shrunk until the fresh one lands.
    let scale = (rect.width() / size.x).min(rect.height() / size.y).min(1.0);
    size *= scale;

    let paint_rect = egui::Rect::from_center_size(rect.center(), size);
    egui::Image::from_texture((texture.id(), size)).paint_at(ui, paint_rect);
}
