// Screen dimmer: one flat-colored, click-through overlay per display.
//
// The manager tracks the surfaces and their state; the backend owns the
// actual windows. Surfaces are never activated, so showing the dimmer leaves
// keyboard focus with whatever the user is working in.

#[cfg(windows)]
pub mod win32;

use crate::error::{Result, TheaterError};
use crate::platform::{Dimmer, WindowId};
use crate::settings::Rgb;
use tracing::{debug, info, warn};

/// Display bounds in virtual-screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Platform primitives behind the overlay set.
pub trait OverlayBackend {
    fn displays(&mut self) -> Result<Vec<Rect>>;
    /// Create a hidden, fully transparent surface covering `bounds`.
    fn create_surface(&mut self, bounds: Rect) -> Result<WindowId>;
    fn destroy_surface(&mut self, id: WindowId);
    fn show_surface(&mut self, id: WindowId, visible: bool);
    fn set_surface_alpha(&mut self, id: WindowId, alpha: u8);
    /// Color used by every surface's next paint.
    fn set_fill(&mut self, color: Rgb);
    fn redraw_surface(&mut self, id: WindowId);
    /// Drop class registrations and anything else shared by the surfaces.
    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySurface {
    pub id: WindowId,
    pub bounds: Rect,
    pub alpha: u8,
    pub color: Rgb,
    pub visible: bool,
}

pub struct OverlayManager<B: OverlayBackend> {
    backend: B,
    surfaces: Vec<OverlaySurface>,
    color: Rgb,
    initialized: bool,
}

impl<B: OverlayBackend> OverlayManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            surfaces: Vec::new(),
            color: Rgb::BLACK,
            initialized: false,
        }
    }

    #[cfg(test)]
    pub fn surfaces(&self) -> &[OverlaySurface] {
        &self.surfaces
    }

    /// One surface per display, or none at all.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        match self.create_surfaces() {
            Ok(()) => {
                self.initialized = true;
                info!("Created {} overlay surfaces", self.surfaces.len());
                Ok(())
            }
            Err(e) => {
                warn!("Overlay creation failed: {e}");
                self.destroy_surfaces();
                self.backend.release();
                Err(e)
            }
        }
    }

    fn create_surfaces(&mut self) -> Result<()> {
        let displays = self.backend.displays()?;
        if displays.is_empty() {
            return Err(TheaterError::NoDisplays);
        }

        self.backend.set_fill(self.color);
        for bounds in displays {
            let id = self.backend.create_surface(bounds)?;
            debug!(
                "Overlay {:?} at ({}, {}) {}x{}",
                id,
                bounds.left,
                bounds.top,
                bounds.width(),
                bounds.height()
            );
            self.surfaces.push(OverlaySurface {
                id,
                bounds,
                alpha: 0,
                color: self.color,
                visible: false,
            });
        }
        Ok(())
    }

    fn destroy_surfaces(&mut self) {
        for surface in self.surfaces.drain(..) {
            debug!(
                "Destroying overlay {:?} ({}x{}, alpha {}, color {:?}, visible {})",
                surface.id,
                surface.bounds.width(),
                surface.bounds.height(),
                surface.alpha,
                surface.color,
                surface.visible
            );
            self.backend.destroy_surface(surface.id);
        }
    }

    pub fn show(&mut self, visible: bool) {
        for surface in &mut self.surfaces {
            self.backend.show_surface(surface.id, visible);
            surface.visible = visible;
        }
    }

    pub fn set_alpha(&mut self, alpha: u8) {
        for surface in &mut self.surfaces {
            self.backend.set_surface_alpha(surface.id, alpha);
            surface.alpha = alpha;
        }
    }

    /// Hidden surfaces aren't redrawn; they paint the new color when shown.
    pub fn set_color(&mut self, color: Rgb) {
        self.color = color;
        self.backend.set_fill(color);
        for surface in &mut self.surfaces {
            surface.color = color;
            if surface.visible {
                self.backend.redraw_surface(surface.id);
            }
        }
    }

    pub fn is_overlay_surface(&self, id: WindowId) -> bool {
        self.surfaces.iter().any(|surface| surface.id == id)
    }

    pub fn teardown(&mut self) {
        if !self.initialized {
            return;
        }
        self.destroy_surfaces();
        self.backend.release();
        self.initialized = false;
        debug!("Overlay surfaces destroyed");
    }
}

impl<B: OverlayBackend> Dimmer for OverlayManager<B> {
    fn initialize(&mut self) -> Result<()> {
        OverlayManager::initialize(self)
    }

    fn teardown(&mut self) {
        OverlayManager::teardown(self)
    }

    fn show(&mut self, visible: bool) {
        OverlayManager::show(self, visible)
    }

    fn set_alpha(&mut self, alpha: u8) {
        OverlayManager::set_alpha(self, alpha)
    }

    fn set_color(&mut self, color: Rgb) {
        OverlayManager::set_color(self, color)
    }

    fn is_dimmer_window(&self, window: WindowId) -> bool {
        self.is_overlay_surface(window)
    }
}

impl<B: OverlayBackend> Drop for OverlayManager<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
