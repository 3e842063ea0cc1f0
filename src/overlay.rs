//! # Overlay
//!
//! This module defines the text-rasterizer collaborator the engine draws its
//! status banner through, plus the colours and banner texts a target
//! configuration supplies.

/// The external text rasterizer.
///
/// The engine points it at the submitted framebuffer each frame and asks it
/// to draw the status banner; it never retains the framebuffer beyond the
/// call.
pub trait Overlay {
    /// Targets the rasterizer at a framebuffer snapshot.
    fn set_framebuffer(&mut self, base: usize, pitch: u32, width: u32, height: u32);

    /// Sets the text colour as packed RGBA.
    fn set_foreground(&mut self, rgba: u32);

    /// Sets the text background colour as packed RGBA.
    fn set_background(&mut self, rgba: u32);

    /// Draws `text` at pixel position `(x, y)`.
    fn draw_text(&mut self, x: u32, y: u32, text: &str);
}

/// Colours and banner texts drawn during the warm-up window and after a
/// failure verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    /// Text colour, packed RGBA.
    pub foreground: u32,
    /// Text background colour, packed RGBA.
    pub background: u32,
    /// Pixel height of one text line.
    pub line_height: u32,
    /// Banner shown each frame while the monitor is still observing.
    pub success_text: String,
    /// Warning shown permanently after a failure verdict; one entry per line.
    pub failure_text: Vec<String>,
}
