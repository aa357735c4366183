use std::{
    thread,
    time::{Duration, Instant},
};

use crate::Result;

/// RGBA colour understood by the window backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const DARK_GRAY: Self = Self::rgb(80, 80, 80);
    pub const LIGHT_GRAY: Self = Self::rgb(200, 200, 200);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// A text draw call captured by [`HeadlessWindow`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextDraw {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub size: i32,
    pub color: Color,
}

/// Windowing and immediate-mode drawing, as provided by the rendering
/// library.
pub trait Window {
    fn open(&mut self, width: u32, height: u32, title: &str) -> Result<()>;
    fn set_target_fps(&mut self, fps: u32);
    /// True once the user asked to close the window.
    fn should_close(&self) -> bool;
    fn begin_frame(&mut self);
    fn clear(&mut self, color: Color);
    fn draw_text(&mut self, text: &str, x: i32, y: i32, size: i32, color: Color);
    fn end_frame(&mut self);
    fn close(&mut self);
}

/// Window that draws nothing. It keeps the last completed frame's text for
/// inspection and asks to close after an optional frame budget.
#[derive(Debug, Default)]
pub struct HeadlessWindow {
    title: String,
    open: bool,
    frame_budget: Option<u64>,
    frames: u64,
    target_fps: u32,
    pace_frames: bool,
    frame_started: Option<Instant>,
    pending: Vec<TextDraw>,
    last_frame: Vec<TextDraw>,
    clear_color: Option<Color>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request close after `frames` frames have been presented.
    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    /// Sleep at the end of each frame to honour the target frame rate.
    pub fn paced(mut self) -> Self {
        self.pace_frames = true;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn clear_color(&self) -> Option<Color> {
        self.clear_color
    }

    pub fn last_frame(&self) -> &[TextDraw] {
        &self.last_frame
    }

    /// Text of the most recent completed frame, one draw call per entry.
    pub fn last_frame_text(&self) -> Vec<&str> {
        self.last_frame.iter().map(|draw| draw.text.as_str()).collect()
    }

    fn frame_period(&self) -> Option<Duration> {
        (self.pace_frames && self.target_fps > 0)
            .then(|| Duration::from_secs_f64(1.0 / f64::from(self.target_fps)))
    }
}

impl Window for HeadlessWindow {
    fn open(&mut self, width: u32, height: u32, title: &str) -> Result<()> {
        self.title = title.to_string();
        self.open = true;
        tracing::debug!(width, height, title, "opened headless window");
        Ok(())
    }

    fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = fps;
    }

    fn should_close(&self) -> bool {
        !self.open || self.frame_budget.is_some_and(|budget| self.frames >= budget)
    }

    fn begin_frame(&mut self) {
        self.frame_started = Some(Instant::now());
        self.pending.clear();
    }

    fn clear(&mut self, color: Color) {
        self.clear_color = Some(color);
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32, size: i32, color: Color) {
        self.pending.push(TextDraw {
            text: text.to_string(),
            x,
            y,
            size,
            color,
        });
    }

    fn end_frame(&mut self) {
        self.last_frame = std::mem::take(&mut self.pending);
        self.frames += 1;
        tracing::trace!(frame = self.frames, text = ?self.last_frame_text(), "frame presented");

        if let (Some(period), Some(started)) = (self.frame_period(), self.frame_started.take()) {
            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
    }

    fn close(&mut self) {
        if self.open {
            tracing::debug!(frames = self.frames, "closing headless window");
        }
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_frame_text() {
        let mut window = HeadlessWindow::new();
        window.open(640, 480, "test").unwrap();

        window.begin_frame();
        window.draw_text("first", 0, 0, 10, Color::LIGHT_GRAY);
        window.end_frame();
        window.begin_frame();
        window.clear(Color::DARK_GRAY);
        window.draw_text("second", 1, 2, 12, Color::LIGHT_GRAY);
        window.end_frame();

        assert_eq!(window.last_frame_text(), vec!["second"]);
        assert_eq!(window.last_frame()[0].y, 2);
        assert_eq!(window.clear_color(), Some(Color::DARK_GRAY));
        assert_eq!(window.frames(), 2);
    }

    #[test]
    fn closes_after_frame_budget() {
        let mut window = HeadlessWindow::new().with_frame_budget(2);
        assert!(window.should_close());

        window.open(10, 10, "budget").unwrap();
        assert!(!window.should_close());
        for _ in 0..2 {
            window.begin_frame();
            window.end_frame();
        }
        assert!(window.should_close());
    }

    #[test]
    fn paced_frames_take_at_least_the_period() {
        let mut window = HeadlessWindow::new().paced();
        window.open(10, 10, "paced").unwrap();
        window.set_target_fps(100);

        let started = Instant::now();
        for _ in 0..3 {
            window.begin_frame();
            window.end_frame();
        }
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
