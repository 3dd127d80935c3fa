//! Matrix driver contract.
//!
//! The hardware driver is an external collaborator. The engine only needs a way to create
//! offscreen canvases, hand a finished canvas to the driver on vsync, and learn the panel size.
//! `MemoryMatrix` is the in-process implementation used by the emulator and by tests.

use std::fmt;

/// 24-bit RGB color. Persisted as a single `0xRRGGBB` integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_packed(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xff) as u8,
            g: ((rgb >> 8) & 0xff) as u8,
            b: (rgb & 0xff) as u8,
        }
    }

    pub fn packed(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    /// Multiply every channel by `factor` (clamped to 0..=1).
    pub fn scaled(self, factor: f32) -> Self {
        let f = factor.clamp(0.0, 1.0);
        let ch = |c: u8| (f32::from(c) * f).round() as u8;
        Self::new(ch(self.r), ch(self.g), ch(self.b))
    }
}

/// An offscreen, pixel-settable surface.
pub trait FrameCanvas: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn set_pixel(&mut self, x: u32, y: u32, color: Color);
    fn fill(&mut self, color: Color);

    fn clear(&mut self) {
        self.fill(Color::BLACK);
    }

    /// Read back a pixel. Drivers that cannot read back return `None`.
    fn pixel(&self, _x: u32, _y: u32) -> Option<Color> {
        None
    }
}

/// The display the render loop drives.
pub trait Matrix: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn create_frame_canvas(&mut self) -> Box<dyn FrameCanvas>;

    /// Present `canvas` at the next vsync and return the canvas that should be drawn next.
    fn swap_on_vsync(&mut self, canvas: Box<dyn FrameCanvas>) -> Box<dyn FrameCanvas>;

    fn clear(&mut self);
}

/// Plain RGB buffer.
#[derive(Clone)]
pub struct MemoryCanvas {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
}

impl MemoryCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::BLACK; (width as usize) * (height as usize)],
        }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| (y as usize) * (self.width as usize) + x as usize)
    }
}

impl fmt::Debug for MemoryCanvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCanvas")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl FrameCanvas for MemoryCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    fn fill(&mut self, color: Color) {
        self.pixels.fill(color);
    }

    fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.index(x, y).map(|i| self.pixels[i])
    }
}

type SwapObserver = Box<dyn FnMut(&dyn FrameCanvas) + Send>;

/// Double-buffered in-memory matrix. Every swap makes the submitted canvas the front buffer
/// and returns the previous front buffer for reuse.
pub struct MemoryMatrix {
    width: u32,
    height: u32,
    front: Box<dyn FrameCanvas>,
    swaps: u64,
    observer: Option<SwapObserver>,
}

impl MemoryMatrix {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            front: Box::new(MemoryCanvas::new(width, height)),
            swaps: 0,
            observer: None,
        }
    }

    /// Called with the new front buffer after every swap and clear.
    pub fn with_observer(mut self, observer: impl FnMut(&dyn FrameCanvas) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps
    }

    pub fn front(&self) -> &dyn FrameCanvas {
        self.front.as_ref()
    }

    fn notify(&mut self) {
        if let Some(obs) = self.observer.as_mut() {
            obs(self.front.as_ref());
        }
    }
}

impl fmt::Debug for MemoryMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMatrix")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("swaps", &self.swaps)
            .finish()
    }
}

impl Matrix for MemoryMatrix {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn create_frame_canvas(&mut self) -> Box<dyn FrameCanvas> {
        Box::new(MemoryCanvas::new(self.width, self.height))
    }

    fn swap_on_vsync(&mut self, canvas: Box<dyn FrameCanvas>) -> Box<dyn FrameCanvas> {
        let previous = std::mem::replace(&mut self.front, canvas);
        self.swaps += 1;
        self.notify();
        previous
    }

    fn clear(&mut self) {
        self.front.clear();
        self.notify();
    }
}
