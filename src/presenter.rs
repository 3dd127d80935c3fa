use std::io::Write;
use std::time::{Duration, Instant};

use ledmatrix_engine::{Color, FrameCanvas};

/// Presentation-only preview of the emulated panel.
///
/// The render loop always draws into the in-memory matrix, whose size is authoritative. The
/// presenter only mirrors each swapped frame somewhere a human can see it, so headless mode
/// swaps in the null presenter without touching the render path.
#[derive(Debug)]
pub enum Presenter {
    Terminal(TerminalPresenter),
    Null(NullPresenter),
}

impl Presenter {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Presenter::Terminal(_))
    }

    pub fn present(&mut self, canvas: &dyn FrameCanvas) {
        match self {
            Presenter::Terminal(p) => p.present(canvas),
            Presenter::Null(_) => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct NullPresenter;

/// ANSI truecolor preview, two panel rows per terminal row (upper half block).
#[derive(Debug)]
pub struct TerminalPresenter {
    min_interval: Duration,
    last: Option<Instant>,
    buf: String,
}

impl TerminalPresenter {
    pub fn new(max_fps: u32) -> Self {
        Self {
            min_interval: Duration::from_millis(1000 / u64::from(max_fps.max(1))),
            last: None,
            buf: String::new(),
        }
    }

    pub fn present(&mut self, canvas: &dyn FrameCanvas) {
        let now = Instant::now();
        if self.last.is_some_and(|t| now.duration_since(t) < self.min_interval) {
            return;
        }
        self.last = Some(now);

        render_half_blocks(canvas, &mut self.buf);
        let mut out = std::io::stdout().lock();
        // cursor home, then the frame
        let _ = write!(out, "\x1b[H{}", self.buf);
        let _ = out.flush();
    }
}

/// Fill `out` with one line per two panel rows; an odd last row gets a black lower half.
pub fn render_half_blocks(canvas: &dyn FrameCanvas, out: &mut String) {
    use std::fmt::Write as _;

    out.clear();
    let (w, h) = (canvas.width(), canvas.height());
    let px = |x: u32, y: u32| canvas.pixel(x, y).unwrap_or(Color::BLACK);
    for y in (0..h).step_by(2) {
        for x in 0..w {
            let top = px(x, y);
            let bottom = if y + 1 < h { px(x, y + 1) } else { Color::BLACK };
            let _ = write!(
                out,
                "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m\u{2580}",
                top.r, top.g, top.b, bottom.r, bottom.g, bottom.b
            );
        }
        out.push_str("\x1b[0m\n");
    }
}

#[cfg(test)]
mod tests {
    use ledmatrix_engine::MemoryCanvas;

    use super::*;

    #[test]
    fn test_half_blocks_pair_rows() {
        let mut canvas = MemoryCanvas::new(2, 3);
        canvas.fill(Color::new(1, 2, 3));
        let mut out = String::new();
        render_half_blocks(&canvas, &mut out);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].matches('\u{2580}').count(), 2);
        assert!(lines[0].contains("\x1b[48;2;1;2;3m"));
        // last row has no partner
        assert!(lines[1].contains("\x1b[48;2;0;0;0m"));
    }

    #[test]
    fn test_null_presenter_is_disabled() {
        let mut p = Presenter::Null(NullPresenter);
        assert!(!p.is_enabled());
        p.present(&MemoryCanvas::new(1, 1));
        assert!(Presenter::Terminal(TerminalPresenter::new(10)).is_enabled());
    }
}
