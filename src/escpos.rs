//! ESC/POS command builder for the 58/80 mm thermal bill printers at the
//! counter and waiter stations.
//!
//! Only the subset the bill layout needs is implemented: init, emphasis,
//! size, alignment, text, separators, feed and partial cut.

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Paper width in characters (Font A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 48,
        }
    }

    pub fn from_mm(mm: i32) -> Self {
        if mm <= 58 {
            PaperWidth::Mm58
        } else {
            PaperWidth::Mm80
        }
    }
}

pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
}

impl EscPosBuilder {
    pub fn new(paper: PaperWidth) -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            paper,
        }
    }

    /// ESC @
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// ESC E n
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x45, u8::from(on)]);
        self
    }

    /// GS ! n, width and height multipliers clamped to 1..=8.
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    pub fn normal_size(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    /// ESC a 0
    pub fn left(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 0]);
        self
    }

    /// ESC a 1
    pub fn center(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 1]);
        self
    }

    /// Append text using the printer's ASCII page.
    pub fn text(&mut self, s: &str) -> &mut Self {
        self.buffer.extend(encode_ascii(s));
        self
    }

    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s).lf()
    }

    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    pub fn separator(&mut self) -> &mut Self {
        let width = self.paper.chars();
        self.buffer.extend(std::iter::repeat(b'-').take(width));
        self.lf()
    }

    /// Left label, right-aligned value, padded to the paper width.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let formatted = pad_pair(label, value, self.paper.chars());
        self.line(&formatted)
    }

    /// ESC d n
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16 (partial cut after a 16-dot feed)
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x41, 0x10]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Lay out `label` and `value` on one line of `width` characters. A label too
/// long for the line is truncated so the amount always stays visible.
pub fn pad_pair(label: &str, value: &str, width: usize) -> String {
    let value_len = value.chars().count();
    let max_label = width.saturating_sub(value_len + 1);
    let label: String = label.chars().take(max_label).collect();
    let gap = width.saturating_sub(label.chars().count() + value_len);
    format!("{label}{}{value}", " ".repeat(gap))
}

/// Printers run on the ASCII page; the rupee sign becomes "Rs" and any other
/// non-ASCII character prints as '?'.
fn encode_ascii(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '₹' => bytes.extend_from_slice(b"Rs"),
            '×' => bytes.push(b'x'),
            c if (c as u32) < 0x80 => bytes.push(c as u8),
            _ => bytes.push(b'?'),
        }
    }
    bytes
}
