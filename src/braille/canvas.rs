/// Braille Unicode canvas for high-resolution terminal graphics.
/// Each character cell represents a 2x4 pixel grid (8 dots).
/// Unicode Braille patterns: U+2800 to U+28FF
#[derive(Clone)]
pub struct BrailleCanvas {
    width: usize,  // Characters
    height: usize, // Characters
    cells: Vec<u8>, // Bit pattern per char, row-major
}

impl BrailleCanvas {
    /// Create a new canvas with the given character dimensions.
    /// Effective pixel resolution: width*2 x height*4
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![0u8; width * height],
        }
    }

    /// Pixel width (2 dots per character)
    pub fn pixel_width(&self) -> usize {
        self.width * 2
    }

    /// Pixel height (4 dots per character)
    pub fn pixel_height(&self) -> usize {
        self.height * 4
    }

    /// Set a pixel at the given coordinates.
    /// Braille dot layout per character:
    /// ```text
    /// (0,0) (1,0)   bits: 0x01 0x08
    /// (0,1) (1,1)   bits: 0x02 0x10
    /// (0,2) (1,2)   bits: 0x04 0x20
    /// (0,3) (1,3)   bits: 0x40 0x80
    /// ```
    pub fn set_pixel(&mut self, x: usize, y: usize) {
        let cx = x / 2;
        let cy = y / 4;

        if cx >= self.width || cy >= self.height {
            return;
        }

        const BITS: [[u8; 4]; 2] = [[0x01, 0x02, 0x04, 0x40], [0x08, 0x10, 0x20, 0x80]];
        self.cells[cy * self.width + cx] |= BITS[x % 2][y % 4];
    }

    /// Set a pixel using signed coordinates (ignores negative values)
    pub fn set_pixel_signed(&mut self, x: i32, y: i32) {
        if x >= 0 && y >= 0 {
            self.set_pixel(x as usize, y as usize);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|&b| b == 0)
    }

    /// Non-blank characters as (column, row, glyph)
    pub fn glyphs(&self) -> impl Iterator<Item = (u16, u16, char)> + '_ {
        let width = self.width.max(1);
        self.cells.iter().enumerate().filter_map(move |(idx, &bits)| {
            if bits == 0 {
                return None;
            }
            let ch = char::from_u32(0x2800 + bits as u32)?;
            Some(((idx % width) as u16, (idx / width) as u16, ch))
        })
    }

    /// Convert the canvas to a string of Braille characters
    #[cfg(test)]
    pub fn to_string(&self) -> String {
        self.cells
            .chunks(self.width.max(1))
            .map(|row| {
                row.iter()
                    .map(|&b| char::from_u32(0x2800 + b as u32).unwrap_or(' '))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Count of lit dots, for density checks
    #[cfg(test)]
    pub fn dot_count(&self) -> u32 {
        self.cells.iter().map(|b| b.count_ones()).sum()
    }
}
