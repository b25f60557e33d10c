//! Axis-aligned rectangular region of interest in pixel space.

/// Rectangle in the x/y plane; applies to every slice of a stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Roi {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Roi {
    /// Creates a rectangle with its top-left corner at `(x, y)`.
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns `true` when the rounded position falls inside the rectangle.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let px = x.round() as i64;
        let py = y.round() as i64;
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::Roi;

    #[test]
    fn contains_rounds_to_pixels() {
        let roi = Roi::new(10, 20, 5, 5);
        assert!(roi.contains(10.0, 20.0));
        assert!(roi.contains(9.6, 24.4));
        assert!(!roi.contains(9.4, 22.0));
        assert!(!roi.contains(14.6, 22.0));
    }
}
