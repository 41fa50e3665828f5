//! Bounding boxes with lazily populated coordinates.

use std::fmt;

/// A rectangle in page pixels with coordinates that may still be unset.
///
/// Zones built from OCR output often learn their geometry bottom-up: a line
/// has no box of its own until its words have been scanned. An incomplete box
/// is "empty"; [`BBox::update`] grows it to the union of the boxes seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BBox {
    coords: [Option<i32>; 4],
}

impl BBox {
    /// A fully populated box. Coordinates are taken as given.
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            coords: [Some(x0), Some(y0), Some(x1), Some(y1)],
        }
    }

    /// A box with no coordinates set.
    pub const fn empty() -> Self {
        Self { coords: [None; 4] }
    }

    /// A fully populated box with corners reordered so that `x0 <= x1` and `y0 <= y1`.
    pub fn normalized(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    pub fn x0(&self) -> Option<i32> {
        self.coords[0]
    }

    pub fn y0(&self) -> Option<i32> {
        self.coords[1]
    }

    pub fn x1(&self) -> Option<i32> {
        self.coords[2]
    }

    pub fn y1(&self) -> Option<i32> {
        self.coords[3]
    }

    /// Whether all four coordinates are set.
    pub fn is_complete(&self) -> bool {
        self.coords.iter().all(Option::is_some)
    }

    /// `(x0, y0, x1, y1)` if the box is complete.
    pub fn coordinates(&self) -> Option<(i32, i32, i32, i32)> {
        match self.coords {
            [Some(x0), Some(y0), Some(x1), Some(y1)] => Some((x0, y0, x1, y1)),
            _ => None,
        }
    }

    pub fn width(&self) -> Option<i32> {
        self.coordinates().map(|(x0, _, x1, _)| x1 - x0)
    }

    pub fn height(&self) -> Option<i32> {
        self.coordinates().map(|(_, y0, _, y1)| y1 - y0)
    }

    /// Grow this box so that it also covers `other`.
    ///
    /// Unset coordinates are copied from `other`. Set minimum coordinates only
    /// decrease, set maximum coordinates only increase. Unset coordinates of
    /// `other` leave the corresponding coordinate untouched.
    pub fn update(&mut self, other: &BBox) {
        for (i, (mine, theirs)) in self.coords.iter_mut().zip(other.coords).enumerate() {
            let Some(theirs) = theirs else {
                continue;
            };
            *mine = Some(match *mine {
                None => theirs,
                Some(current) if i < 2 => current.min(theirs),
                Some(current) => current.max(theirs),
            });
        }
    }

    /// Whether `other` lies within this box. Incomplete boxes contain nothing.
    pub fn contains(&self, other: &BBox) -> bool {
        match (self.coordinates(), other.coordinates()) {
            (Some((ax0, ay0, ax1, ay1)), Some((bx0, by0, bx1, by1))) => {
                ax0 <= bx0 && ay0 <= by0 && bx1 <= ax1 && by1 <= ay1
            }
            _ => false,
        }
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, coord) in self.coords.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match coord {
                Some(value) => write!(f, "{}", value)?,
                None => f.write_str("?")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_box_takes_other_coordinates() {
        let mut bbox = BBox::empty();
        assert!(!bbox.is_complete());
        bbox.update(&BBox::new(1, 2, 3, 4));
        assert_eq!(bbox, BBox::new(1, 2, 3, 4));
    }

    #[test]
    fn test_update_is_union() {
        let mut bbox = BBox::new(10, 10, 20, 20);
        bbox.update(&BBox::new(5, 15, 30, 18));
        assert_eq!(bbox.coordinates(), Some((5, 10, 30, 20)));
    }

    #[test]
    fn test_update_ignores_unset_coordinates() {
        let mut bbox = BBox::new(10, 10, 20, 20);
        bbox.update(&BBox::empty());
        assert_eq!(bbox, BBox::new(10, 10, 20, 20));
    }

    #[test]
    fn test_normalized_swaps_corners() {
        assert_eq!(BBox::normalized(50, 30, 10, 10), BBox::new(10, 10, 50, 30));
    }

    #[test]
    fn test_contains() {
        let outer = BBox::new(0, 0, 100, 40);
        assert!(outer.contains(&BBox::new(10, 10, 50, 30)));
        assert!(!outer.contains(&BBox::new(10, 10, 150, 30)));
        assert!(!outer.contains(&BBox::empty()));
    }

    #[test]
    fn test_display() {
        assert_eq!(BBox::new(1, 2, 3, 4).to_string(), "1 2 3 4");
        assert_eq!(BBox::empty().to_string(), "? ? ? ?");
    }
}
